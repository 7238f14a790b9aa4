#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use pkireq_kernel_contracts::{Request, RequestId};
use tracing::{debug, warn};

use crate::filter::Filter;
use crate::record::StoredRequestRecord;
use crate::repo::{RequestRepository, StorageError};

#[derive(Debug)]
struct StoreInner {
    // Keyed by id; iteration order is id order.
    records: BTreeMap<RequestId, StoredRequestRecord>,
    next_id: RequestId,
}

/// Process-local request repository. Rows are kept in their persisted
/// attribute form so reads exercise the same decode path a directory-backed
/// store would.
#[derive(Debug)]
pub struct InMemoryRequestStore {
    inner: RwLock<StoreInner>,
    fail_next_save: AtomicBool,
    fail_all_saves: AtomicBool,
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl InMemoryRequestStore {
    pub fn new_in_memory() -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                records: BTreeMap::new(),
                next_id: RequestId::from(1u64),
            }),
            fail_next_save: AtomicBool::new(false),
            fail_all_saves: AtomicBool::new(false),
        }
    }

    /// Makes exactly one subsequent `save` fail with a persistence error.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_all_saves.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stored_record(&self, id: &RequestId) -> Option<StoredRequestRecord> {
        self.inner.read().records.get(id).cloned()
    }

    /// Writes a row verbatim, bypassing encoding. Lets callers seed rows a
    /// foreign writer produced, corrupt ones included.
    pub fn put_raw_record(&self, record: StoredRequestRecord) -> Result<(), StorageError> {
        let id = RequestId::parse(&record.request_id)?;
        let mut inner = self.inner.write();
        if id >= inner.next_id {
            inner.next_id = id.next();
        }
        inner.records.insert(id, record);
        Ok(())
    }

    fn injected_failure(&self) -> bool {
        self.fail_all_saves.load(Ordering::SeqCst) || self.fail_next_save.swap(false, Ordering::SeqCst)
    }
}

impl RequestRepository for InMemoryRequestStore {
    fn create(&self, request_type: &str) -> Result<RequestId, StorageError> {
        let mut inner = self.inner.write();
        let id = inner.next_id.clone();
        inner.next_id = id.next();
        debug!(request_id = %id, request_type, "allocated request id");
        Ok(id)
    }

    fn save(&self, request: &Request) -> Result<(), StorageError> {
        if self.injected_failure() {
            warn!(request_id = %request.id(), "request save failed");
            return Err(StorageError::persistence("injected save failure"));
        }
        let record = StoredRequestRecord::from_request(request);
        let mut inner = self.inner.write();
        if request.id() >= &inner.next_id {
            inner.next_id = request.id().next();
        }
        inner.records.insert(request.id().clone(), record);
        debug!(
            request_id = %request.id(),
            status = %request.status(),
            "request saved"
        );
        Ok(())
    }

    fn read(&self, id: &RequestId) -> Result<Request, StorageError> {
        let inner = self.inner.read();
        let record = inner
            .records
            .get(id)
            .ok_or_else(|| StorageError::NotFound { id: id.clone() })?;
        record.to_request()
    }

    fn search(&self, filter: &str) -> Result<Vec<Request>, StorageError> {
        let parsed = Filter::parse(filter)?;
        let inner = self.inner.read();
        let out = inner
            .records
            .values()
            .filter(|r| parsed.matches(r))
            .map(StoredRequestRecord::to_request)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(filter, hits = out.len(), "request search");
        Ok(out)
    }

    fn search_ids(&self, filter: &str) -> Result<Vec<RequestId>, StorageError> {
        let parsed = Filter::parse(filter)?;
        let inner = self.inner.read();
        let out: Vec<RequestId> = inner
            .records
            .iter()
            .filter(|(_, r)| parsed.matches(r))
            .map(|(id, _)| id.clone())
            .collect();
        debug!(filter, hits = out.len(), "request id search");
        Ok(out)
    }
}
