#![forbid(unsafe_code)]

use std::sync::Arc;

use pkireq_engines::notifier::RecordingNotifier;
use pkireq_engines::policy::{AcceptAllPolicy, DenyAllPolicy};
use pkireq_engines::service::{DeferredService, NoopService};
use pkireq_kernel_contracts::capability::{CapabilityError, Service, ServiceResult};
use pkireq_kernel_contracts::{now_millis, Request, RequestId, RequestStatus};
use pkireq_os::{QueueError, RequestQueue};
use pkireq_storage::record::StoredRequestRecord;
use pkireq_storage::repo::RequestRepository;
use pkireq_storage::store::InMemoryRequestStore;

struct FailingService;

impl Service for FailingService {
    fn service_request(&self, _request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        Err(CapabilityError::new("failing_service", "hsm unreachable"))
    }
}

fn seed(store: &InMemoryRequestStore, status: RequestStatus) -> RequestId {
    let id = store.create("enrollment").unwrap();
    let mut r = Request::new(id.clone(), "enrollment", now_millis()).unwrap();
    r.set_status(status);
    store.save(&r).unwrap();
    id
}

#[test]
fn at_recovery_01_approved_requests_are_resubmitted() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let approved = seed(&store, RequestStatus::Approved);
    let pending = seed(&store, RequestStatus::Pending);
    let svc_pending = seed(&store, RequestStatus::SvcPending);

    let notifier = Arc::new(RecordingNotifier::new());
    // Recovery bypasses the policy: a deny-all policy must not matter here.
    let queue = RequestQueue::new(
        store.clone(),
        Arc::new(DenyAllPolicy),
        Arc::new(NoopService),
        notifier.clone(),
    );
    let report = queue.recover().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.resubmitted, vec![approved.clone()]);

    assert_eq!(store.read(&approved).unwrap().status(), RequestStatus::Complete);
    assert_eq!(store.read(&pending).unwrap().status(), RequestStatus::Pending);
    assert_eq!(
        store.read(&svc_pending).unwrap().status(),
        RequestStatus::SvcPending
    );
    assert_eq!(notifier.notifications(), vec![(approved, RequestStatus::Complete)]);
}

#[test]
fn at_recovery_02_service_crash_then_restart_completes_request() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let broken = RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(FailingService),
        Arc::new(RecordingNotifier::new()),
    );
    let mut r = broken.new_request("enrollment").unwrap();
    assert!(matches!(
        broken.process_request(&mut r),
        Err(QueueError::ServiceFailure { .. })
    ));
    let report = broken.recover().unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, *r.id());
    assert_eq!(store.read(r.id()).unwrap().status(), RequestStatus::Approved);

    let deferred = Arc::new(DeferredService::new());
    let restarted = RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        deferred.clone(),
        Arc::new(RecordingNotifier::new()),
    );
    let report = restarted.recover().unwrap();
    assert_eq!(report.resubmitted, vec![r.id().clone()]);
    assert_eq!(store.read(r.id()).unwrap().status(), RequestStatus::SvcPending);
    assert_eq!(deferred.awaiting(), vec![r.id().clone()]);

    // A second sweep finds nothing left to do.
    assert_eq!(restarted.recover().unwrap().resubmitted.len(), 0);
}

#[test]
fn at_recovery_03_corrupt_row_is_reported_and_sweep_continues() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let healthy = seed(&store, RequestStatus::Approved);
    let corrupt = seed(&store, RequestStatus::Approved);
    let later = seed(&store, RequestStatus::Approved);
    let mut rec = store.stored_record(&corrupt).unwrap();
    rec.agent_approvals = Some(vec!["foo".to_string()]);
    store.put_raw_record(rec).unwrap();

    let notifier = Arc::new(RecordingNotifier::new());
    let queue = RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(NoopService),
        notifier.clone(),
    );
    let report = queue.recover().unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.resubmitted, vec![healthy.clone(), later.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, corrupt);

    assert_eq!(store.read(&healthy).unwrap().status(), RequestStatus::Complete);
    assert_eq!(store.read(&later).unwrap().status(), RequestStatus::Complete);
    assert_eq!(
        store.stored_record(&corrupt).unwrap().request_state,
        "approved"
    );
    assert_eq!(notifier.count_for(&corrupt), 0);
}

#[test]
fn at_recovery_04_persisted_state_survives_a_fresh_queue() {
    let store = Arc::new(InMemoryRequestStore::new_in_memory());
    let first = RequestQueue::new(
        store.clone(),
        Arc::new(AcceptAllPolicy),
        Arc::new(DeferredService::new()),
        Arc::new(RecordingNotifier::new()),
    );
    let mut r = first.new_request("revocation").unwrap();
    first.process_request(&mut r).unwrap();
    drop(first);

    let rec: StoredRequestRecord = store.stored_record(r.id()).unwrap();
    assert_eq!(rec.request_state, "svc_pending");

    let notifier = Arc::new(RecordingNotifier::new());
    let second = RequestQueue::new(
        store,
        Arc::new(AcceptAllPolicy),
        Arc::new(NoopService),
        notifier.clone(),
    );
    second.service_complete(r.id()).unwrap();
    assert_eq!(notifier.count_for(r.id()), 1);
}
