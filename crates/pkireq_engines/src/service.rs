#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use pkireq_kernel_contracts::capability::{CapabilityError, Service, ServiceResult};
use pkireq_kernel_contracts::{Request, RequestId};
use tracing::debug;

pub const SERVICE_NOOP: &str = "noop";
pub const SERVICE_DEFERRED: &str = "deferred";
pub const SERVICE_ROUTER: &str = "request_type_router";

#[derive(Debug, Default, Clone)]
pub struct NoopService;

impl Service for NoopService {
    fn service_request(&self, _request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        Ok(ServiceResult::Done)
    }
}

/// Hands every request off for out-of-band completion and remembers which
/// ids still owe a completion call.
#[derive(Debug, Default)]
pub struct DeferredService {
    awaiting: Mutex<BTreeSet<RequestId>>,
}

impl DeferredService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn awaiting(&self) -> Vec<RequestId> {
        self.awaiting.lock().iter().cloned().collect()
    }

    /// Removes `id` from the awaiting set. Returns false when it was not there.
    pub fn take(&self, id: &RequestId) -> bool {
        self.awaiting.lock().remove(id)
    }
}

impl Service for DeferredService {
    fn service_request(&self, request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        self.awaiting.lock().insert(request.id().clone());
        debug!(request_id = %request.id(), "service deferred");
        Ok(ServiceResult::Pending)
    }
}

/// Dispatches by request type. A type with no route fails the service stage.
#[derive(Default)]
pub struct RequestTypeRouter {
    routes: HashMap<String, Arc<dyn Service>>,
}

impl RequestTypeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, request_type: impl Into<String>, service: Arc<dyn Service>) -> Self {
        self.routes.insert(request_type.into(), service);
        self
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Service for RequestTypeRouter {
    fn service_request(&self, request: &mut Request) -> Result<ServiceResult, CapabilityError> {
        let service = self.routes.get(request.request_type()).ok_or_else(|| {
            CapabilityError::new(
                SERVICE_ROUTER,
                format!("no service for request type {}", request.request_type()),
            )
        })?;
        service.service_request(request)
    }
}
