#![forbid(unsafe_code)]

use parking_lot::Mutex;
use pkireq_kernel_contracts::capability::{CapabilityError, Notifier};
use pkireq_kernel_contracts::{Request, RequestId, RequestStatus};
use tracing::info;

pub const NOTIFIER_LOG: &str = "log";
pub const NOTIFIER_RECORDING: &str = "recording";

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, request: &Request) -> Result<(), CapabilityError> {
        info!(
            request_id = %request.id(),
            request_type = request.request_type(),
            status = %request.status(),
            "request notification"
        );
        Ok(())
    }
}

/// Keeps every notification in arrival order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<(RequestId, RequestStatus)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<(RequestId, RequestStatus)> {
        self.seen.lock().clone()
    }

    pub fn count_for(&self, id: &RequestId) -> usize {
        self.seen.lock().iter().filter(|(seen, _)| seen == id).count()
    }

    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, request: &Request) -> Result<(), CapabilityError> {
        self.seen
            .lock()
            .push((request.id().clone(), request.status()));
        Ok(())
    }
}
