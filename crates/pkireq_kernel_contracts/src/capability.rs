#![forbid(unsafe_code)]

//! Pluggable stages a subsystem hands to the request queue.

use thiserror::Error;

use crate::request::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyResult {
    /// Proceed to the service stage.
    Accepted,
    /// Hold for agent approval.
    Rejected,
    /// Refuse outright; the request is closed as rejected.
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceResult {
    Done,
    /// Completion is signalled later through the queue's completion entry point.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{component}: {message}")]
pub struct CapabilityError {
    pub component: String,
    pub message: String,
}

impl CapabilityError {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Admission control. May add to the request's ext data, must leave its id
/// and type alone, and must give the same answer for an unchanged request.
pub trait Policy: Send + Sync {
    fn apply(&self, request: &mut Request) -> Result<PolicyResult, CapabilityError>;
}

/// Performs the operation itself. After returning [`ServiceResult::Pending`]
/// the service owes the queue exactly one completion call for the request,
/// made after `service_request` has returned.
pub trait Service: Send + Sync {
    fn service_request(&self, request: &mut Request) -> Result<ServiceResult, CapabilityError>;
}

/// Side effects only. Errors are logged by the queue and never undo a
/// transition.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: &Request) -> Result<(), CapabilityError>;
}
