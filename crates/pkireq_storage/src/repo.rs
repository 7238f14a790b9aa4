#![forbid(unsafe_code)]

use pkireq_kernel_contracts::approvals::ApprovalDecodeError;
use pkireq_kernel_contracts::ext_data_codec::ExtDataDecodeConflict;
use pkireq_kernel_contracts::{ContractViolation, Request, RequestId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("request {id} not found")]
    NotFound { id: RequestId },
    #[error("persistence failure: {message}")]
    Persistence { message: String },
    #[error("stored request {id} has corrupt ext data")]
    CorruptExtData {
        id: String,
        #[source]
        source: ExtDataDecodeConflict,
    },
    #[error("stored request {id} has a corrupt approval list")]
    CorruptApprovals {
        id: String,
        #[source]
        source: ApprovalDecodeError,
    },
    #[error("stored request {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: &'static str },
    #[error("invalid search filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: &'static str },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl StorageError {
    pub fn persistence(message: impl Into<String>) -> Self {
        StorageError::Persistence {
            message: message.into(),
        }
    }
}

/// Durable home of every request. The sole arbiter of request state across
/// process restarts.
///
/// Implementations are shared between worker threads; every call is
/// synchronous and may block on I/O.
pub trait RequestRepository: Send + Sync {
    /// Allocates a fresh id. Ids are never handed out twice.
    fn create(&self, request_type: &str) -> Result<RequestId, StorageError>;

    fn save(&self, request: &Request) -> Result<(), StorageError>;

    fn read(&self, id: &RequestId) -> Result<Request, StorageError>;

    /// `filter` is an opaque predicate owned by the repository.
    fn search(&self, filter: &str) -> Result<Vec<Request>, StorageError>;

    /// Ids of the rows matching `filter`, in id order. Matching only looks at
    /// the fixed columns, so a row whose ext data or approvals no longer
    /// decode is still listed.
    fn search_ids(&self, filter: &str) -> Result<Vec<RequestId>, StorageError>;
}
