#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use pkireq_engines::registry::PluginRegistry;
use pkireq_kernel_contracts::capability::{
    CapabilityError, Notifier, Policy, PolicyResult, Service, ServiceResult,
};
use pkireq_kernel_contracts::ext_data::{EXT_CANCEL_REASON, EXT_REJECT_REASON};
use pkireq_kernel_contracts::request::REQUEST_PARTY_MAX_LEN;
use pkireq_kernel_contracts::{
    now_millis, ContractViolation, Request, RequestId, RequestStatus,
};
use pkireq_storage::filter::equals_filter;
use pkireq_storage::record::{ATTR_REQUEST_STATE, ATTR_SOURCE_ID};
use pkireq_storage::repo::{RequestRepository, StorageError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ApprovalThreshold, ConfigError, QueueConfig};
use crate::locks::RequestLockTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueOperation {
    Process,
    Approve,
    Reject,
    Cancel,
    ServiceComplete,
    MarkPending,
    Update,
}

impl QueueOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueOperation::Process => "process",
            QueueOperation::Approve => "approve",
            QueueOperation::Reject => "reject",
            QueueOperation::Cancel => "cancel",
            QueueOperation::ServiceComplete => "service_complete",
            QueueOperation::MarkPending => "mark_pending",
            QueueOperation::Update => "update",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("request {id} not found")]
    RequestNotFound { id: RequestId },
    #[error("request {id}: {operation} not allowed in status {from}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        operation: QueueOperation,
    },
    #[error("request {id}: policy failed")]
    PolicyFailure {
        id: RequestId,
        #[source]
        source: CapabilityError,
    },
    #[error("request {id}: service failed")]
    ServiceFailure {
        id: RequestId,
        #[source]
        source: CapabilityError,
    },
    #[error("request persistence failed")]
    Persistence {
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

impl From<StorageError> for QueueError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { id } => QueueError::RequestNotFound { id },
            source => QueueError::Persistence { source },
        }
    }
}

/// Outcome of a startup sweep over APPROVED requests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resubmitted: Vec<RequestId>,
    pub failed: Vec<(RequestId, String)>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Edges of the request lifecycle graph. Terminal statuses have no way out.
pub fn is_allowed_request_transition(from: RequestStatus, to: RequestStatus) -> bool {
    use RequestStatus::*;
    matches!(
        (from, to),
        (Begin, Pending | Approved | Rejected | Canceled)
            | (Pending, Approved | Rejected | Canceled)
            | (Approved, SvcPending | Complete | Rejected | Canceled)
            | (SvcPending, Complete | Rejected | Canceled)
    )
}

fn validate_request_transition(
    id: &RequestId,
    operation: QueueOperation,
    current: RequestStatus,
) -> Result<RequestStatus, QueueError> {
    let next = match operation {
        QueueOperation::Approve if current == RequestStatus::Pending => Some(RequestStatus::Pending),
        QueueOperation::Reject if !current.is_terminal() => Some(RequestStatus::Rejected),
        QueueOperation::Cancel if !current.is_terminal() => Some(RequestStatus::Canceled),
        QueueOperation::ServiceComplete if current == RequestStatus::SvcPending => {
            Some(RequestStatus::Complete)
        }
        QueueOperation::MarkPending if current == RequestStatus::Begin => {
            Some(RequestStatus::Pending)
        }
        _ => None,
    };
    next.ok_or_else(|| QueueError::InvalidTransition {
        id: id.clone(),
        from: current,
        operation,
    })
}

pub const CLOSE_REASON_MAX_LEN: usize = 4096;

fn validate_reason(field: &'static str, reason: &str) -> Result<(), ContractViolation> {
    if reason.len() > CLOSE_REASON_MAX_LEN {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "reason text too long",
        });
    }
    Ok(())
}

/// Drives requests through policy, approval, service and notification while
/// keeping the repository the sole record of their status.
///
/// Every operation on one request id runs under that id's lock; the lock is
/// held across the policy, service, repository and notifier calls it makes.
pub struct RequestQueue {
    repository: Arc<dyn RequestRepository>,
    policy: Arc<dyn Policy>,
    service: Arc<dyn Service>,
    notifier: Arc<dyn Notifier>,
    pending_notifier: Option<Arc<dyn Notifier>>,
    approval_threshold: Arc<dyn ApprovalThreshold>,
    locks: RequestLockTable,
}

impl RequestQueue {
    pub fn new(
        repository: Arc<dyn RequestRepository>,
        policy: Arc<dyn Policy>,
        service: Arc<dyn Service>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repository,
            policy,
            service,
            notifier,
            pending_notifier: None,
            approval_threshold: Arc::new(QueueConfig::default()),
            locks: RequestLockTable::new(),
        }
    }

    pub fn with_pending_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.pending_notifier = Some(notifier);
        self
    }

    pub fn with_approval_threshold(mut self, threshold: impl ApprovalThreshold + 'static) -> Self {
        self.approval_threshold = Arc::new(threshold);
        self
    }

    /// Builds a queue whose stages are resolved by name through `registry`.
    pub fn from_config(
        config: &QueueConfig,
        registry: &PluginRegistry,
        repository: Arc<dyn RequestRepository>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let notifier = registry.build_notifier(&config.notifier)?;
        let pending_notifier = match (&config.pending_notifier, config.notify_pending) {
            (_, false) => None,
            (Some(name), true) => Some(registry.build_notifier(name)?),
            (None, true) => Some(Arc::clone(&notifier)),
        };
        let mut queue = Self::new(
            repository,
            registry.build_policy(&config.policy)?,
            registry.build_service(&config.service)?,
            notifier,
        )
        .with_approval_threshold(config.clone());
        queue.pending_notifier = pending_notifier;
        Ok(queue)
    }

    /// Ids currently held by an in-flight operation.
    pub fn in_flight(&self) -> usize {
        self.locks.in_flight()
    }

    pub fn new_request(&self, request_type: &str) -> Result<Request, QueueError> {
        let id = self.repository.create(request_type)?;
        let request = Request::new(id, request_type, now_millis())?;
        self.repository.save(&request)?;
        info!(request_id = %request.id(), request_type, "request created");
        Ok(request)
    }

    /// Runs a BEGIN request through the policy and, when accepted, the
    /// service. An APPROVED request goes straight to the service.
    ///
    /// On return `request` mirrors the last persisted state.
    pub fn process_request(&self, request: &mut Request) -> Result<(), QueueError> {
        let _guard = self.locks.lock(request.id());
        let stored = self.repository.read(request.id())?.status();
        if stored != request.status() {
            return Err(QueueError::InvalidTransition {
                id: request.id().clone(),
                from: stored,
                operation: QueueOperation::Process,
            });
        }
        match stored {
            RequestStatus::Begin => self.run_policy(request),
            RequestStatus::Approved => {
                let working = request.clone();
                self.dispatch_service(request, working)
            }
            from => Err(QueueError::InvalidTransition {
                id: request.id().clone(),
                from,
                operation: QueueOperation::Process,
            }),
        }
    }

    /// Records `agent`'s approval of a PENDING request. Once the request type's
    /// threshold is met the request is approved and serviced in the same call.
    pub fn approve(&self, id: &RequestId, agent: &str) -> Result<Request, QueueError> {
        if agent.trim().is_empty() || agent.len() > REQUEST_PARTY_MAX_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "approve.agent",
                reason: "must be a non-empty username",
            }
            .into());
        }
        let _guard = self.locks.lock(id);
        let mut request = self.repository.read(id)?;
        // Approval itself keeps the request PENDING until the threshold is met.
        validate_request_transition(id, QueueOperation::Approve, request.status())?;

        let mut working = request.clone();
        working.approvals_mut().add_approval(agent);
        let required = self
            .approval_threshold
            .required_approvals(request.request_type())
            .max(1);
        let have = working.approvals().len();
        debug!(request_id = %id, agent, have, required, "approval recorded");

        if have >= required as usize {
            self.transition(&mut request, working, RequestStatus::Approved, QueueOperation::Approve)?;
            let working = request.clone();
            self.dispatch_service(&mut request, working)?;
        } else {
            self.persist(&mut request, working)?;
        }
        Ok(request)
    }

    pub fn reject(&self, id: &RequestId, reason: &str) -> Result<Request, QueueError> {
        self.close(id, QueueOperation::Reject, EXT_REJECT_REASON, Some(reason))
    }

    pub fn cancel(&self, id: &RequestId) -> Result<Request, QueueError> {
        self.close(id, QueueOperation::Cancel, EXT_CANCEL_REASON, None)
    }

    pub fn cancel_with_reason(&self, id: &RequestId, reason: &str) -> Result<Request, QueueError> {
        self.close(id, QueueOperation::Cancel, EXT_CANCEL_REASON, Some(reason))
    }

    /// Completion call owed by a service that answered `Pending`. Must not be
    /// made from inside `service_request` on the calling thread.
    pub fn service_complete(&self, id: &RequestId) -> Result<Request, QueueError> {
        let _guard = self.locks.lock(id);
        let mut request = self.repository.read(id)?;
        let next = validate_request_transition(id, QueueOperation::ServiceComplete, request.status())?;
        let working = request.clone();
        self.transition(&mut request, working, next, QueueOperation::ServiceComplete)?;
        self.notify_completion(&request);
        Ok(request)
    }

    /// Puts a BEGIN request on hold for agents without consulting the policy.
    pub fn mark_request_pending(&self, id: &RequestId) -> Result<Request, QueueError> {
        let _guard = self.locks.lock(id);
        let mut request = self.repository.read(id)?;
        let next = validate_request_transition(id, QueueOperation::MarkPending, request.status())?;
        let working = request.clone();
        self.transition(&mut request, working, next, QueueOperation::MarkPending)?;
        self.notify_pending(&request);
        Ok(request)
    }

    pub fn find_request(&self, id: &RequestId) -> Result<Request, QueueError> {
        Ok(self.repository.read(id)?)
    }

    pub fn find_requests_by_status(&self, status: RequestStatus) -> Result<Vec<Request>, QueueError> {
        Ok(self
            .repository
            .search(&equals_filter(ATTR_REQUEST_STATE, status.as_str()))?)
    }

    /// Lowest-id request carrying `source_id`, if any.
    pub fn find_request_by_source_id(&self, source_id: &str) -> Result<Option<Request>, QueueError> {
        let mut found = self
            .repository
            .search(&equals_filter(ATTR_SOURCE_ID, source_id))?;
        found.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(found.into_iter().next())
    }

    /// New BEGIN request with a fresh id carrying over type, source id, realm
    /// and ext data. Approvals stay with the original.
    pub fn clone_request(&self, id: &RequestId) -> Result<Request, QueueError> {
        let source = self.repository.read(id)?;
        let new_id = self.repository.create(source.request_type())?;
        let mut copy = Request::new(new_id, source.request_type(), now_millis())?;
        copy.set_source_id(source.source_id().map(ToString::to_string));
        copy.set_realm(source.realm().map(ToString::to_string));
        *copy.ext_data_mut() = source.ext_data().clone();
        self.repository.save(&copy)?;
        info!(request_id = %copy.id(), cloned_from = %id, "request cloned");
        Ok(copy)
    }

    /// Persists caller-side edits. Status is owned by the queue: a differing
    /// status is refused and the stored approval list is kept.
    pub fn update_request(&self, request: &Request) -> Result<Request, QueueError> {
        let _guard = self.locks.lock(request.id());
        let mut stored = self.repository.read(request.id())?;
        if stored.status() != request.status() {
            return Err(QueueError::InvalidTransition {
                id: request.id().clone(),
                from: stored.status(),
                operation: QueueOperation::Update,
            });
        }
        if stored.request_type() != request.request_type() {
            return Err(ContractViolation::InvalidValue {
                field: "request.request_type",
                reason: "must not change after creation",
            }
            .into());
        }
        let mut working = request.clone();
        *working.approvals_mut() = stored.approvals().clone();
        self.persist(&mut stored, working)?;
        Ok(stored)
    }

    /// Resubmits every APPROVED request to the service. Individual failures
    /// are reported and do not stop the sweep.
    pub fn recover(&self) -> Result<RecoveryReport, QueueError> {
        let approved = self
            .repository
            .search_ids(&equals_filter(ATTR_REQUEST_STATE, RequestStatus::Approved.as_str()))?;
        let mut report = RecoveryReport::default();
        for id in approved {
            let resubmitted = self
                .repository
                .read(&id)
                .map_err(QueueError::from)
                .and_then(|mut request| self.process_request(&mut request));
            match resubmitted {
                Ok(()) => report.resubmitted.push(id),
                Err(e) => {
                    warn!(request_id = %id, error = %e, "recovery resubmit failed");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        info!(
            resubmitted = report.resubmitted.len(),
            failed = report.failed.len(),
            "recovery sweep finished"
        );
        Ok(report)
    }

    fn close(
        &self,
        id: &RequestId,
        operation: QueueOperation,
        reason_key: &str,
        reason: Option<&str>,
    ) -> Result<Request, QueueError> {
        if let Some(reason) = reason {
            validate_reason("close.reason", reason)?;
        }
        let _guard = self.locks.lock(id);
        let mut request = self.repository.read(id)?;
        let next = validate_request_transition(id, operation, request.status())?;
        let mut working = request.clone();
        if let Some(reason) = reason.filter(|r| !r.trim().is_empty()) {
            working.ext_data_mut().set_string(reason_key, reason)?;
        }
        self.transition(&mut request, working, next, operation)?;
        self.notify_completion(&request);
        Ok(request)
    }

    fn run_policy(&self, request: &mut Request) -> Result<(), QueueError> {
        let mut working = request.clone();
        let verdict = self
            .policy
            .apply(&mut working)
            .map_err(|source| QueueError::PolicyFailure {
                id: request.id().clone(),
                source,
            })?;
        ensure_identity_kept(request, &working, "policy must not change request id or type")?;
        debug!(request_id = %request.id(), ?verdict, "policy applied");

        match verdict {
            PolicyResult::Accepted => {
                self.transition(request, working, RequestStatus::Approved, QueueOperation::Process)?;
                let working = request.clone();
                self.dispatch_service(request, working)
            }
            PolicyResult::Rejected => {
                self.transition(request, working, RequestStatus::Pending, QueueOperation::Process)?;
                self.notify_pending(request);
                Ok(())
            }
            PolicyResult::Denied => {
                self.transition(request, working, RequestStatus::Rejected, QueueOperation::Process)?;
                self.notify_completion(request);
                Ok(())
            }
        }
    }

    // Caller holds the id lock and `request` is persisted as APPROVED.
    fn dispatch_service(&self, request: &mut Request, mut working: Request) -> Result<(), QueueError> {
        let outcome = self.service.service_request(&mut working);
        let outcome = match outcome {
            Ok(o) => o,
            Err(source) => {
                warn!(request_id = %request.id(), error = %source, "service failed");
                return Err(QueueError::ServiceFailure {
                    id: request.id().clone(),
                    source,
                });
            }
        };
        ensure_identity_kept(request, &working, "service must not change request id or type")?;
        match outcome {
            ServiceResult::Done => {
                self.transition(request, working, RequestStatus::Complete, QueueOperation::Process)?;
                self.notify_completion(request);
            }
            ServiceResult::Pending => {
                self.transition(request, working, RequestStatus::SvcPending, QueueOperation::Process)?;
            }
        }
        Ok(())
    }

    fn transition(
        &self,
        request: &mut Request,
        mut working: Request,
        next: RequestStatus,
        operation: QueueOperation,
    ) -> Result<(), QueueError> {
        let from = request.status();
        if !is_allowed_request_transition(from, next) {
            return Err(QueueError::InvalidTransition {
                id: request.id().clone(),
                from,
                operation,
            });
        }
        working.set_status(next);
        self.persist(request, working)?;
        info!(
            request_id = %request.id(),
            request_type = request.request_type(),
            from = %from,
            status = %next,
            operation = %operation,
            "request transition"
        );
        Ok(())
    }

    // `request` is replaced only after the save succeeded.
    fn persist(&self, request: &mut Request, mut working: Request) -> Result<(), QueueError> {
        working.touch(now_millis());
        if let Err(e) = self.repository.save(&working) {
            warn!(request_id = %request.id(), error = %e, "request save failed");
            return Err(e.into());
        }
        *request = working;
        Ok(())
    }

    fn notify_completion(&self, request: &Request) {
        if let Err(e) = self.notifier.notify(request) {
            warn!(request_id = %request.id(), error = %e, "completion notifier failed");
        }
    }

    fn notify_pending(&self, request: &Request) {
        if let Some(n) = &self.pending_notifier {
            if let Err(e) = n.notify(request) {
                warn!(request_id = %request.id(), error = %e, "pending notifier failed");
            }
        }
    }
}

fn ensure_identity_kept(
    before: &Request,
    after: &Request,
    reason: &'static str,
) -> Result<(), ContractViolation> {
    if before.id() != after.id() || before.request_type() != after.request_type() {
        return Err(ContractViolation::InvalidValue {
            field: "request.identity",
            reason,
        });
    }
    Ok(())
}
