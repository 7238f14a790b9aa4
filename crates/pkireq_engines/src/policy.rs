#![forbid(unsafe_code)]

use pkireq_kernel_contracts::capability::{CapabilityError, Policy, PolicyResult};
use pkireq_kernel_contracts::ext_data::EXT_PENDING_REASON;
use pkireq_kernel_contracts::Request;
use tracing::debug;

pub const POLICY_ACCEPT_ALL: &str = "accept_all";
pub const POLICY_AGENT_APPROVAL: &str = "agent_approval";
pub const POLICY_DENY_ALL: &str = "deny_all";

pub const AGENT_APPROVAL_PENDING_REASON: &str = "awaiting agent approval";

#[derive(Debug, Default, Clone)]
pub struct AcceptAllPolicy;

impl Policy for AcceptAllPolicy {
    fn apply(&self, _request: &mut Request) -> Result<PolicyResult, CapabilityError> {
        Ok(PolicyResult::Accepted)
    }
}

/// Holds every request for agent review.
#[derive(Debug, Default, Clone)]
pub struct AgentApprovalPolicy;

impl Policy for AgentApprovalPolicy {
    fn apply(&self, request: &mut Request) -> Result<PolicyResult, CapabilityError> {
        request
            .ext_data_mut()
            .set_string(EXT_PENDING_REASON, AGENT_APPROVAL_PENDING_REASON)
            .map_err(|e| CapabilityError::new(POLICY_AGENT_APPROVAL, e.to_string()))?;
        debug!(request_id = %request.id(), "held for agent approval");
        Ok(PolicyResult::Rejected)
    }
}

/// Denies a request lacking any of the configured ext-data keys. Key lookup
/// ignores case.
#[derive(Debug, Clone)]
pub struct RequiredExtDataPolicy {
    required_keys: Vec<String>,
}

impl RequiredExtDataPolicy {
    pub fn new<I, S>(required_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_keys: required_keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required_keys(&self) -> &[String] {
        &self.required_keys
    }
}

impl Policy for RequiredExtDataPolicy {
    fn apply(&self, request: &mut Request) -> Result<PolicyResult, CapabilityError> {
        let missing = self
            .required_keys
            .iter()
            .find(|k| request.ext_data().get_ignore_case(k).is_none());
        match missing {
            Some(key) => {
                debug!(request_id = %request.id(), missing_key = %key, "required ext data missing");
                Ok(PolicyResult::Denied)
            }
            None => Ok(PolicyResult::Accepted),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DenyAllPolicy;

impl Policy for DenyAllPolicy {
    fn apply(&self, _request: &mut Request) -> Result<PolicyResult, CapabilityError> {
        Ok(PolicyResult::Denied)
    }
}
