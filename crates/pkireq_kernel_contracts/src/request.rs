#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};

use crate::approvals::AgentApprovals;
use crate::common::validate_token;
use crate::ext_data::ExtData;
use crate::request_id::RequestId;
use crate::request_status::RequestStatus;
use crate::{ContractViolation, Validate};

pub const REQUEST_TYPE_MAX_LEN: usize = 128;
pub const REQUEST_PARTY_MAX_LEN: usize = 256;

// Request types the CA-family subsystems submit.
pub const REQUEST_TYPE_ENROLLMENT: &str = "enrollment";
pub const REQUEST_TYPE_RENEWAL: &str = "renewal";
pub const REQUEST_TYPE_REVOCATION: &str = "revocation";
pub const REQUEST_TYPE_UNREVOCATION: &str = "unrevocation";
pub const REQUEST_TYPE_KEY_RECOVERY: &str = "recovery";
pub const REQUEST_TYPE_KEY_ARCHIVAL: &str = "archival";
pub const REQUEST_TYPE_CRL_UPDATE: &str = "updateCRL";

/// One asynchronous PKI operation tracked by the request queue.
///
/// Identity and type are fixed at construction. Status is written by the queue
/// only; everything else is caller data carried through the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    status: RequestStatus,
    request_type: String,
    source_id: Option<String>,
    owner: Option<String>,
    realm: Option<String>,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    ext_data: ExtData,
    approvals: AgentApprovals,
}

impl Request {
    pub fn new(
        id: RequestId,
        request_type: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            id,
            status: RequestStatus::Begin,
            request_type: request_type.into(),
            source_id: None,
            owner: None,
            realm: None,
            created_at: now,
            modified_at: now,
            ext_data: ExtData::new(),
            approvals: AgentApprovals::new(),
        };
        r.validate()?;
        Ok(r)
    }

    /// Rebuilds a request read back from a repository.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: RequestId,
        status: RequestStatus,
        request_type: String,
        source_id: Option<String>,
        owner: Option<String>,
        realm: Option<String>,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
        ext_data: ExtData,
        approvals: AgentApprovals,
    ) -> Result<Self, ContractViolation> {
        let r = Self {
            id,
            status,
            request_type,
            source_id,
            owner,
            realm,
            created_at,
            modified_at,
            ext_data,
            approvals,
        };
        r.validate()?;
        Ok(r)
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    pub fn request_type(&self) -> &str {
        &self.request_type
    }

    pub fn source_id(&self) -> Option<&str> {
        self.source_id.as_deref()
    }

    pub fn set_source_id(&mut self, source_id: Option<String>) {
        self.source_id = source_id;
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn set_owner(&mut self, owner: Option<String>) {
        self.owner = owner;
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn set_realm(&mut self, realm: Option<String>) {
        self.realm = realm;
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn modified_at(&self) -> DateTime<Utc> {
        self.modified_at
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.modified_at {
            self.modified_at = now;
        }
    }

    pub fn ext_data(&self) -> &ExtData {
        &self.ext_data
    }

    pub fn ext_data_mut(&mut self) -> &mut ExtData {
        &mut self.ext_data
    }

    pub fn approvals(&self) -> &AgentApprovals {
        &self.approvals
    }

    pub fn approvals_mut(&mut self) -> &mut AgentApprovals {
        &mut self.approvals
    }
}

impl Validate for Request {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("request.request_type", &self.request_type, REQUEST_TYPE_MAX_LEN)?;
        for (field, value) in [
            ("request.source_id", &self.source_id),
            ("request.owner", &self.owner),
            ("request.realm", &self.realm),
        ] {
            if let Some(v) = value {
                validate_token(field, v, REQUEST_PARTY_MAX_LEN)?;
            }
        }
        if self.modified_at < self.created_at {
            return Err(ContractViolation::InvalidValue {
                field: "request.modified_at",
                reason: "must not precede created_at",
            });
        }
        Ok(())
    }
}
