#![forbid(unsafe_code)]

use pkireq_kernel_contracts::approvals::AgentApprovals;
use pkireq_kernel_contracts::ext_data_codec::{decode_ext_data, encode_ext_data};
use pkireq_kernel_contracts::{
    from_epoch_millis, Request, RequestId, RequestStatus, SchemaVersion,
};

use crate::repo::StorageError;

pub const STORED_REQUEST_SCHEMA_VERSION: SchemaVersion = SchemaVersion(1);

// Fixed-schema attribute names, matched ignoring ASCII case by filters.
pub const ATTR_REQUEST_ID: &str = "requestId";
pub const ATTR_REQUEST_STATE: &str = "requestState";
pub const ATTR_REQUEST_TYPE: &str = "requestType";
pub const ATTR_SOURCE_ID: &str = "sourceId";
pub const ATTR_REQUEST_OWNER: &str = "requestOwner";
pub const ATTR_REALM: &str = "realm";

/// Attribute-oriented row for one request: fixed columns, the flattened
/// ext-data attribute set, and the approval list in compact form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRequestRecord {
    pub schema_version: SchemaVersion,
    pub request_id: String,
    pub request_state: String,
    pub request_type: String,
    pub source_id: Option<String>,
    pub request_owner: Option<String>,
    pub realm: Option<String>,
    pub create_time_ms: i64,
    pub modify_time_ms: i64,
    pub ext_data: Vec<(String, String)>,
    pub agent_approvals: Option<Vec<String>>,
}

impl StoredRequestRecord {
    pub fn from_request(request: &Request) -> Self {
        let approvals = request.approvals();
        Self {
            schema_version: STORED_REQUEST_SCHEMA_VERSION,
            request_id: request.id().to_string(),
            request_state: request.status().as_str().to_string(),
            request_type: request.request_type().to_string(),
            source_id: request.source_id().map(ToString::to_string),
            request_owner: request.owner().map(ToString::to_string),
            realm: request.realm().map(ToString::to_string),
            create_time_ms: request.created_at().timestamp_millis(),
            modify_time_ms: request.modified_at().timestamp_millis(),
            ext_data: encode_ext_data(request.ext_data()),
            agent_approvals: (!approvals.is_empty()).then(|| approvals.to_compact_form()),
        }
    }

    /// Decodes the row. Any inconsistency fails the whole read; a partially
    /// decoded request is never returned.
    pub fn to_request(&self) -> Result<Request, StorageError> {
        let corrupt = |reason| StorageError::Corrupt {
            id: self.request_id.clone(),
            reason,
        };
        if self.schema_version != STORED_REQUEST_SCHEMA_VERSION {
            return Err(corrupt("unsupported schema version"));
        }
        let id = RequestId::parse(&self.request_id).map_err(|_| corrupt("malformed request id"))?;
        let status = RequestStatus::parse(&self.request_state)
            .map_err(|_| corrupt("unknown request state"))?;
        let created_at =
            from_epoch_millis(self.create_time_ms).ok_or_else(|| corrupt("bad create time"))?;
        let modified_at =
            from_epoch_millis(self.modify_time_ms).ok_or_else(|| corrupt("bad modify time"))?;
        let ext_data =
            decode_ext_data(&self.ext_data).map_err(|source| StorageError::CorruptExtData {
                id: self.request_id.clone(),
                source,
            })?;
        let approvals = match &self.agent_approvals {
            Some(form) => AgentApprovals::try_from_compact_form(form).map_err(|source| {
                StorageError::CorruptApprovals {
                    id: self.request_id.clone(),
                    source,
                }
            })?,
            None => AgentApprovals::new(),
        };
        Ok(Request::restore(
            id,
            status,
            self.request_type.clone(),
            self.source_id.clone(),
            self.request_owner.clone(),
            self.realm.clone(),
            created_at,
            modified_at,
            ext_data,
            approvals,
        )?)
    }

    /// Fixed-column lookup by attribute name, ignoring ASCII case.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        let columns: [(&str, Option<&str>); 6] = [
            (ATTR_REQUEST_ID, Some(self.request_id.as_str())),
            (ATTR_REQUEST_STATE, Some(self.request_state.as_str())),
            (ATTR_REQUEST_TYPE, Some(self.request_type.as_str())),
            (ATTR_SOURCE_ID, self.source_id.as_deref()),
            (ATTR_REQUEST_OWNER, self.request_owner.as_deref()),
            (ATTR_REALM, self.realm.as_deref()),
        ];
        columns
            .into_iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v)
    }
}
