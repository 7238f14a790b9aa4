#![forbid(unsafe_code)]

pub mod approvals;
pub mod capability;
pub mod common;
pub mod ext_data;
pub mod ext_data_codec;
pub mod request;
pub mod request_id;
pub mod request_status;

pub use common::{from_epoch_millis, now_millis, ContractViolation, SchemaVersion, Validate};
pub use request::Request;
pub use request_id::RequestId;
pub use request_status::RequestStatus;
