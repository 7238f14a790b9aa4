#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use crate::ContractViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Begin,
    Pending,
    Approved,
    SvcPending,
    Canceled,
    Rejected,
    Complete,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 7] = [
        RequestStatus::Begin,
        RequestStatus::Pending,
        RequestStatus::Approved,
        RequestStatus::SvcPending,
        RequestStatus::Canceled,
        RequestStatus::Rejected,
        RequestStatus::Complete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Begin => "begin",
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::SvcPending => "svc_pending",
            RequestStatus::Canceled => "canceled",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ContractViolation> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or(ContractViolation::InvalidValue {
                field: "request_status",
                reason: "unknown request status",
            })
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Complete | RequestStatus::Rejected | RequestStatus::Canceled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
