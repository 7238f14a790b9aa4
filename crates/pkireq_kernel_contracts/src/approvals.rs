#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::common::{from_epoch_millis, now_millis};

const COMPACT_SEPARATOR: char = ';';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentApproval {
    username: String,
    approved_at: DateTime<Utc>,
}

impl AgentApproval {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn approved_at(&self) -> DateTime<Utc> {
        self.approved_at
    }

    fn to_compact(&self) -> String {
        format!(
            "{}{COMPACT_SEPARATOR}{}",
            self.approved_at.timestamp_millis(),
            self.username
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed agent approval entry {entry:?}: {reason}")]
pub struct ApprovalDecodeError {
    pub entry: String,
    pub reason: &'static str,
}

/// Per-agent approvals attached to a request, in first-approval order.
/// Holds at most one entry per username.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentApprovals {
    entries: Vec<AgentApproval>,
}

impl AgentApprovals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentApproval> {
        self.entries.iter()
    }

    pub fn usernames(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.username.as_str()).collect()
    }

    pub fn add_approval(&mut self, username: &str) -> &AgentApproval {
        self.add_approval_at(username, now_millis())
    }

    /// Re-approval by a known agent refreshes its timestamp in place; the
    /// entry keeps its position.
    pub fn add_approval_at(&mut self, username: &str, at: DateTime<Utc>) -> &AgentApproval {
        let idx = match self.entries.iter().position(|e| e.username == username) {
            Some(idx) => {
                self.entries[idx].approved_at = at;
                idx
            }
            None => {
                self.entries.push(AgentApproval {
                    username: username.to_string(),
                    approved_at: at,
                });
                self.entries.len() - 1
            }
        };
        &self.entries[idx]
    }

    pub fn remove_approval(&mut self, username: &str) {
        self.entries.retain(|e| e.username != username);
    }

    pub fn find_approval(&self, username: &str) -> Option<&AgentApproval> {
        self.entries.iter().find(|e| e.username == username)
    }

    pub fn to_compact_form(&self) -> Vec<String> {
        self.entries.iter().map(AgentApproval::to_compact).collect()
    }

    /// All-or-nothing: any malformed entry, or an absent list, yields `None`.
    pub fn from_compact_form(form: Option<&[String]>) -> Option<Self> {
        Self::try_from_compact_form(form?).ok()
    }

    pub fn try_from_compact_form<S: AsRef<str>>(form: &[S]) -> Result<Self, ApprovalDecodeError> {
        let mut approvals = Self::new();
        for raw in form {
            let raw = raw.as_ref();
            let fail = |reason| ApprovalDecodeError {
                entry: raw.to_string(),
                reason,
            };
            let (millis, username) = raw
                .split_once(COMPACT_SEPARATOR)
                .ok_or_else(|| fail("missing separator"))?;
            if millis.is_empty() || !millis.bytes().all(|b| b.is_ascii_digit()) {
                return Err(fail("epoch is not numeric"));
            }
            if username.is_empty() {
                return Err(fail("empty username"));
            }
            let at = millis
                .parse::<i64>()
                .ok()
                .and_then(from_epoch_millis)
                .ok_or_else(|| fail("epoch out of range"))?;
            if approvals.find_approval(username).is_some() {
                return Err(fail("duplicate username"));
            }
            approvals.add_approval_at(username, at);
        }
        Ok(approvals)
    }
}
