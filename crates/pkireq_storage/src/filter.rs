#![forbid(unsafe_code)]

//! LDAP-style search filters over the fixed request columns.
//!
//! Supported forms: `(attr=value)`, `(attr=*)`, `(&...)`, `(|...)`, `(!...)`.
//! Values use RFC 4515 escapes (`\28`, `\29`, `\2a`, `\5c`). Substring
//! matching is not supported.

use crate::record::{
    StoredRequestRecord, ATTR_REALM, ATTR_REQUEST_ID, ATTR_REQUEST_OWNER, ATTR_REQUEST_STATE,
    ATTR_REQUEST_TYPE, ATTR_SOURCE_ID,
};
use crate::repo::StorageError;

pub const ATTR_OBJECT_CLASS: &str = "objectclass";

const KNOWN_ATTRIBUTES: [&str; 6] = [
    ATTR_REQUEST_ID,
    ATTR_REQUEST_STATE,
    ATTR_REQUEST_TYPE,
    ATTR_SOURCE_ID,
    ATTR_REQUEST_OWNER,
    ATTR_REALM,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Equals { attribute: String, value: String },
    Present { attribute: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Filter::All);
        }
        let mut p = Parser {
            source: input,
            chars: trimmed.chars().collect(),
            pos: 0,
        };
        let f = p.filter()?;
        if p.pos != p.chars.len() {
            return Err(p.error("trailing input after filter"));
        }
        Ok(f)
    }

    pub fn matches(&self, record: &StoredRequestRecord) -> bool {
        match self {
            Filter::All => true,
            Filter::Present { attribute } => {
                attribute.eq_ignore_ascii_case(ATTR_OBJECT_CLASS)
                    || record.attribute(attribute).is_some()
            }
            Filter::Equals { attribute, value } => match record.attribute(attribute) {
                Some(v) if attribute.eq_ignore_ascii_case(ATTR_REQUEST_STATE) => {
                    v.eq_ignore_ascii_case(value)
                }
                Some(v) => v == value,
                None => false,
            },
            Filter::And(parts) => parts.iter().all(|f| f.matches(record)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(record)),
            Filter::Not(inner) => !inner.matches(record),
        }
    }
}

/// Escapes a literal so it can be embedded in an equality filter.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '*' => out.push_str("\\2a"),
            '\\' => out.push_str("\\5c"),
            _ => out.push(c),
        }
    }
    out
}

/// `(attr=value)` with `value` escaped.
pub fn equals_filter(attribute: &str, value: &str) -> String {
    format!("({attribute}={})", escape_value(value))
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> StorageError {
        StorageError::InvalidFilter {
            filter: self.source.to_string(),
            reason,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expect(&mut self, c: char, reason: &'static str) -> Result<(), StorageError> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn filter(&mut self) -> Result<Filter, StorageError> {
        self.expect('(', "expected '('")?;
        let f = match self.peek() {
            Some('&') => {
                self.pos += 1;
                Filter::And(self.filter_list()?)
            }
            Some('|') => {
                self.pos += 1;
                Filter::Or(self.filter_list()?)
            }
            Some('!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.expect(')', "expected ')'")?;
        Ok(f)
    }

    fn filter_list(&mut self) -> Result<Vec<Filter>, StorageError> {
        let mut out = Vec::new();
        while self.peek() == Some('(') {
            out.push(self.filter()?);
        }
        if out.is_empty() {
            return Err(self.error("empty filter list"));
        }
        Ok(out)
    }

    fn item(&mut self) -> Result<Filter, StorageError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '=' || c == '(' || c == ')' {
                break;
            }
            self.pos += 1;
        }
        let attribute: String = self.chars[start..self.pos].iter().collect();
        let attribute = attribute.trim().to_string();
        if attribute.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        self.expect('=', "expected '='")?;

        let is_object_class = attribute.eq_ignore_ascii_case(ATTR_OBJECT_CLASS);
        if !is_object_class
            && !KNOWN_ATTRIBUTES
                .iter()
                .any(|a| a.eq_ignore_ascii_case(&attribute))
        {
            return Err(self.error("unknown attribute"));
        }

        if self.peek() == Some('*') && self.chars.get(self.pos + 1) == Some(&')') {
            self.pos += 1;
            return Ok(Filter::Present { attribute });
        }
        if is_object_class {
            return Err(self.error("objectclass supports presence only"));
        }
        let value = self.value()?;
        Ok(Filter::Equals { attribute, value })
    }

    fn value(&mut self) -> Result<String, StorageError> {
        // Escapes name raw bytes, so a multi-byte character arrives as
        // several `\XX` groups and is only valid once reassembled.
        let mut bytes = Vec::new();
        loop {
            match self.peek() {
                None | Some(')') => break,
                Some('(') => return Err(self.error("unescaped '(' in value")),
                Some('*') => return Err(self.error("substring match not supported")),
                Some('\\') => {
                    let hex: String = self
                        .chars
                        .get(self.pos + 1..self.pos + 3)
                        .map(|h| h.iter().collect())
                        .unwrap_or_default();
                    let byte = u8::from_str_radix(&hex, 16)
                        .ok()
                        .filter(|_| hex.len() == 2 && hex.chars().all(|c| c.is_ascii_hexdigit()))
                        .ok_or_else(|| self.error("bad escape in value"))?;
                    bytes.push(byte);
                    self.pos += 3;
                }
                Some(c) => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                    self.pos += 1;
                }
            }
        }
        String::from_utf8(bytes).map_err(|_| self.error("escaped value is not valid UTF-8"))
    }
}
