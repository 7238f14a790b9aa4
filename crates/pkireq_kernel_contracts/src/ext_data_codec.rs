#![forbid(unsafe_code)]

//! Reversible mapping between [`ExtData`] and attribute/value pairs of an
//! attribute-oriented store.
//!
//! A top-level key `k` is stored under the attribute `extData-<encode(k)>`. A
//! nested entry `k/sub` is stored under `extData-<encode(k)>;<encode(sub)>`,
//! with the part after `;` acting as an attribute subtype. The prefix is
//! matched ignoring ASCII case on read.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use thiserror::Error;

use crate::ext_data::{ExtData, StoredExtDataValue};

pub const EXT_DATA_ATTRIBUTE_PREFIX: &str = "extData-";
const SUBTYPE_SEPARATOR: char = ';';
const ESCAPE_LEAD: &str = "--";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtDataDecodeConflict {
    #[error("ext data key {key:?} is stored both as a scalar and as a nested map")]
    ScalarAndNested { key: String },
    #[error("ext data attribute for key {key:?} (subkey {subkey:?}) appears more than once")]
    Duplicate { key: String, subkey: Option<String> },
}

fn is_reserved(c: char) -> bool {
    matches!(c, ';' | '$' | '%')
}

/// Escapes a key so it is a valid attribute name fragment.
///
/// `;`, `$` and `%` always become `--` followed by four lowercase hex digits.
/// A `-` stays raw only when it is bounded on both sides by an ASCII
/// alphanumeric or by the edge of the key; otherwise it becomes `--002d`.
/// A raw `-` is therefore never next to another `-`, so `--` only ever starts
/// an escape.
pub fn encode_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        let escape = if c == '-' {
            let left_ok = i == 0 || chars[i - 1].is_ascii_alphanumeric();
            let right_ok = chars.get(i + 1).map_or(true, |n| n.is_ascii_alphanumeric());
            !(left_ok && right_ok)
        } else {
            is_reserved(c)
        };
        if escape {
            out.push_str(ESCAPE_LEAD);
            out.push_str(&format!("{:04x}", c as u32));
        } else {
            out.push(c);
        }
    }
    out
}

pub fn decode_key(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len());
    let mut rest = encoded;
    while !rest.is_empty() {
        if let Some(c) = rest.strip_prefix(ESCAPE_LEAD).and_then(escaped_char) {
            out.push(c);
            rest = &rest[ESCAPE_LEAD.len() + 4..];
            continue;
        }
        let mut it = rest.chars();
        if let Some(c) = it.next() {
            out.push(c);
        }
        rest = it.as_str();
    }
    out
}

fn escaped_char(after_lead: &str) -> Option<char> {
    let hex = after_lead.get(..4)?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

pub fn attribute_name(key: &str, subkey: Option<&str>) -> String {
    let mut name = format!("{EXT_DATA_ATTRIBUTE_PREFIX}{}", encode_key(key));
    if let Some(sub) = subkey {
        name.push(SUBTYPE_SEPARATOR);
        name.push_str(&encode_key(sub));
    }
    name
}

/// Splits an attribute name into its decoded key and optional decoded subkey.
/// Returns `None` for attributes outside the ext-data namespace.
pub fn parse_attribute_name(name: &str) -> Option<(String, Option<String>)> {
    let prefix = name.get(..EXT_DATA_ATTRIBUTE_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(EXT_DATA_ATTRIBUTE_PREFIX) {
        return None;
    }
    let body = &name[EXT_DATA_ATTRIBUTE_PREFIX.len()..];
    Some(match body.split_once(SUBTYPE_SEPARATOR) {
        Some((key, sub)) => (decode_key(key), Some(decode_key(sub))),
        None => (decode_key(body), None),
    })
}

pub fn encode_ext_data(ext: &ExtData) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    for (key, value) in ext.iter() {
        match value.to_stored() {
            StoredExtDataValue::Scalar(v) => attrs.push((attribute_name(key, None), v)),
            StoredExtDataValue::Nested(map) => {
                for (sub, v) in map {
                    attrs.push((attribute_name(key, Some(&sub)), v));
                }
            }
        }
    }
    attrs
}

/// Rebuilds a bag from stored attributes. Fails for the whole set when one
/// key is both scalar and nested, or when an attribute repeats.
pub fn decode_ext_data<N, V>(attrs: &[(N, V)]) -> Result<ExtData, ExtDataDecodeConflict>
where
    N: AsRef<str>,
    V: AsRef<str>,
{
    let mut grouped: BTreeMap<String, StoredExtDataValue> = BTreeMap::new();
    for (name, value) in attrs {
        let Some((key, subkey)) = parse_attribute_name(name.as_ref()) else {
            continue;
        };
        let value = value.as_ref().to_string();
        match (grouped.entry(key), subkey) {
            (Entry::Vacant(slot), None) => {
                slot.insert(StoredExtDataValue::Scalar(value));
            }
            (Entry::Vacant(slot), Some(sub)) => {
                slot.insert(StoredExtDataValue::Nested(BTreeMap::from([(sub, value)])));
            }
            (Entry::Occupied(slot), None) => {
                return Err(match slot.get() {
                    StoredExtDataValue::Scalar(_) => ExtDataDecodeConflict::Duplicate {
                        key: slot.key().clone(),
                        subkey: None,
                    },
                    StoredExtDataValue::Nested(_) => ExtDataDecodeConflict::ScalarAndNested {
                        key: slot.key().clone(),
                    },
                });
            }
            (Entry::Occupied(mut slot), Some(sub)) => {
                let key = slot.key().clone();
                match slot.get_mut() {
                    StoredExtDataValue::Scalar(_) => {
                        return Err(ExtDataDecodeConflict::ScalarAndNested { key });
                    }
                    StoredExtDataValue::Nested(map) => {
                        if map.contains_key(&sub) {
                            return Err(ExtDataDecodeConflict::Duplicate {
                                key,
                                subkey: Some(sub),
                            });
                        }
                        map.insert(sub, value);
                    }
                }
            }
        }
    }

    let mut ext = ExtData::new();
    for (key, value) in grouped {
        ext.insert_decoded(key, value.into());
    }
    Ok(ext)
}
