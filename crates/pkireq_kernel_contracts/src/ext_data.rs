#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use num_bigint::BigInt;

use crate::common::validate_token;
use crate::ContractViolation;

pub const EXT_DATA_KEY_MAX_LEN: usize = 256;

// Well-known keys written by the queue and the stock policies.
pub const EXT_REJECT_REASON: &str = "rejectReason";
pub const EXT_CANCEL_REASON: &str = "cancelReason";
pub const EXT_PENDING_REASON: &str = "pendingReason";
pub const EXT_ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtDataValue {
    String(String),
    StringArray(Vec<String>),
    Integer(i64),
    BigInteger(BigInt),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, String>),
}

impl ExtDataValue {
    /// Flattened storage form: a scalar string, or a nested string map.
    pub fn to_stored(&self) -> StoredExtDataValue {
        match self {
            ExtDataValue::String(v) => StoredExtDataValue::Scalar(v.clone()),
            ExtDataValue::Integer(v) => StoredExtDataValue::Scalar(v.to_string()),
            ExtDataValue::BigInteger(v) => StoredExtDataValue::Scalar(v.to_string()),
            ExtDataValue::Bytes(v) => StoredExtDataValue::Scalar(STANDARD.encode(v)),
            ExtDataValue::StringArray(values) => StoredExtDataValue::Nested(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v.clone()))
                    .collect(),
            ),
            ExtDataValue::Map(map) => StoredExtDataValue::Nested(map.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredExtDataValue {
    Scalar(String),
    Nested(BTreeMap<String, String>),
}

impl From<StoredExtDataValue> for ExtDataValue {
    fn from(v: StoredExtDataValue) -> Self {
        match v {
            StoredExtDataValue::Scalar(s) => ExtDataValue::String(s),
            StoredExtDataValue::Nested(m) => ExtDataValue::Map(m),
        }
    }
}

/// Extensible attribute bag carried by every request.
///
/// Keys are case-sensitive. Typed getters accept both the typed variant and the
/// flattened form a value comes back as after a storage round trip, so an
/// integer set with [`ExtData::set_integer`] reads the same before and after
/// it was persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtData {
    entries: BTreeMap<String, ExtDataValue>,
}

impl ExtData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ExtDataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&ExtDataValue> {
        self.entries.get(key)
    }

    /// Case-insensitive lookup path. An exact match wins; otherwise the first
    /// key (in key order) equal ignoring ASCII case.
    pub fn get_ignore_case(&self, key: &str) -> Option<&ExtDataValue> {
        self.entries.get(key).or_else(|| {
            self.entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: ExtDataValue,
    ) -> Result<Option<ExtDataValue>, ContractViolation> {
        let key = key.into();
        validate_token("ext_data.key", &key, EXT_DATA_KEY_MAX_LEN)?;
        if let ExtDataValue::Map(map) = &value {
            for subkey in map.keys() {
                validate_token("ext_data.subkey", subkey, EXT_DATA_KEY_MAX_LEN)?;
            }
        }
        Ok(self.entries.insert(key, value))
    }

    // Stored names are preserved verbatim, even ones `set` would refuse.
    pub(crate) fn insert_decoded(&mut self, key: String, value: ExtDataValue) {
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<ExtDataValue> {
        self.entries.remove(key)
    }

    pub fn set_string(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::String(value.into())).map(|_| ())
    }

    pub fn set_integer(&mut self, key: impl Into<String>, value: i64) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::Integer(value)).map(|_| ())
    }

    pub fn set_big_integer(
        &mut self,
        key: impl Into<String>,
        value: BigInt,
    ) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::BigInteger(value)).map(|_| ())
    }

    pub fn set_bytes(&mut self, key: impl Into<String>, value: Vec<u8>) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::Bytes(value)).map(|_| ())
    }

    pub fn set_string_array(
        &mut self,
        key: impl Into<String>,
        values: Vec<String>,
    ) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::StringArray(values)).map(|_| ())
    }

    pub fn set_map(
        &mut self,
        key: impl Into<String>,
        map: BTreeMap<String, String>,
    ) -> Result<(), ContractViolation> {
        self.set(key, ExtDataValue::Map(map)).map(|_| ())
    }

    /// Inserts or replaces one subkey of a nested map, creating the map when the
    /// key is absent. Fails when the key currently holds a non-map value.
    pub fn set_map_entry(
        &mut self,
        key: impl Into<String>,
        subkey: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ContractViolation> {
        let key = key.into();
        let subkey = subkey.into();
        validate_token("ext_data.key", &key, EXT_DATA_KEY_MAX_LEN)?;
        validate_token("ext_data.subkey", &subkey, EXT_DATA_KEY_MAX_LEN)?;
        match self
            .entries
            .entry(key)
            .or_insert_with(|| ExtDataValue::Map(BTreeMap::new()))
        {
            ExtDataValue::Map(map) => {
                map.insert(subkey, value.into());
                Ok(())
            }
            _ => Err(ContractViolation::InvalidValue {
                field: "ext_data.key",
                reason: "key holds a scalar value, not a nested map",
            }),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            ExtDataValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            ExtDataValue::Integer(v) => Some(*v),
            ExtDataValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_big_integer(&self, key: &str) -> Option<BigInt> {
        match self.entries.get(key)? {
            ExtDataValue::BigInteger(v) => Some(v.clone()),
            ExtDataValue::Integer(v) => Some(BigInt::from(*v)),
            ExtDataValue::String(s) => BigInt::parse_bytes(s.as_bytes(), 10),
            _ => None,
        }
    }

    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key)? {
            ExtDataValue::Bytes(v) => Some(v.clone()),
            ExtDataValue::String(s) => STANDARD.decode(s).ok(),
            _ => None,
        }
    }

    /// A stored string array comes back as a nested map whose subkeys are
    /// exactly `"0".."n-1"`; any other map is not an array.
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        match self.entries.get(key)? {
            ExtDataValue::StringArray(v) => Some(v.clone()),
            ExtDataValue::Map(map) => (0..map.len())
                .map(|i| map.get(&i.to_string()).cloned())
                .collect(),
            _ => None,
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        match self.entries.get(key)? {
            ExtDataValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn get_map_entry(&self, key: &str, subkey: &str) -> Option<&str> {
        self.get_map(key)?.get(subkey).map(String::as_str)
    }
}
