#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use num_bigint::BigUint;

use crate::ContractViolation;

const HEX_PREFIX: &str = "0x";

/// Identifier of a request. Wraps an arbitrary-precision non-negative integer;
/// equality, ordering and hashing are numeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(BigUint);

impl RequestId {
    pub fn new(value: BigUint) -> Self {
        Self(value)
    }

    /// Parses the decimal form, or the hexadecimal form when prefixed with `0x`.
    pub fn parse(input: &str) -> Result<Self, ContractViolation> {
        let (digits, radix) = match input.strip_prefix(HEX_PREFIX) {
            Some(rest) => (rest, 16),
            None => (input, 10),
        };
        let well_formed = !digits.is_empty()
            && digits.chars().all(|c| match radix {
                16 => c.is_ascii_hexdigit(),
                _ => c.is_ascii_digit(),
            });
        if !well_formed {
            return Err(ContractViolation::MalformedIdentifier {
                input: input.to_string(),
            });
        }
        BigUint::parse_bytes(digits.as_bytes(), radix)
            .map(Self)
            .ok_or_else(|| ContractViolation::MalformedIdentifier {
                input: input.to_string(),
            })
    }

    pub fn value(&self) -> &BigUint {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        format!("{HEX_PREFIX}{}", self.0.to_str_radix(16))
    }

    pub fn next(&self) -> Self {
        Self(self.0.clone() + 1u32)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_str_radix(10))
    }
}

impl FromStr for RequestId {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<u64> for RequestId {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl From<BigUint> for RequestId {
    fn from(v: BigUint) -> Self {
        Self(v)
    }
}
