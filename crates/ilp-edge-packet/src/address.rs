use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Maximum length of an ILP address per RFC-0015.
pub const MAX_ADDRESS_LENGTH: usize = 1023;

const ALLOCATION_SCHEMES: &[&str] = &[
    "g", "private", "example", "peer", "self", "test", "test1", "test2", "test3", "local",
];

quick_error::quick_error! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum AddressError {
        Empty {
            display("ILP address must not be empty")
        }
        TooLong(len: usize) {
            display("ILP address length {} exceeds maximum of {}", len, MAX_ADDRESS_LENGTH)
        }
        TooFewSegments {
            display("ILP address must have at least two segments")
        }
        InvalidScheme(scheme: String) {
            display("ILP address does not start with a known allocation scheme: {}", scheme)
        }
        EmptySegment {
            display("ILP address segment must not be empty")
        }
        InvalidSegment(segment: String) {
            display("ILP address segment contains invalid characters: {}", segment)
        }
    }
}

/// A validated Interledger address, e.g. `g.connector.peer1`.
///
/// Grammar per RFC-0015: an allocation scheme, followed by one or more
/// dot-separated segments, each matching `[A-Za-z0-9_~-]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.0.split('.')
    }

    pub fn scheme(&self) -> &str {
        self.segments().next().unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a new address with `suffix` appended as an additional segment.
    pub fn with_suffix(&self, suffix: &str) -> Result<Address, AddressError> {
        let combined = format!("{}.{}", self.0, suffix);
        Address::from_str(&combined)
    }
}

fn validate(value: &str) -> Result<(), AddressError> {
    if value.is_empty() {
        return Err(AddressError::Empty);
    }
    if value.len() > MAX_ADDRESS_LENGTH {
        return Err(AddressError::TooLong(value.len()));
    }
    let segments: Vec<&str> = value.split('.').collect();
    if segments.len() < 2 {
        return Err(AddressError::TooFewSegments);
    }
    if !ALLOCATION_SCHEMES.contains(&segments[0]) {
        return Err(AddressError::InvalidScheme(segments[0].to_string()));
    }
    for segment in &segments {
        if segment.is_empty() {
            return Err(AddressError::EmptySegment);
        }
        if !segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'~' || b == b'-')
        {
            return Err(AddressError::InvalidSegment((*segment).to_string()));
        }
    }
    Ok(())
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        validate(value)?;
        Ok(Address(value.to_string()))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate(&value)?;
        Ok(Address(value))
    }
}

impl From<Address> for String {
    fn from(address: Address) -> String {
        address.0
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_addresses() {
        assert!(Address::from_str("g.connector.peer1").is_ok());
        assert!(Address::from_str("example.destination").is_ok());
        assert!(Address::from_str("test.foo_bar-baz~1").is_ok());
    }

    #[test]
    fn rejects_single_segment() {
        assert_eq!(
            Address::from_str("g"),
            Err(AddressError::TooFewSegments)
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            Address::from_str("foo.bar"),
            Err(AddressError::InvalidScheme(_))
        ));
    }

    #[test]
    fn rejects_empty_segment() {
        assert_eq!(
            Address::from_str("g..bar"),
            Err(AddressError::EmptySegment)
        );
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(matches!(
            Address::from_str("g.has space"),
            Err(AddressError::InvalidSegment(_))
        ));
    }

    #[test]
    fn with_suffix_appends_segment() {
        let base = Address::from_str("g.connector").unwrap();
        let child = base.with_suffix("peer1").unwrap();
        assert_eq!(child.as_str(), "g.connector.peer1");
    }
}
