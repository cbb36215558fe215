pub mod pool;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use dns_types::protocol::types::{DomainName, RecordType};

pub use self::pool::SimulatedPool;

/// TTL of records published into an acquired zone.
pub const DEFAULT_RECORD_TTL: u32 = 300;

/// A DNS hosting provider which assigns each new zone a handful of
/// nameservers from a shared pool.
#[async_trait]
pub trait ZoneProvider: Send + Sync {
    /// Create a zone for `apex`.  The provider picks its nameservers.
    async fn create_zone(&self, apex: &DomainName, tags: &[Tag]) -> Result<Zone, ProviderError>;

    /// Delete a zone.  Deleting a zone which does not exist succeeds.
    async fn delete_zone(&self, id: &str) -> Result<(), ProviderError>;

    /// Create or replace a record set in a zone.
    async fn upsert_record(&self, id: &str, change: &RecordChange) -> Result<(), ProviderError>;

    async fn update_zone_comment(&self, id: &str, comment: &str) -> Result<(), ProviderError>;
}

/// A zone as the provider created it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Zone {
    pub id: String,
    pub apex: DomainName,
    pub assigned_nameservers: Vec<String>,
}

/// A key/value tag attached to each created zone.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl FromStr for Tag {
    type Err = TagFromStr;

    /// Parse `key=value`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok(Tag {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => Err(TagFromStr::NoParse),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TagFromStr {
    NoParse,
}

impl fmt::Display for TagFromStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "expected key=value")
    }
}

impl std::error::Error for TagFromStr {}

/// A record to publish into a zone.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RecordChange {
    pub name: DomainName,
    pub rtype: RecordType,
    pub value: String,
    pub ttl: u32,
}

impl RecordChange {
    /// Record types a provider zone accepts.
    pub const SUPPORTED_TYPES: [RecordType; 10] = [
        RecordType::A,
        RecordType::AAAA,
        RecordType::CNAME,
        RecordType::MX,
        RecordType::NS,
        RecordType::PTR,
        RecordType::SOA,
        RecordType::SPF,
        RecordType::SRV,
        RecordType::TXT,
    ];

    pub fn new(name: DomainName, rtype: RecordType, value: String) -> Result<Self, ProviderError> {
        if !Self::SUPPORTED_TYPES.contains(&rtype) {
            return Err(ProviderError::InvalidRecord(format!(
                "unsupported record type {rtype}"
            )));
        }
        if value.is_empty() {
            return Err(ProviderError::InvalidRecord("empty record value".to_string()));
        }

        Ok(Self {
            name,
            rtype,
            value,
            ttl: DEFAULT_RECORD_TTL,
        })
    }
}

/// Errors from a `ZoneProvider`.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ProviderError {
    /// The zone does not exist.
    NotFound,
    /// The provider refused the request (quota, validation, auth).
    Rejected(String),
    /// The request did not get a response.
    Transport(String),
    InvalidRecord(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProviderError::NotFound => write!(f, "no such zone"),
            ProviderError::Rejected(reason) => write!(f, "rejected by provider: {reason}"),
            ProviderError::Transport(reason) => write!(f, "could not reach provider: {reason}"),
            ProviderError::InvalidRecord(reason) => write!(f, "invalid record: {reason}"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;

    use super::*;

    #[test]
    fn tag_from_str() {
        assert_eq!(
            Ok(Tag {
                key: "team".to_string(),
                value: "red=blue".to_string()
            }),
            "team=red=blue".parse()
        );
        assert_eq!(
            Ok(Tag {
                key: "empty".to_string(),
                value: String::new()
            }),
            "empty=".parse()
        );
        assert_eq!(Err(TagFromStr::NoParse), "novalue".parse::<Tag>());
        assert_eq!(Err(TagFromStr::NoParse), "=x".parse::<Tag>());
    }

    #[test]
    fn record_change_accepts_supported_types() {
        for rtype in RecordChange::SUPPORTED_TYPES {
            let change = RecordChange::new(domain("www.example.com."), rtype, "x".to_string());
            assert_eq!(Ok(DEFAULT_RECORD_TTL), change.map(|c| c.ttl));
        }
    }

    #[test]
    fn record_change_rejects_other_types() {
        assert!(matches!(
            RecordChange::new(domain("example.com."), RecordType::from(257), "x".to_string()),
            Err(ProviderError::InvalidRecord(_))
        ));
    }

    #[test]
    fn record_change_rejects_empty_value() {
        assert!(matches!(
            RecordChange::new(domain("example.com."), RecordType::TXT, String::new()),
            Err(ProviderError::InvalidRecord(_))
        ));
    }
}
