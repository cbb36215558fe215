use config::{Config, ConfigError, File};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::Deserialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;

use dns_types::protocol::types::{DomainName, RecordType};
use ns_takeover::provider::Tag;

use crate::logging::LogFormat;

/// Everything which can be given in the settings file.  Command-line
/// flags take precedence.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Default)]
pub struct Settings {
    pub max_attempts: Option<usize>,
    pub delay_ms: Option<u64>,
    pub max_depth: Option<usize>,
    pub root_hint: Option<Ipv4Addr>,
    pub query_timeout_secs: Option<u64>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    pub record: Option<Record>,
    pub log_file: Option<PathBuf>,
    pub log_format: Option<LogFormat>,
}

/// A record to publish once a zone has been acquired.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub rtype: Parsed<RecordType>,
    pub name: Parsed<DomainName>,
    pub value: String,
}

/// A value deserialised from a string through its `FromStr` impl.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Parsed<T>(pub T);

impl<'de, T> Deserialize<'de> for Parsed<T>
where
    T: FromStr,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ParsedVisitor<T>(std::marker::PhantomData<T>);

        impl<'de, T: FromStr> Visitor<'de> for ParsedVisitor<T> {
            type Value = Parsed<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<E>(self, v: &str) -> Result<Parsed<T>, E>
            where
                E: de::Error,
            {
                match T::from_str(v) {
                    Ok(value) => Ok(Parsed(value)),
                    Err(_) => Err(de::Error::invalid_value(
                        Unexpected::Str(v),
                        &"a valid domain name or record type",
                    )),
                }
            }
        }

        deserializer.deserialize_str(ParsedVisitor(std::marker::PhantomData))
    }
}

impl Settings {
    pub fn new(filename: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(filename))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use config::FileFormat;
    use dns_types::protocol::types::test_util::*;

    use super::*;

    fn from_yaml(yaml: &str) -> Result<Settings, ConfigError> {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }

    #[test]
    fn empty_file_is_default() {
        assert_eq!(Ok(Settings::default()), from_yaml("{}").map_err(|e| e.to_string()));
    }

    #[test]
    fn full_file() {
        let settings = from_yaml(
            r#"
max_attempts: 50
delay_ms: 250
max_depth: 10
root_hint: 199.9.14.201
query_timeout_secs: 2
tags:
  - key: owner
    value: red-team
record:
  type: txt
  name: www.example.com
  value: '"claimed"'
log_file: /tmp/takeover.log
log_format: json
"#,
        )
        .unwrap();

        assert_eq!(Some(50), settings.max_attempts);
        assert_eq!(Some(250), settings.delay_ms);
        assert_eq!(Some(Ipv4Addr::new(199, 9, 14, 201)), settings.root_hint);
        assert_eq!(
            vec![Tag {
                key: "owner".to_string(),
                value: "red-team".to_string()
            }],
            settings.tags
        );
        assert_eq!(Some(LogFormat::Json), settings.log_format);

        let record = settings.record.unwrap();
        assert_eq!(RecordType::TXT, record.rtype.0);
        assert_eq!(domain("www.example.com."), record.name.0);
        assert_eq!("\"claimed\"", record.value);
    }

    #[test]
    fn bad_record_type_is_an_error() {
        assert!(from_yaml(
            r#"
record:
  type: BOGUS
  name: www.example.com
  value: x
"#
        )
        .is_err());
    }
}
