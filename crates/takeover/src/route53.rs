use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_route53::error::{BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_route53::operation::delete_hosted_zone::DeleteHostedZoneError;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, HostedZoneConfig, ResourceRecord, ResourceRecordSet,
    RrType, TagResourceType,
};
use aws_sdk_route53::Client;
use rand::Rng;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use dns_types::protocol::types::{DomainName, RecordType};
use ns_takeover::provider::{ProviderError, RecordChange, Tag, Zone, ZoneProvider};

/// Comment on every zone created.
pub const CREATE_COMMENT: &str = "Subdomain takeover attempt";

/// Hosted zones in Route 53, using credentials and region from the
/// environment.
#[derive(Debug, Clone)]
pub struct Route53Provider {
    client: Client,
}

impl Route53Provider {
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
        }
    }

    async fn tag_zone(&self, id: &str, tags: &[Tag]) -> Result<(), ProviderError> {
        let mut request = self
            .client
            .change_tags_for_resource()
            .resource_type(TagResourceType::Hostedzone)
            .resource_id(bare_zone_id(id));
        for tag in tags {
            request = request.add_tags(
                aws_sdk_route53::types::Tag::builder()
                    .key(&tag.key)
                    .value(&tag.value)
                    .build(),
            );
        }

        request.send().await.map_err(provider_error)?;
        Ok(())
    }
}

#[async_trait]
impl ZoneProvider for Route53Provider {
    async fn create_zone(&self, apex: &DomainName, tags: &[Tag]) -> Result<Zone, ProviderError> {
        let output = self
            .client
            .create_hosted_zone()
            .name(apex.to_hostname())
            .caller_reference(caller_reference())
            .hosted_zone_config(HostedZoneConfig::builder().comment(CREATE_COMMENT).build())
            .send()
            .await
            .map_err(provider_error)?;

        let id = output
            .hosted_zone()
            .map(|zone| zone.id().to_string())
            .ok_or_else(|| ProviderError::Rejected("response has no hosted zone".to_string()))?;
        let assigned_nameservers = output
            .delegation_set()
            .map(|set| set.name_servers().to_vec())
            .unwrap_or_default();

        if !tags.is_empty() {
            if let Err(error) = self.tag_zone(&id, tags).await {
                // don't leave an untracked zone behind
                if let Err(delete_error) = self.delete_zone(&id).await {
                    tracing::warn!(zone_id = %id, error = %delete_error, "could not delete untaggable zone");
                }
                return Err(error);
            }
        }

        Ok(Zone {
            id,
            apex: apex.clone(),
            assigned_nameservers,
        })
    }

    async fn delete_zone(&self, id: &str) -> Result<(), ProviderError> {
        match self.client.delete_hosted_zone().id(bare_zone_id(id)).send().await {
            Ok(_) => Ok(()),
            Err(error)
                if error
                    .as_service_error()
                    .is_some_and(DeleteHostedZoneError::is_no_such_hosted_zone) =>
            {
                tracing::debug!(zone_id = %id, "zone already gone");
                Ok(())
            }
            Err(error) => Err(provider_error(error)),
        }
    }

    async fn upsert_record(&self, id: &str, change: &RecordChange) -> Result<(), ProviderError> {
        let record_set = ResourceRecordSet::builder()
            .name(change.name.to_hostname())
            .r#type(rr_type(change.rtype)?)
            .ttl(i64::from(change.ttl))
            .resource_records(
                ResourceRecord::builder()
                    .value(&change.value)
                    .build()
                    .map_err(invalid_record)?,
            )
            .build()
            .map_err(invalid_record)?;

        let batch = ChangeBatch::builder()
            .changes(
                Change::builder()
                    .action(ChangeAction::Upsert)
                    .resource_record_set(record_set)
                    .build()
                    .map_err(invalid_record)?,
            )
            .build()
            .map_err(invalid_record)?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(bare_zone_id(id))
            .change_batch(batch)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(())
    }

    async fn update_zone_comment(&self, id: &str, comment: &str) -> Result<(), ProviderError> {
        self.client
            .update_hosted_zone_comment()
            .id(bare_zone_id(id))
            .comment(comment)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(())
    }
}

/// Route 53 returns ids as `/hostedzone/Z...` but some calls want
/// only the `Z...` part.
fn bare_zone_id(id: &str) -> &str {
    id.strip_prefix("/hostedzone/").unwrap_or(id)
}

/// Must be unique per `CreateHostedZone` request.
fn caller_reference() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("takeover-{millis}-{:08x}", rand::thread_rng().gen::<u32>())
}

fn rr_type(rtype: RecordType) -> Result<RrType, ProviderError> {
    match rtype {
        RecordType::A => Ok(RrType::A),
        RecordType::AAAA => Ok(RrType::Aaaa),
        RecordType::CNAME => Ok(RrType::Cname),
        RecordType::MX => Ok(RrType::Mx),
        RecordType::NS => Ok(RrType::Ns),
        RecordType::PTR => Ok(RrType::Ptr),
        RecordType::SOA => Ok(RrType::Soa),
        RecordType::SPF => Ok(RrType::Spf),
        RecordType::SRV => Ok(RrType::Srv),
        RecordType::TXT => Ok(RrType::Txt),
        RecordType::Unknown(_) => Err(ProviderError::InvalidRecord(format!(
            "unsupported record type {rtype}"
        ))),
    }
}

fn invalid_record(error: BuildError) -> ProviderError {
    ProviderError::InvalidRecord(error.to_string())
}

/// A service error is the provider saying no; anything else (no
/// credentials, network failure, timeout) is a transport error.
fn provider_error<E, R>(error: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: fmt::Debug,
{
    match error.as_service_error() {
        Some(service) => ProviderError::Rejected(format!(
            "{}: {}",
            service.code().unwrap_or("unknown"),
            service.message().unwrap_or("no message")
        )),
        None => ProviderError::Transport(DisplayErrorContext(&error).to_string()),
    }
}
