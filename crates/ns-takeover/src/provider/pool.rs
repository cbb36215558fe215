use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tokio::sync::Mutex;

use dns_types::protocol::types::DomainName;

use super::{ProviderError, RecordChange, Tag, Zone, ZoneProvider};

/// How many nameservers Route 53 assigns to a new hosted zone.
pub const NAMESERVERS_PER_ZONE: usize = 4;

/// An in-memory provider: every new zone gets a random selection of
/// nameservers from a fixed pool.  Nothing leaves the process, so it
/// is safe for dry runs.
#[derive(Debug)]
pub struct SimulatedPool {
    pool: Vec<String>,
    per_zone: usize,
    state: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    next_id: u64,
    zones: HashMap<String, SimulatedZone>,
}

/// Everything the simulation knows about one live zone.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SimulatedZone {
    pub zone: Zone,
    pub tags: Vec<Tag>,
    pub comment: String,
    pub records: Vec<RecordChange>,
}

impl SimulatedPool {
    pub fn new(pool: Vec<String>) -> Self {
        Self {
            pool,
            per_zone: NAMESERVERS_PER_ZONE,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// A pool of `size` hostnames named the way Route 53 names its
    /// nameservers: `ns-N.awsdns-NN.{com,net,org,co.uk}`.
    pub fn route53_like(size: usize) -> Self {
        const TLDS: [&str; 4] = ["com", "net", "org", "co.uk"];

        let pool = (0..size)
            .map(|n| format!("ns-{n}.awsdns-{:02}.{}", (n / 64) % 64, TLDS[n % TLDS.len()]))
            .collect();
        Self::new(pool)
    }

    pub fn pool(&self) -> &[String] {
        &self.pool
    }

    pub async fn live_zones(&self) -> Vec<SimulatedZone> {
        let state = self.state.lock().await;
        let mut zones = state.zones.values().cloned().collect::<Vec<_>>();
        zones.sort_by(|a, b| a.zone.id.cmp(&b.zone.id));
        zones
    }

    pub async fn zone(&self, id: &str) -> Option<SimulatedZone> {
        self.state.lock().await.zones.get(id).cloned()
    }

    /// Total zones ever created.
    pub async fn created(&self) -> u64 {
        self.state.lock().await.next_id
    }
}

#[async_trait]
impl ZoneProvider for SimulatedPool {
    async fn create_zone(&self, apex: &DomainName, tags: &[Tag]) -> Result<Zone, ProviderError> {
        if self.pool.is_empty() {
            return Err(ProviderError::Rejected("nameserver pool is empty".to_string()));
        }

        let assigned_nameservers = self
            .pool
            .choose_multiple(&mut rand::thread_rng(), self.per_zone)
            .cloned()
            .collect::<Vec<_>>();

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let zone = Zone {
            id: format!("SIMULATED{:08}", state.next_id),
            apex: apex.clone(),
            assigned_nameservers,
        };
        state.zones.insert(
            zone.id.clone(),
            SimulatedZone {
                zone: zone.clone(),
                tags: tags.to_vec(),
                comment: String::new(),
                records: Vec::new(),
            },
        );

        Ok(zone)
    }

    async fn delete_zone(&self, id: &str) -> Result<(), ProviderError> {
        self.state.lock().await.zones.remove(id);
        Ok(())
    }

    async fn upsert_record(&self, id: &str, change: &RecordChange) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let zone = state.zones.get_mut(id).ok_or(ProviderError::NotFound)?;

        if !change.name.is_subdomain_of(&zone.zone.apex) {
            return Err(ProviderError::InvalidRecord(format!(
                "{} is not in zone {}",
                change.name, zone.zone.apex
            )));
        }

        zone.records
            .retain(|rr| !(rr.name == change.name && rr.rtype == change.rtype));
        zone.records.push(change.clone());
        Ok(())
    }

    async fn update_zone_comment(&self, id: &str, comment: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let zone = state.zones.get_mut(id).ok_or(ProviderError::NotFound)?;
        zone.comment = comment.to_string();
        Ok(())
    }
}
