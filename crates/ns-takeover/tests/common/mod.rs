#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use dns_types::protocol::types::test_util::*;
use dns_types::protocol::types::*;
use ns_takeover::cancel::CancellationToken;
use ns_takeover::net::{ForwardResolver, QueryError, ResolveError, Transport};
use ns_takeover::provider::{ProviderError, RecordChange, Tag, Zone, ZoneProvider};

/// How a mocked nameserver answers.  Addresses with no behaviour time
/// out.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Referral {
        apex: &'static str,
        nameservers: Vec<&'static str>,
    },
    Rcode(Rcode),
    /// An empty `NOERROR` response.
    Empty,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    behaviours: HashMap<Ipv4Addr, Behaviour>,
    queried: Mutex<Vec<Ipv4Addr>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, address: Ipv4Addr, behaviour: Behaviour) -> Self {
        self.behaviours.insert(address, behaviour);
        self
    }

    pub fn queried(&self) -> Vec<Ipv4Addr> {
        self.queried.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn query(
        &self,
        request: &Message,
        address: Ipv4Addr,
        _timeout: Duration,
    ) -> Result<Message, QueryError> {
        self.queried.lock().unwrap().push(address);

        assert!(!request.header.recursion_desired);
        assert_eq!(1, request.questions.len());
        let question = &request.questions[0];
        assert_eq!(QueryType::Record(RecordType::NS), question.qtype);

        match self.behaviours.get(&address) {
            None => Err(QueryError::Timeout),
            Some(Behaviour::Referral { apex, nameservers }) => Ok(referral(
                request.header.id,
                &question.name.to_dotted_string(),
                apex,
                nameservers,
            )),
            Some(Behaviour::Rcode(rcode)) => {
                let mut response = request.make_response();
                response.header.rcode = *rcode;
                Ok(response)
            }
            Some(Behaviour::Empty) => Ok(request.make_response()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockResolver {
    addresses: HashMap<DomainName, Ipv4Addr>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hostname: &str, address: Ipv4Addr) -> Self {
        self.addresses.insert(domain(hostname), address);
        self
    }
}

#[async_trait]
impl ForwardResolver for MockResolver {
    async fn resolve_a(&self, hostname: &DomainName) -> Result<Ipv4Addr, ResolveError> {
        self.addresses
            .get(hostname)
            .copied()
            .ok_or(ResolveError::NoAddress)
    }
}

/// Something a `ScriptedProvider` was asked to do.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    Create(String),
    Delete(String),
    Comment(String, String),
    Upsert(String),
}

/// A provider which hands out nameserver sets from a script, and
/// records every call made to it.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    state: Mutex<ScriptState>,
    /// Assigned once the script runs out.
    fallback: Vec<String>,
    /// Deleting these zones fails.
    undeletable: HashSet<String>,
    /// Deleting these zones reports that they do not exist.
    missing: HashSet<String>,
    /// Raised when this many zones have been created.
    cancel_after: Option<(usize, CancellationToken)>,
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<Result<Vec<String>, ProviderError>>,
    next_id: usize,
    live: HashSet<String>,
    max_live: usize,
    events: Vec<Event>,
    tags: Vec<Vec<Tag>>,
}

pub fn nameservers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

pub fn non_matching() -> Vec<String> {
    nameservers(&[
        "ns-1.awsdns-01.com",
        "ns-2.awsdns-02.net",
        "ns-3.awsdns-03.org",
        "ns-4.awsdns-04.co.uk",
    ])
}

impl ScriptedProvider {
    pub fn new(fallback: Vec<String>) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    pub fn then(self, outcome: Result<Vec<String>, ProviderError>) -> Self {
        self.state.lock().unwrap().script.push_back(outcome);
        self
    }

    pub fn undeletable(mut self, id: &str) -> Self {
        self.undeletable.insert(id.to_string());
        self
    }

    pub fn missing(mut self, id: &str) -> Self {
        self.missing.insert(id.to_string());
        self
    }

    pub fn cancel_after(mut self, creates: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((creates, token));
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn live(&self) -> HashSet<String> {
        self.state.lock().unwrap().live.clone()
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn tags(&self) -> Vec<Vec<Tag>> {
        self.state.lock().unwrap().tags.clone()
    }

    pub fn creates(&self) -> usize {
        self.count(|e| matches!(e, Event::Create(_)))
    }

    pub fn deletes(&self) -> usize {
        self.count(|e| matches!(e, Event::Delete(_)))
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

pub fn zone_id(n: usize) -> String {
    format!("Z{n:04}")
}

#[async_trait]
impl ZoneProvider for ScriptedProvider {
    async fn create_zone(&self, apex: &DomainName, tags: &[Tag]) -> Result<Zone, ProviderError> {
        let mut state = self.state.lock().unwrap();
        let assigned = state
            .script
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))?;

        state.next_id += 1;
        let id = zone_id(state.next_id);
        state.events.push(Event::Create(id.clone()));
        state.tags.push(tags.to_vec());
        state.live.insert(id.clone());
        state.max_live = state.max_live.max(state.live.len());

        if let Some((creates, token)) = &self.cancel_after {
            if state.next_id == *creates {
                token.cancel();
            }
        }

        Ok(Zone {
            id,
            apex: apex.clone(),
            assigned_nameservers: assigned,
        })
    }

    async fn delete_zone(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Event::Delete(id.to_string()));

        if self.undeletable.contains(id) {
            return Err(ProviderError::Transport("connection reset".to_string()));
        }
        state.live.remove(id);
        if self.missing.contains(id) {
            return Err(ProviderError::NotFound);
        }
        Ok(())
    }

    async fn upsert_record(&self, id: &str, _change: &RecordChange) -> Result<(), ProviderError> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(Event::Upsert(id.to_string()));
        Ok(())
    }

    async fn update_zone_comment(&self, id: &str, comment: &str) -> Result<(), ProviderError> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(Event::Comment(id.to_string(), comment.to_string()));
        Ok(())
    }
}
