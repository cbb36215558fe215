use rand::Rng;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::Instrument;

use dns_types::protocol::types::*;

use crate::cancel::CancellationToken;
use crate::net::{ForwardResolver, Transport};

/// a.root-servers.net
pub const DEFAULT_ROOT_HINT: Ipv4Addr = Ipv4Addr::new(198, 41, 0, 4);

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

pub const DEFAULT_MAX_DEPTH: usize = 40;

/// One nameserver named in a referral, with the address it resolved
/// to.  The root hint has no hostname.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DelegatedNameserver {
    pub hostname: Option<DomainName>,
    pub address: Ipv4Addr,
}

/// One level of the delegation chain: a zone apex and the nameservers
/// it was delegated to.
///
/// Every resolved sibling is kept, but only the first is ever
/// queried.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DelegationHop {
    pub apex: DomainName,
    // INVARIANT: non-empty
    nameservers: Vec<DelegatedNameserver>,
}

impl DelegationHop {
    /// Returns `None` if there are no nameservers.
    pub fn new(apex: DomainName, nameservers: Vec<DelegatedNameserver>) -> Option<Self> {
        if nameservers.is_empty() {
            None
        } else {
            Some(Self { apex, nameservers })
        }
    }

    pub fn root_hint(address: Ipv4Addr) -> Self {
        Self {
            apex: DomainName::root_domain(),
            nameservers: vec![DelegatedNameserver {
                hostname: None,
                address,
            }],
        }
    }

    /// The address the next query at this level goes to.
    pub fn nameserver_ip(&self) -> Ipv4Addr {
        self.nameservers[0].address
    }

    pub fn nameserver_hostname(&self) -> Option<&DomainName> {
        self.nameservers[0].hostname.as_ref()
    }

    pub fn nameservers(&self) -> &[DelegatedNameserver] {
        &self.nameservers
    }
}

/// The chain of delegations from the root hint down to the deepest
/// referral that could be followed.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DelegationChain {
    // INVARIANT: non-empty, and the first hop is the root hint
    hops: Vec<DelegationHop>,
}

impl DelegationChain {
    pub fn new(root_hint: Ipv4Addr) -> Self {
        Self {
            hops: vec![DelegationHop::root_hint(root_hint)],
        }
    }

    pub fn hops(&self) -> &[DelegationHop] {
        &self.hops
    }

    #[allow(clippy::missing_panics_doc)]
    pub fn deepest(&self) -> &DelegationHop {
        // safe because of the non-empty invariant
        self.hops.last().unwrap()
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Always false: a chain holds at least the root hint.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Record a new referral.  The walker only pushes hops whose apex
    /// is strictly below the current deepest apex.
    pub fn push(&mut self, hop: DelegationHop) {
        self.hops.push(hop);
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WalkerConfig {
    pub root_hint: Ipv4Addr,
    pub query_timeout: Duration,
    pub max_depth: usize,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            root_hint: DEFAULT_ROOT_HINT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Follows referrals from the root down, one non-recursive `NS` query
/// at a time.
pub struct DelegationWalker<T, R> {
    transport: T,
    resolver: R,
    config: WalkerConfig,
}

impl<T: Transport, R: ForwardResolver> DelegationWalker<T, R> {
    pub fn new(transport: T, resolver: R, config: WalkerConfig) -> Self {
        Self {
            transport,
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Walk with the configured depth limit.
    pub async fn walk(&self, domain: &DomainName, cancel: &CancellationToken) -> DelegationChain {
        self.resolve_delegation_chain(domain, self.config.max_depth, cancel)
            .await
    }

    /// Build the delegation chain for `domain`, issuing at most
    /// `max_depth` queries.
    ///
    /// This never fails: a timeout, a transport error, a non-`NOERROR`
    /// response, or a response with no `NS` records in its authority
    /// section which lead closer to `domain` all end the walk, and the
    /// chain built so far is returned.  Upward, sideways, and
    /// self-referrals count as no referral.  A referral none of whose
    /// nameservers resolve is skipped, and the same nameserver is asked
    /// again.
    ///
    /// There is no check that the walk reached `domain` itself.
    pub async fn resolve_delegation_chain(
        &self,
        domain: &DomainName,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> DelegationChain {
        self.resolve_delegation_chain_inner(domain, max_depth, cancel)
            .instrument(tracing::error_span!("resolve_delegation_chain", %domain))
            .await
    }

    async fn resolve_delegation_chain_inner(
        &self,
        domain: &DomainName,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> DelegationChain {
        let mut chain = DelegationChain::new(self.config.root_hint);
        let question = Question {
            name: domain.clone(),
            qtype: QueryType::Record(RecordType::NS),
            qclass: QueryClass::Record(RecordClass::IN),
        };

        for depth in 0..max_depth {
            if cancel.is_cancelled() {
                tracing::debug!(%depth, "cancelled");
                break;
            }

            let address = chain.deepest().nameserver_ip();
            let request = Message::from_question(rand::thread_rng().gen(), question.clone());
            let response = match self
                .transport
                .query(&request, address, self.config.query_timeout)
                .instrument(tracing::error_span!("query_nameserver", %address, %depth))
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(%address, %error, "query failed - chain ends");
                    break;
                }
            };

            if response.header.rcode != Rcode::NoError {
                tracing::debug!(%address, rcode = %response.header.rcode, "error response - chain ends");
                break;
            }

            let referral = referral_nameservers(&response, domain, &chain.deepest().apex);
            if referral.is_empty() {
                tracing::debug!(%address, "no better referral - chain ends");
                break;
            }

            match self.resolve_referral(referral).await {
                Some(hop) => {
                    tracing::debug!(
                        apex = %hop.apex,
                        address = %hop.nameserver_ip(),
                        nameservers = %hop.nameservers.len(),
                        "got delegation"
                    );
                    chain.push(hop);
                }
                None => tracing::debug!(%address, "no nameserver in referral resolved"),
            }
        }

        chain
    }

    /// Forward-resolve every nameserver in a referral.  Ones which do
    /// not resolve are dropped.  The apex is the owner of the first
    /// `NS` record which resolved.
    async fn resolve_referral(
        &self,
        referral: Vec<(&DomainName, &DomainName)>,
    ) -> Option<DelegationHop> {
        let mut apex = None;
        let mut nameservers = Vec::with_capacity(referral.len());

        for (owner, hostname) in referral {
            match self.resolver.resolve_a(hostname).await {
                Ok(address) => {
                    tracing::trace!(%hostname, %address, "got candidate nameserver");
                    apex.get_or_insert_with(|| owner.clone());
                    nameservers.push(DelegatedNameserver {
                        hostname: Some(hostname.clone()),
                        address,
                    });
                }
                Err(error) => {
                    tracing::trace!(%hostname, %error, "dropping unresolvable nameserver");
                }
            }
        }

        DelegationHop::new(apex?, nameservers)
    }
}

/// `(owner, nsdname)` for the `NS` records in the authority section
/// which are a better match for `domain` than `current_apex`: the owner
/// must be an ancestor of (or equal to) `domain` and strictly below
/// `current_apex`.  If several owners qualify, only the records of the
/// deepest one are kept.
fn referral_nameservers<'a>(
    response: &'a Message,
    domain: &DomainName,
    current_apex: &DomainName,
) -> Vec<(&'a DomainName, &'a DomainName)> {
    let mut best_len = current_apex.labels.len();
    let mut nameservers = Vec::new();

    for rr in &response.authority {
        if let RecordTypeWithData::NS { nsdname } = &rr.rtype_with_data {
            if !domain.is_subdomain_of(&rr.name) {
                continue;
            }
            let len = rr.name.labels.len();
            if len > best_len {
                best_len = len;
                nameservers.clear();
            }
            if len == best_len && len > current_apex.labels.len() {
                nameservers.push((&rr.name, nsdname));
            }
        }
    }

    nameservers
}
