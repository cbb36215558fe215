use crate::delegation::DelegationChain;

/// How a provider names the nameservers in its shared pool.  A
/// hostname belongs to the pool if it starts with `prefix` and
/// contains `marker`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProviderConvention {
    pub prefix: &'static str,
    pub marker: &'static str,
}

impl ProviderConvention {
    /// `ns-1234.awsdns-12.org` and friends.
    pub const ROUTE53: Self = Self {
        prefix: "ns-",
        marker: "awsdns",
    };

    pub fn matches(&self, hostname: &str) -> bool {
        hostname.starts_with(self.prefix) && hostname.contains(self.marker)
    }
}

/// Lowercase and drop a trailing root dot, so hostnames from DNS and
/// from a provider API compare equal.
pub fn normalise_hostname(hostname: &str) -> String {
    hostname
        .strip_suffix('.')
        .unwrap_or(hostname)
        .to_ascii_lowercase()
}

/// Keep the hostnames which belong to the provider's pool, normalised,
/// in first-seen order and without duplicates.
pub fn filter_hostnames<'a>(
    convention: &ProviderConvention,
    hostnames: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for hostname in hostnames {
        let hostname = normalise_hostname(hostname);
        if convention.matches(&hostname) && !out.contains(&hostname) {
            out.push(hostname);
        }
    }
    out
}

/// The pool nameservers the deepest level of the chain is delegated
/// to.
pub fn extract_candidates(convention: &ProviderConvention, chain: &DelegationChain) -> Vec<String> {
    let hostnames = chain
        .deepest()
        .nameservers()
        .iter()
        .filter_map(|ns| ns.hostname.as_ref())
        .map(dns_types::protocol::types::DomainName::to_dotted_string)
        .collect::<Vec<_>>();

    filter_hostnames(convention, hostnames.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use dns_types::protocol::types::test_util::*;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::delegation::*;

    #[test]
    fn route53_convention() {
        let aws = ProviderConvention::ROUTE53;
        assert!(aws.matches("ns-1536.awsdns-00.co.uk"));
        assert!(!aws.matches("a.gtld-servers.net"));
        assert!(!aws.matches("dns1.awsdns.example"));
        assert!(!aws.matches("ns-1.example.com"));
    }

    #[test]
    fn filter_trims_and_lowercases() {
        let out = filter_hostnames(
            &ProviderConvention::ROUTE53,
            ["NS-12.AWSDNS-01.COM.", "ns1.example.com.", "ns-99.awsdns-33.net"],
        );

        assert_eq!(vec!["ns-12.awsdns-01.com", "ns-99.awsdns-33.net"], out);
    }

    #[test]
    fn filter_drops_duplicates_keeping_order() {
        let out = filter_hostnames(
            &ProviderConvention::ROUTE53,
            ["ns-2.awsdns-02.org.", "ns-1.awsdns-01.com.", "ns-2.awsdns-02.org"],
        );

        assert_eq!(vec!["ns-2.awsdns-02.org", "ns-1.awsdns-01.com"], out);
    }

    #[test]
    fn filter_is_idempotent() {
        let aws = ProviderConvention::ROUTE53;
        let once = filter_hostnames(
            &aws,
            ["ns-7.awsdns-07.net.", "x.example.", "NS-8.awsdns-08.org", ""],
        );
        let twice = filter_hostnames(&aws, once.iter().map(String::as_str));

        assert_eq!(once, twice);
    }

    #[test]
    fn filter_empty_input() {
        assert!(filter_hostnames(&ProviderConvention::ROUTE53, Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn extract_uses_deepest_hop() {
        let mut chain = DelegationChain::new(DEFAULT_ROOT_HINT);
        chain.push(
            DelegationHop::new(
                domain("com."),
                vec![DelegatedNameserver {
                    hostname: Some(domain("ns-5.awsdns-05.com.")),
                    address: Ipv4Addr::new(192, 0, 2, 5),
                }],
            )
            .unwrap(),
        );
        chain.push(
            DelegationHop::new(
                domain("example.com."),
                vec![
                    DelegatedNameserver {
                        hostname: Some(domain("ns-100.awsdns-12.org.")),
                        address: Ipv4Addr::new(192, 0, 2, 100),
                    },
                    DelegatedNameserver {
                        hostname: Some(domain("ns1.example.net.")),
                        address: Ipv4Addr::new(192, 0, 2, 101),
                    },
                ],
            )
            .unwrap(),
        );

        assert_eq!(
            vec!["ns-100.awsdns-12.org"],
            extract_candidates(&ProviderConvention::ROUTE53, &chain)
        );
    }

    #[test]
    fn extract_root_only_chain_is_empty() {
        let chain = DelegationChain::new(DEFAULT_ROOT_HINT);

        assert!(extract_candidates(&ProviderConvention::ROUTE53, &chain).is_empty());
    }
}
