use serde::Serialize;
use std::collections::HashMap;

/// How often each nameserver hostname has been assigned during one
/// run.  Diagnostic only: the match test never looks at it.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct NameserverFrequencyTable {
    counts: HashMap<String, usize>,
}

impl NameserverFrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<'a>(&mut self, hostnames: impl IntoIterator<Item = &'a str>) {
        for hostname in hostnames {
            *self.counts.entry(hostname.to_string()).or_insert(0) += 1;
        }
    }

    pub fn count(&self, hostname: &str) -> usize {
        self.counts.get(hostname).copied().unwrap_or(0)
    }

    /// Number of distinct hostnames seen.
    pub fn unique(&self) -> usize {
        self.counts.len()
    }

    /// Most frequent first, ties broken by name.
    pub fn iter(&self) -> Vec<(&str, usize)> {
        let mut out = self
            .counts
            .iter()
            .map(|(hostname, count)| (hostname.as_str(), *count))
            .collect::<Vec<_>>();
        out.sort_by(|(n1, c1), (n2, c2)| c2.cmp(c1).then_with(|| n1.cmp(n2)));
        out
    }
}
