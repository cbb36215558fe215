use clap::Parser;
use std::net::Ipv4Addr;
use std::process;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use dns_types::protocol::types::DomainName;
use ns_takeover::cancel::CancellationToken;
use ns_takeover::candidates::{extract_candidates, ProviderConvention};
use ns_takeover::delegation::{
    DelegationChain, DelegationWalker, WalkerConfig, DEFAULT_MAX_DEPTH, DEFAULT_ROOT_HINT,
};
use ns_takeover::net::{SystemResolver, UdpTransport};

fn print_chain(chain: &DelegationChain) {
    println!(";; DELEGATION CHAIN");
    for hop in chain.hops() {
        for (i, ns) in hop.nameservers().iter().enumerate() {
            let hostname = ns
                .hostname
                .as_ref()
                .map_or_else(|| "(root hint)".to_string(), DomainName::to_dotted_string);
            if i == 0 {
                println!("{}\t{}\t{}", hop.apex, ns.address, hostname);
            } else {
                println!("\t{}\t{}", ns.address, hostname);
            }
        }
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// Print the live delegation chain of a domain, and which of its
/// nameservers belong to the Route 53 pool
///
/// Only the first nameserver at each level is queried.
struct Args {
    /// Domain name to walk to
    #[clap(value_parser)]
    domain: DomainName,

    /// Maximum number of queries to send
    #[clap(long, default_value_t = DEFAULT_MAX_DEPTH, value_parser)]
    max_depth: usize,

    /// Root nameserver to start from
    #[clap(long, default_value_t = DEFAULT_ROOT_HINT, value_parser)]
    root: Ipv4Addr,

    /// Seconds to wait for each response
    #[clap(long, default_value_t = 3, value_parser)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let walker = DelegationWalker::new(
        UdpTransport::new(),
        SystemResolver,
        WalkerConfig {
            root_hint: args.root,
            query_timeout: Duration::from_secs(args.timeout_secs),
            max_depth: args.max_depth,
        },
    );
    let chain = walker.walk(&args.domain, &cancel).await;

    print_chain(&chain);

    let candidates = extract_candidates(&ProviderConvention::ROUTE53, &chain);
    println!("\n;; ROUTE 53 CANDIDATES");
    if candidates.is_empty() {
        println!("; none");
        process::exit(2);
    }
    for candidate in candidates {
        println!("{candidate}");
    }
}
