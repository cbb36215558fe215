use clap::ValueEnum;
use serde::Deserialize;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber: stderr in the chosen format, plus
/// an append-only plain text copy in `log_file` if given.  The filter
/// comes from `RUST_LOG`, defaulting to `info`.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(io::stderr)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(io::stderr))),
    };

    let file = match log_file {
        Some(path) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(
                    OpenOptions::new().create(true).append(true).open(path)?,
                )),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(file)
        .init();

    Ok(())
}
