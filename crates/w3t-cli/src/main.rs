//! w3t NAT CLI
//!
//! Classifies the local NAT's mapping and filtering behavior against an
//! RFC 5780 capable STUN server.

mod config;
mod progress;
mod summary;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use w3t_nat::{NatDiscovery, TracingLogger};

use config::Config;
use progress::{ProbeProgress, spinner_visible};
use summary::Summary;

/// w3t-nat - NAT behavior discovery (RFC 5780)
#[derive(Parser)]
#[command(name = "w3t-nat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// STUN server with NAT discovery support (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Local bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Round-trip timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Test suites to run
    #[arg(long, value_enum, default_value_t = Suite::Both)]
    suite: Suite,

    /// Accept responses whatever their transaction ID
    #[arg(long)]
    lenient_transaction_ids: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Suite {
    /// Mapping, then filtering
    Both,
    /// Mapping behavior only
    Mapping,
    /// Filtering behavior only
    Filtering,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration
    fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.discovery.server.clone_from(server);
        }
        if let Some(bind) = &self.bind {
            config.discovery.bind.clone_from(bind);
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.discovery.timeout_ms = timeout_ms;
        }
        if self.lenient_transaction_ids {
            config.discovery.strict_transaction_ids = false;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };
    cli.apply(&mut config);
    config.validate()?;

    // Logs go to stderr so stdout stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.to_lowercase())
        .with_writer(std::io::stderr)
        .init();

    let discovery = NatDiscovery::new(
        config.to_discovery_config()?,
        Arc::new(TracingLogger::new("nat")),
    );
    spawn_ctrl_c_handler(discovery.cancellation_token());

    let progress = ProbeProgress::new(spinner_visible(cli.json, &config.logging.level));
    let summary = run_suites(&discovery, cli.suite, &progress).await;
    progress.finish();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render());
    }

    if discovery.cancellation_token().is_cancelled() {
        anyhow::bail!("NAT discovery cancelled");
    }
    if !summary.is_conclusive() {
        anyhow::bail!("NAT behavior inconclusive against {}", summary.server);
    }

    Ok(())
}

async fn run_suites(discovery: &NatDiscovery, suite: Suite, progress: &ProbeProgress) -> Summary {
    let server = discovery.config().server.clone();

    match suite {
        Suite::Both => {
            progress.start_suite("mapping and filtering");
            discovery.run().await.into()
        }
        Suite::Mapping => {
            progress.start_suite("mapping");
            Summary {
                server,
                mapping: Some(discovery.run_mapping().await),
                filtering: None,
            }
        }
        Suite::Filtering => {
            progress.start_suite("filtering");
            Summary {
                server,
                mapping: None,
                filtering: Some(discovery.run_filtering().await),
            }
        }
    }
}

/// Cancel in-flight probes on Ctrl-C
fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling NAT discovery");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "w3t-nat",
            "--server",
            "stun.example.org:3478",
            "--timeout-ms",
            "1500",
            "--lenient-transaction-ids",
            "--suite",
            "filtering",
            "-v",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(cli.suite, Suite::Filtering);
        assert_eq!(config.discovery.server, "stun.example.org:3478");
        assert_eq!(config.discovery.timeout_ms, 1500);
        assert!(!config.discovery.strict_transaction_ids);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.discovery.bind, "0.0.0.0:0");
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["w3t-nat"]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert_eq!(cli.suite, Suite::Both);
        assert!(!cli.json);
        assert!(config.discovery.strict_transaction_ids);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
