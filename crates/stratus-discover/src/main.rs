//! CLI entry point for stratus-discover.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use stratus_core::types::ResourceKind;

use stratus_discover::aws::AwsCliScanner;
use stratus_discover::config::DiscoverConfig;
use stratus_discover::error::DiscoverError;
use stratus_discover::inventory::InventoryScanner;
use stratus_discover::report::{event_to_json, DiscoverySummary};
use stratus_discover::{Discoverer, DiscoveryOptions, Scanner};

#[derive(Parser)]
#[command(name = "stratus-discover")]
#[command(about = "Enumerate cloud compute, network, and database resources")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: stratus).
    #[arg(short, long, default_value = "stratus", global = true)]
    config: String,

    /// Region override.
    #[arg(long, global = true)]
    region: Option<String>,

    /// aws CLI profile override.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Restrict discovery to one VPC.
    #[arg(long, global = true)]
    vpc_id: Option<String>,

    /// Scan a JSON inventory file instead of the live account.
    #[arg(long, global = true)]
    inventory: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Discover all configured resource families, one JSON event per line.
    Discover {
        /// Resource family to scan (repeatable); replaces the configured set.
        #[arg(long = "family")]
        families: Vec<ResourceKind>,

        /// Expand each security group's instances in its own task.
        #[arg(long)]
        concurrent_expansion: bool,

        /// Instance lookups in flight at once with --concurrent-expansion.
        #[arg(long, requires = "concurrent_expansion")]
        max_concurrent_lookups: Option<usize>,

        /// Cancel the run after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Exit with an error if any branch failed.
        #[arg(long)]
        fail_on_error: bool,
    },
    /// Look up the reservation holding one instance.
    GetInstance {
        /// Instance ID.
        instance_id: String,
    },
    /// Look up one load balancer by name.
    GetLoadBalancer {
        /// Load balancer name.
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = DiscoverConfig::load(&cli.config)?;
    apply_overrides(&cli, &mut config);

    match cli.command {
        Command::Discover {
            ref families,
            concurrent_expansion,
            max_concurrent_lookups,
            timeout_secs,
            fail_on_error,
        } => {
            if !families.is_empty() {
                config.families = families.clone();
            }
            config.expand_concurrently |= concurrent_expansion;
            if let Some(limit) = max_concurrent_lookups {
                config.max_concurrent_lookups = limit;
            }
            if timeout_secs.is_some() {
                config.timeout_secs = timeout_secs;
            }
            config.validate()?;

            let scanner = build_scanner(&config).await?;
            let failures = run_discovery(scanner, &config).await?;
            if fail_on_error && failures > 0 {
                anyhow::bail!("{failures} discovery branch(es) failed");
            }
        }
        Command::GetInstance { ref instance_id } => {
            let scanner = build_scanner(&config).await?;
            let reservation = scanner
                .get_instance(instance_id)
                .await
                .map_err(DiscoverError::Scan)?;
            println!("{}", serde_json::to_string(&reservation)?);
        }
        Command::GetLoadBalancer { ref name } => {
            let scanner = build_scanner(&config).await?;
            let lb = scanner
                .get_load_balancer(name)
                .await
                .map_err(DiscoverError::Scan)?;
            println!("{}", serde_json::to_string(&lb)?);
        }
    }

    Ok(())
}

/// Run one discovery, printing events as they arrive. Returns the number of
/// failed branches.
async fn run_discovery(scanner: Arc<dyn Scanner>, config: &DiscoverConfig) -> anyhow::Result<usize> {
    let discoverer = Discoverer::new(scanner, DiscoveryOptions::from_config(config));
    let mut stream = discoverer.discover();
    let mut summary = DiscoverySummary::new(stream.run_id());

    if let Some(secs) = config.timeout_secs {
        let token = stream.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            if !token.is_cancelled() {
                tracing::warn!(timeout_secs = secs, "Discovery timed out, cancelling");
                token.cancel();
            }
        });
    }

    let stdout = std::io::stdout();
    while let Some(event) = stream.recv().await {
        summary.record(&event);
        let mut out = stdout.lock();
        writeln!(out, "{}", event_to_json(&event)?)?;
    }

    for failure in &summary.failures {
        tracing::error!(kind = %failure.kind, error = %failure.message, "Branch failed");
    }
    tracing::info!(
        run_id = %summary.run_id,
        resources = summary.total_resources(),
        errors = summary.error_count(),
        counts = %serde_json::to_string(&summary.resources)?,
        "Discovery summary"
    );

    Ok(summary.error_count())
}

async fn build_scanner(config: &DiscoverConfig) -> Result<Arc<dyn Scanner>, DiscoverError> {
    if let Some(path) = &config.inventory_path {
        return Ok(Arc::new(InventoryScanner::from_path(path)?));
    }

    let scanner = AwsCliScanner::from_config(config);
    let version = scanner.verify_installation().await?;
    tracing::info!(
        aws_cli_version = %version,
        region = config.region.as_deref(),
        vpc_id = config.vpc_id.as_deref(),
        "aws CLI verified"
    );
    Ok(Arc::new(scanner))
}

fn apply_overrides(cli: &Cli, config: &mut DiscoverConfig) {
    if cli.region.is_some() {
        config.region = cli.region.clone();
    }
    if cli.profile.is_some() {
        config.profile = cli.profile.clone();
    }
    if cli.vpc_id.is_some() {
        config.vpc_id = cli.vpc_id.clone();
    }
    if cli.inventory.is_some() {
        config.inventory_path = cli.inventory.clone();
    }
}
