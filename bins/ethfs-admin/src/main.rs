use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use ethfs_client::config::rpc_urls_from_env;
use ethfs_client::{EndpointRegistry, HttpChainIdProbe};
use ethfs_config::{Config, ConfigManager};
use ethfs_fuse::config::{collect_bindings, DEPLOYMENT_FILE};
use ethfs_fuse::MountConfig;
use ethfs_logging::LogConfig;
use serde_json::json;

/// ethfs administration tool
///
/// Inspects the pieces a mount is assembled from: RPC endpoints and the
/// chains they serve, chain-to-store bindings, and the mount configuration.
#[derive(Parser, Debug)]
#[command(name = "ethfs-admin", version, about)]
struct Cli {
    /// Mount configuration file. Defaults apply when omitted.
    #[arg(short, long, env = "ETHFS_CONFIG")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask every RPC endpoint for its chain id.
    Probe {
        /// Endpoint to probe; repeatable. Overrides RPC_URL* and the config.
        #[arg(long = "rpc-url")]
        rpc_urls: Vec<String>,
    },
    /// Show the chain -> store bindings a mount would use.
    Bindings {
        /// `CHAIN_ID:ADDRESS` or `ADDRESS`; repeatable.
        #[arg(long = "contract")]
        contracts: Vec<String>,

        /// Deployment descriptor consulted last.
        #[arg(long, default_value = DEPLOYMENT_FILE)]
        deployment: PathBuf,
    },
    /// Configuration helpers.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Dump,
    /// Load and validate the configuration file.
    Check,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<MountConfig> {
    match path {
        Some(path) => {
            let manager = ConfigManager::<MountConfig>::load(path)
                .with_context(|| format!("loading {}", path.display()))?;
            Ok(manager.snapshot())
        }
        None => Ok(MountConfig::default()),
    }
}

async fn probe(config: &MountConfig, rpc_urls: Vec<String>, format: OutputFormat) -> anyhow::Result<()> {
    let mut rpc = config.rpc.clone();
    if !rpc_urls.is_empty() {
        rpc.urls = rpc_urls;
    } else {
        let from_env = rpc_urls_from_env();
        if !from_env.is_empty() {
            rpc.urls = from_env;
        }
    }

    let prober = HttpChainIdProbe::new(rpc.probe_timeout)?;
    let table = EndpointRegistry::new().probe(&rpc, &prober).await;
    match format {
        OutputFormat::Table => {
            for chain in table.chains() {
                println!("{:<12} {}", chain.to_string(), table.endpoint(chain).unwrap_or_default());
            }
            for url in &table.unreachable {
                println!("{:<12} {}", "unreachable", url);
            }
        }
        OutputFormat::Json => {
            let chains: Vec<_> = table
                .chains()
                .into_iter()
                .map(|chain| json!({ "chain_id": *chain, "url": table.endpoint(chain) }))
                .collect();
            let out = json!({ "chains": chains, "unreachable": table.unreachable });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

fn bindings(
    config: &MountConfig,
    contracts: &[String],
    deployment: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let bindings = collect_bindings(config, contracts, |key| std::env::var(key).ok(), Some(deployment))?;
    if bindings.is_empty() {
        anyhow::bail!("no store bindings found");
    }
    match format {
        OutputFormat::Table => {
            for (chain, address) in bindings.iter() {
                println!("{:<12} {}", chain.to_string(), address);
            }
        }
        OutputFormat::Json => {
            let out: Vec<_> = bindings
                .iter()
                .map(|(chain, address)| json!({ "chain_id": *chain, "address": address.to_string() }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    let log = LogConfig {
        level: level.to_string(),
        ..LogConfig::default()
    };
    let _guard = ethfs_logging::init_logging(&log)?;

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Probe { rpc_urls } => probe(&config, rpc_urls, cli.format).await,
        Command::Bindings {
            contracts,
            deployment,
        } => bindings(&config, &contracts, &deployment, cli.format),
        Command::Config { action } => match action {
            ConfigAction::Dump => {
                print!("{}", config.render());
                Ok(())
            }
            ConfigAction::Check => {
                config.validate()?;
                tracing::info!(stores = config.stores.len(), "configuration is valid");
                println!("ok");
                Ok(())
            }
        },
    }
}
