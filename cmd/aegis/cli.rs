use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use aegis_background::{BackgroundService, Notifier, TransferWatcher};
use aegis_common::{RpcMethod, TrackedAddress};
use aegis_inpage::verification::{
    ContractLookup, FixedChainId, PatternRiskScorer, RiskScorer, WindowChainId,
};
use aegis_inpage::{Classification, classify};
use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{OptionExt, WrapErr};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

use crate::initializers::{build_lookup, build_notifier, load_config, open_store};
use crate::session::{Script, SessionParts, replay, scripted_window};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(name = "aegis", version, about = "Wallet transaction guard")]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE",
        help = "TOML configuration file. Missing sections use their defaults.",
        env = "AEGIS_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "store",
        value_name = "WATCHLIST_FILE",
        help = "Watch-list JSON file. Overrides `background.store_path`.",
        env = "AEGIS_STORE"
    )]
    pub store: Option<PathBuf>,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "AEGIS_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error"
    )]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        env = "AEGIS_LOG_COLOR"
    )]
    pub log_color: LogColor,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            config: None,
            store: None,
            log_level: Level::INFO,
            log_color: LogColor::default(),
        }
    }
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    #[command(subcommand, about = "Inspect or edit the watch-list")]
    Watch(WatchCommand),
    #[command(about = "Classify one wallet request")]
    Classify {
        #[arg(value_name = "METHOD")]
        method: String,
        #[arg(value_name = "PARAMS_JSON", help = "JSON array of positional params")]
        params: Option<String>,
    },
    #[command(about = "Score contract source for rug-pull patterns")]
    Risk {
        #[arg(value_name = "SOURCE_FILE")]
        path: PathBuf,
    },
    #[command(about = "Look up a contract's verification status")]
    Verify {
        #[arg(value_name = "ADDRESS")]
        address: String,
        #[arg(long = "chain-id", default_value_t = 1)]
        chain_id: u64,
    },
    #[command(about = "Watch ERC-20 transfers into watched addresses")]
    Transfers {
        #[arg(long = "rpc-url", value_name = "URL", env = "AEGIS_RPC_URL")]
        rpc_url: Option<String>,
    },
    #[command(about = "Replay a scripted dapp session through the guard")]
    Simulate {
        #[arg(value_name = "SCRIPT_FILE")]
        script: PathBuf,
    },
}

#[derive(ClapSubcommand, Debug, Clone)]
pub enum WatchCommand {
    #[command(about = "Print the watched addresses")]
    List,
    #[command(about = "Start watching an address")]
    Add {
        #[arg(value_name = "ADDRESS")]
        address: String,
    },
    #[command(about = "Stop watching an address")]
    Remove {
        #[arg(value_name = "ADDRESS")]
        address: String,
    },
}

impl Subcommand {
    pub async fn run(self, opts: &Options) -> eyre::Result<()> {
        let config = load_config(opts)?;
        config.validate()?;

        match self {
            Subcommand::Watch(command) => {
                let store = open_store(&config.background).await?;
                let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&config.background.notifications));
                // No relay is attached; deltas are dropped.
                let (relay, _) = mpsc::unbounded_channel();
                let service = BackgroundService::new(store.clone(), notifier, relay);
                match command {
                    WatchCommand::List => {}
                    WatchCommand::Add { address } => {
                        let address = parse_address(&address)?;
                        if !service.add_address(address).await.ok {
                            eyre::bail!("could not add {address} to the watch-list");
                        }
                    }
                    WatchCommand::Remove { address } => {
                        let address = parse_address(&address)?;
                        if !service.remove_address(address).await.ok {
                            eyre::bail!("could not remove {address} from the watch-list");
                        }
                    }
                }
                for address in store.get().await? {
                    println!("{address}");
                }
            }
            Subcommand::Classify { method, params } => {
                let params: Option<Value> = params
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .wrap_err("params must be JSON")?;
                let first = params.as_ref().and_then(|p| match p {
                    Value::Array(items) => items.first(),
                    other => Some(other),
                });
                let report = match classify(&RpcMethod::parse(&method), first) {
                    Classification::Transaction(descriptor) => descriptor.details(),
                    Classification::Undescribed { from } => json!({ "kind": "Undescribed", "from": from }),
                    Classification::AccountRequest => json!({ "kind": "AccountRequest" }),
                    Classification::ReviewBeforeSigning(kind) => {
                        json!({ "kind": "ReviewBeforeSigning", "signing": format!("{kind:?}") })
                    }
                    Classification::Passthrough => json!({ "kind": "Passthrough" }),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Subcommand::Risk { path } => {
                let source = std::fs::read_to_string(&path)
                    .wrap_err_with(|| format!("could not read {}", path.display()))?;
                let assessment = PatternRiskScorer.score(&source);
                println!("{}", serde_json::to_string_pretty(&assessment)?);
            }
            Subcommand::Verify { address, chain_id } => {
                let address = parse_address(&address)?;
                let lookup = build_lookup(&config.verification, Box::new(FixedChainId(Some(chain_id))))
                    .ok_or_eyre("contract verification is disabled in the configuration")?;
                let record = lookup.lookup(address).await?;
                info!("{}", record.status_line());
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            Subcommand::Transfers { rpc_url } => {
                let mut transfers = config.background.transfers.clone();
                if rpc_url.is_some() {
                    transfers.rpc_url = rpc_url;
                }
                let store = open_store(&config.background).await?;
                let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&config.background.notifications));
                let watcher = TransferWatcher::from_config(&transfers, store, notifier)
                    .ok_or_eyre("no RPC endpoint configured, pass --rpc-url or set background.transfers.rpc_url")?;

                let shutdown = CancellationToken::new();
                let task = tokio::spawn(watcher.run(shutdown.clone()));
                tokio::signal::ctrl_c().await?;
                info!("shutting down transfer watcher");
                shutdown.cancel();
                task.await?;
            }
            Subcommand::Simulate { script } => {
                let script = Script::load(&script)?;
                let window = scripted_window(&script);
                // Explorer network follows whatever chain the page's wallet reports.
                let chain = WindowChainId::new(Arc::downgrade(&window));
                let parts = SessionParts {
                    store: open_store(&config.background).await?,
                    notifier: Arc::new(build_notifier(&config.background.notifications)),
                    lookup: build_lookup(&config.verification, Box::new(chain)),
                };
                let report = replay(window, &script, &config, parts).await?;
                for (request, result) in script.requests.iter().zip(&report.results) {
                    match result {
                        Ok(value) => println!("{} -> {value}", request.method),
                        Err(err) => warn!(method = %request.method, %err, "request failed"),
                    }
                }
                for entry in &report.activity {
                    let status = entry
                        .verification
                        .as_ref()
                        .map(|record| record.status_line())
                        .unwrap_or_else(|| "not verified".to_string());
                    println!(
                        "{} {:?} -> {:?} [{status}]",
                        entry.descriptor.label(),
                        entry.descriptor.from,
                        entry.descriptor.to
                    );
                }
                info!(
                    alerts = report.alerts_forwarded,
                    watched = report.watch_list.len(),
                    "session finished"
                );
            }
        }
        Ok(())
    }
}

fn parse_address(input: &str) -> eyre::Result<TrackedAddress> {
    TrackedAddress::parse_input(input).wrap_err_with(|| format!("invalid address {input:?}"))
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!("Invalid log color '{s}'. Expected: auto, always, or never")),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        CLI::command().debug_assert();
    }

    #[test]
    fn log_color_parses_case_insensitively() {
        assert_eq!("Always".parse::<LogColor>().unwrap(), LogColor::Always);
        assert_eq!(LogColor::Never.to_string(), "never");
        assert!("sometimes".parse::<LogColor>().is_err());
    }

    #[test]
    fn watch_add_parses() {
        let cli = CLI::try_parse_from(["aegis", "--log.level", "debug", "watch", "add", "0xabc"]).unwrap();
        assert_eq!(cli.opts.log_level, Level::DEBUG);
        assert!(matches!(cli.command, Subcommand::Watch(WatchCommand::Add { ref address }) if address == "0xabc"));
    }
}
