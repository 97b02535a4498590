use std::io::IsTerminal;
use std::sync::Arc;

use aegis_background::{
    BackgroundConfig, JsonFileWatchList, JsonlNotifier, LogNotifier, NotificationConfig, NotifierSet,
    WebhookNotifier,
};
use aegis_common::{MemoryWatchList, StoreError, WatchListStore};
use aegis_inpage::VerificationConfig;
use aegis_inpage::verification::{ChainIdSource, ContractLookup, EtherscanLookup, Network};
use tracing::{Level, info};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{LogColor, Options};
use crate::config::AegisConfig;

pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stderr().is_terminal(),
    };
    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(include_target)
        .with_ansi(use_color);

    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(log_filter)
        .with(fmt_layer)
        .try_init();
}

/// Reads the config file named on the command line, or the defaults.
pub fn load_config(opts: &Options) -> eyre::Result<AegisConfig> {
    let mut config = match &opts.config {
        Some(path) => AegisConfig::load(path)?,
        None => AegisConfig::default(),
    };
    if let Some(store) = &opts.store {
        config.background.store_path = Some(store.clone());
    }
    Ok(config)
}

pub async fn open_store(config: &BackgroundConfig) -> Result<Arc<dyn WatchListStore>, StoreError> {
    match &config.store_path {
        Some(path) => {
            let store = JsonFileWatchList::open(path).await?;
            info!(path = %path.display(), "using watch-list file");
            Ok(Arc::new(store))
        }
        None => {
            info!("no watch-list file configured, using an in-memory watch-list");
            Ok(Arc::new(MemoryWatchList::new()))
        }
    }
}

pub fn build_notifier(config: &NotificationConfig) -> NotifierSet {
    let mut set = NotifierSet::default();
    if config.log {
        set.add(Arc::new(LogNotifier));
    }
    if let Some(path) = &config.jsonl_path {
        set.add(Arc::new(JsonlNotifier::new(path)));
    }
    if let Some(webhook) = config.webhook() {
        set.add(Arc::new(WebhookNotifier::new(webhook)));
    }
    set
}

/// The explorer adapter, or `None` when verification is disabled.
pub fn build_lookup(
    config: &VerificationConfig,
    chain: Box<dyn ChainIdSource>,
) -> Option<Arc<dyn ContractLookup>> {
    if !config.enabled {
        return None;
    }
    let mut lookup = EtherscanLookup::new(config.api_key.clone(), config.request_timeout(), chain);
    if let Some(url) = &config.api_url {
        for network in [
            Network::Mainnet,
            Network::Sepolia,
            Network::Goerli,
            Network::Polygon,
            Network::Bsc,
        ] {
            lookup = lookup.with_endpoint(network, url.clone());
        }
    }
    Some(Arc::new(lookup))
}
