mod config;
mod domain;
mod exchanges;
mod notification;
mod storage;
mod trade;

use config::{Config, ZarVenue};
use exchanges::{
    BitstampExchange, FixedRate, FixerClient, LunoExchange, RateSource, ValrExchange, ZarExchange,
};
use notification::{NoopNotifier, Notifier, PushoverNotifier};
use std::env;
use std::sync::Arc;
use storage::{SqliteTradeStore, TradeRecordStore};
use trade::TradeSession;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

fn parse_config_path() -> String {
    for arg in env::args().skip(1) {
        if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    DEFAULT_CONFIG_PATH.to_string()
}

fn init_tracing(log_level: Option<&str>) {
    let level = match log_level {
        Some("debug") => Level::DEBUG,
        Some("info") => Level::INFO,
        Some("warn") | Some("warning") => Level::WARN,
        Some("error") => Level::ERROR,
        Some("trace") => Level::TRACE,
        _ => Level::INFO,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[tokio::main]
async fn main() {
    let config_path = parse_config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    init_tracing(config.app.log_level.as_deref());
    info!(
        app = %config.app.name,
        env = %config.app.env,
        account = %config.trade.account,
        zax = %config.trade.zax,
        mode = ?config.trade.mode,
        "starting trade orchestrator"
    );

    let zax: Arc<dyn ZarExchange> = match build_zar_exchange(&config) {
        Ok(zax) => zax,
        Err(e) => {
            error!(error = %e, "failed to set up the ZAR-leg venue");
            std::process::exit(1);
        }
    };

    let fiat = Arc::new(BitstampExchange::new(
        config.exchanges.bitstamp.clone(),
        &config.execution,
    ));

    let rates = build_rate_source(&config);
    let notifier = build_notifier(&config);
    let store = build_store(&config).await;

    let mut session = TradeSession::new(
        config.trade.clone(),
        config.polling.clone(),
        zax,
        fiat,
        rates,
        notifier.clone(),
        store.clone(),
    );

    let outcome = match session.run().await {
        Ok(outcome) => outcome,
        Err(e) => {
            let message = format!(
                "Trade for {} stopped on a fatal error: {}. Reconcile the books manually.",
                config.trade.account, e
            );
            error!("{}", message);
            if let Err(send_err) = notifier.send(&message, true).await {
                error!(error = %send_err, "failed to deliver the fatal-error notification");
            }
            close_store(store).await;
            std::process::exit(1);
        }
    };

    info!(?outcome, "trade session finished");
    close_store(store).await;
    std::process::exit(outcome.exit_code());
}

fn build_zar_exchange(config: &Config) -> Result<Arc<dyn ZarExchange>, config::ConfigError> {
    let venue = config.zar_venue_config()?.clone();
    Ok(match config.trade.zax {
        ZarVenue::Luno => Arc::new(LunoExchange::new(venue, &config.execution)),
        ZarVenue::Valr => Arc::new(ValrExchange::new(venue, &config.execution)),
    })
}

fn build_rate_source(config: &Config) -> Arc<dyn RateSource> {
    let fixer = config
        .rates
        .as_ref()
        .and_then(|r| r.fixer.as_ref())
        .filter(|f| f.enabled);

    match fixer {
        Some(fixer) => Arc::new(FixerClient::new(fixer, &config.execution)),
        // Validation guarantees a fixed rate is configured in this case.
        None => Arc::new(FixedRate(config.trade.fiat_rate.unwrap_or_default())),
    }
}

fn build_notifier(config: &Config) -> Arc<dyn Notifier> {
    let pushover = config
        .notification
        .as_ref()
        .and_then(|n| n.pushover.as_ref())
        .filter(|p| p.enabled);

    match pushover {
        Some(pushover) => match PushoverNotifier::new(pushover.clone()) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                error!(error = %e, "failed to set up Pushover, notifications disabled");
                Arc::new(NoopNotifier)
            }
        },
        None => Arc::new(NoopNotifier),
    }
}

async fn build_store(config: &Config) -> Option<Arc<dyn TradeRecordStore>> {
    let storage = config.storage.as_ref().filter(|s| s.enabled)?;
    let Some(path) = storage.path.as_deref() else {
        error!("storage.enabled is set but storage.path is missing, records disabled");
        return None;
    };

    match SqliteTradeStore::new(path).await {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            error!(error = %e, "failed to open the trade store, records disabled");
            None
        }
    }
}

async fn close_store(store: Option<Arc<dyn TradeRecordStore>>) {
    if let Some(store) = store {
        if let Err(e) = store.close().await {
            error!(error = %e, "failed to close the trade store");
        }
    }
}
