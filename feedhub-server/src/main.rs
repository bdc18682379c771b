//! feedhub: live ADS-B feed aggregation server.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use feedhub_core::clock::{Clock, SystemClock};
use feedhub_core::config::{config_file, load_config, Configuration};
use feedhub_core::detail::{DetailFetcher, OnlineDetailFetcher};
use feedhub_core::lookup::OnlineLookupQueue;
use feedhub_core::manager::{FeedManager, FeedManagerEvent};
use feedhub_core::store::StoreServices;
use feedhub_core::types::{FeedError, Result};

mod logging;
mod provider;
mod sbs;
mod tcp_listener;
mod web;

use provider::HttpLookupProvider;
use tcp_listener::TcpListenerFactory;

/// Store sweep and merged-feed cleanup period.
const SLOW_TICK_SECONDS: u64 = 10;

/// Online lookup queue tick period.
const LOOKUP_TICK_SECONDS: u64 = 1;

#[derive(Parser)]
#[command(name = "feedhub", version, about = "Live ADS-B feed aggregation server")]
struct Cli {
    /// Configuration file [default: ~/.feedhub/config.json]
    #[arg(long, global = true, env = "FEEDHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the configured feeds and serve the JSON API
    Serve {
        /// Bind address, overrides the configuration
        #[arg(long)]
        host: Option<String>,

        /// Port, overrides the configuration
        #[arg(long)]
        port: Option<u16>,
    },

    /// Load, validate and summarise a configuration file
    CheckConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    let path = cli.config.clone().unwrap_or_else(config_file);

    let result = match cli.command {
        Commands::Serve { host, port } => serve(&path, host, port).await,
        Commands::CheckConfig => check_config(&path),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "feedhub failed");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

fn build_lookup(config: &Configuration, clock: Arc<dyn Clock>) -> Result<Option<Arc<OnlineLookupQueue>>> {
    let settings = &config.online_lookup;
    let Some(url) = settings.url.as_deref() else {
        if settings.enabled {
            warn!("online lookup is enabled but no url is configured");
        }
        return Ok(None);
    };
    let provider = HttpLookupProvider::new(url, settings)
        .map_err(|e| FeedError::Config(format!("lookup client: {e}")))?;
    let queue = OnlineLookupQueue::new(Arc::new(provider), clock, settings.enabled)?;
    info!(url, enabled = settings.enabled, "online lookup configured");
    Ok(Some(Arc::new(queue)))
}

async fn serve(path: &Path, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = load_config(path)?;
    info!(
        path = %path.display(),
        receivers = config.receivers.len(),
        merged_feeds = config.merged_feeds.len(),
        "configuration loaded"
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let lookup = build_lookup(&config, clock.clone())?;
    let fetcher = lookup
        .as_ref()
        .map(|queue| Arc::new(OnlineDetailFetcher::new(queue.clone(), clock.clone())));
    let services = StoreServices {
        clock: clock.clone(),
        detail_fetcher: fetcher.clone().map(|f| f as Arc<dyn DetailFetcher>),
        air_pressure: None,
    };
    let manager = Arc::new(FeedManager::new(
        Arc::new(TcpListenerFactory::new(Handle::current())),
        services,
    ));

    manager.events().subscribe(|event| match event {
        FeedManagerEvent::ConnectionStateChanged { feed_id, status } => {
            info!(feed_id, status = status.as_str(), "feed connection changed");
        }
        FeedManagerEvent::FeedsChanged => debug!("feed list changed"),
        FeedManagerEvent::ExceptionCaught { .. } => {}
    });

    if let (Some(queue), Some(fetcher)) = (&lookup, &fetcher) {
        let manager_ref = Arc::downgrade(&manager);
        let fetcher = fetcher.clone();
        queue.fetched().subscribe(move |batch| {
            let details = fetcher.record_results(batch);
            if let Some(manager) = manager_ref.upgrade() {
                let applied = manager.deliver_details(&details);
                debug!(applied, "lookup details delivered");
            }
        });
        queue.clone().spawn(Duration::from_secs(LOOKUP_TICK_SECONDS));
    }

    manager.initialise(&config)?;

    {
        let manager = manager.clone();
        let fetcher = fetcher.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(SLOW_TICK_SECONDS));
            loop {
                ticker.tick().await;
                manager.slow_tick();
                if let Some(fetcher) = &fetcher {
                    fetcher.slow_tick();
                }
            }
        });
    }

    #[cfg(unix)]
    spawn_reload_on_hangup(path.to_path_buf(), manager.clone(), lookup.clone());

    let host = host.unwrap_or_else(|| config.web.host.clone());
    let port = port.unwrap_or(config.web.port);
    let state = Arc::new(web::AppState {
        manager: manager.clone(),
    });

    tokio::select! {
        result = web::serve(state, &host, port) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }
    manager.dispose();
    Ok(())
}

/// Re-read the configuration and bring the feeds in line with it.
fn reload(path: &Path, manager: &FeedManager, lookup: Option<&OnlineLookupQueue>) {
    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            error!(path = %path.display(), error = %e, "configuration reload failed");
            return;
        }
    };
    if let Some(queue) = lookup {
        queue.set_enabled(config.online_lookup.enabled);
    }
    match manager.reconcile(&config) {
        Ok(()) => info!(path = %path.display(), "configuration reloaded"),
        Err(e) => error!(error = %e, "configuration rejected"),
    }
}

#[cfg(unix)]
fn spawn_reload_on_hangup(path: PathBuf, manager: Arc<FeedManager>, lookup: Option<Arc<OnlineLookupQueue>>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGHUP, configuration reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            reload(&path, &manager, lookup.as_deref());
        }
    });
}

// ---------------------------------------------------------------------------
// check-config
// ---------------------------------------------------------------------------

fn summarise(config: &Configuration) -> Vec<String> {
    let mut lines = Vec::new();
    for r in &config.receivers {
        lines.push(format!(
            "receiver {:>4}  {:<20} {:<22} {:<8} {:?}",
            r.unique_id,
            r.name,
            r.address,
            if r.enabled { "enabled" } else { "disabled" },
            r.usage,
        ));
    }
    for m in &config.merged_feeds {
        let members: Vec<String> = m.receiver_ids.iter().map(|id| id.to_string()).collect();
        lines.push(format!(
            "merged   {:>4}  {:<20} [{}] {:<8} {:?}",
            m.unique_id,
            m.name,
            members.join(", "),
            if m.enabled { "enabled" } else { "disabled" },
            m.usage,
        ));
    }
    let lookup = match (&config.online_lookup.url, config.online_lookup.enabled) {
        (Some(url), true) => format!("online lookup: {url}"),
        (Some(url), false) => format!("online lookup: {url} (disabled)"),
        (None, _) => "online lookup: none".to_string(),
    };
    lines.push(lookup);
    lines.push(format!("web: http://{}:{}", config.web.host, config.web.port));
    lines
}

fn check_config(path: &Path) -> Result<()> {
    if !path.exists() {
        println!("{} does not exist, defaults apply", path.display());
    }
    let config = load_config(path)?;
    for line in summarise(&config) {
        println!("{line}");
    }
    println!("configuration OK");
    Ok(())
}
