use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use strmbridge::config::Config;
use strmbridge::notifications::{LogSink, NotificationSink, WebhookSink};
use strmbridge::sync::batcher::{NotificationBatcher, SWEEP_INTERVAL};
use strmbridge::sync::watcher::DirectoryWatcher;
use strmbridge::{MediaServerClient, RefreshCoalescer, SyncEngine, WebhookAggregator};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Run one full scan of every configured source root at startup
    #[arg(long)]
    scan: bool,

    /// Re-sync only this file or subtree, then keep running
    #[arg(long)]
    sync_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("strmbridge starting...");

    let args = Args::parse();
    let config = Config::load(&args.config).unwrap_or_else(|e| {
        warn!("Failed to load {:?}: {}. Using defaults.", args.config, e);
        Config::default()
    });

    let sink: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookSink::new(url.clone())),
        None => Arc::new(LogSink),
    };

    let client = Arc::new(MediaServerClient::new(
        config.refresh.base_url.clone(),
        config.refresh.api_key.clone(),
    ));

    let refresh = if config.refresh.enabled {
        let coalescer = RefreshCoalescer::new(
            client.clone(),
            config.refresh.target,
            strmbridge::config::parse_rewrites(&config.refresh.path_rewrites),
        );
        let every = match config.refresh.mode {
            strmbridge::config::RefreshMode::Periodic => config.refresh.interval_secs,
            strmbridge::config::RefreshMode::Debounce => config.refresh.debounce_secs,
        };
        coalescer.clone().spawn(config.refresh.mode, Duration::from_secs(every));
        Some(coalescer)
    } else {
        None
    };

    let batcher = if config.notify.enabled {
        let batcher = NotificationBatcher::new(
            Duration::from_secs(config.notify.message_delay_secs),
            sink.clone(),
        );
        batcher.clone().spawn_sweeper(SWEEP_INTERVAL);
        Some(batcher)
    } else {
        None
    };

    let engine = SyncEngine::new(&config, client, refresh.clone(), batcher);
    if engine.rules().is_empty() {
        warn!("No valid monitor rules configured");
    }

    // file events flow through one channel into the engine
    let (tx, mut rx) = mpsc::channel::<(PathBuf, PathBuf)>(256);
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            while let Some((_root, path)) = rx.recv().await {
                engine.handle_event(&path).await;
            }
        });
    }

    let watcher = if config.sync.monitor {
        let watcher = DirectoryWatcher::new(
            engine.source_roots(),
            Duration::from_secs(config.sync.poll_secs),
        );
        watcher.clone().start(tx);
        Some(watcher)
    } else {
        None
    };

    if let Some(path) = &args.sync_path {
        engine.sync_path(path).await;
    }
    if args.scan {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine.full_scan().await;
        });
    }

    // external metadata enrichment is wired by embedding hosts; the
    // standalone binary runs unenriched
    let aggregator = WebhookAggregator::new(&config.webhook, sink, None);
    if config.webhook.enabled {
        let listen = config.server.listen.clone();
        let aggregator = aggregator.clone();
        tokio::spawn(async move {
            if let Err(e) = strmbridge::server::run(&listen, aggregator).await {
                warn!("Webhook listener stopped: {}", e);
            }
        });
    }

    info!("strmbridge running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    aggregator.shutdown().await;
    if let Some(refresh) = refresh {
        refresh.flush().await;
    }
    info!("Done.");
    Ok(())
}
