//! standbyd - The device standby service
//!
//! This is the main entry point for the standbyd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Core engine and the configured plugin
//! - Linux collaborators (timers, /proc, wake lock)
//! - The system event feed

use anyhow::{Context, Result};
use clap::Parser;
use standby_api::{QueuedTask, SystemEvent};
use standby_config::{load_config, SharedPolicy, StandbyPolicy};
use standby_core::{DeviceStateCache, PluginContext, PluginRegistry, StandbyEngine, StandbyService};
use standby_host_api::TaskQueue;
use standby_host_linux::{
    detect_wake_lock, spawn_event_reader, ChannelTaskQueue, ProcFsDirectory, TokioTimerSource,
};
use standby_store::{SqliteStore, Store};
use standby_util::{default_config_path, DATABASE_FILENAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// standbyd - Device standby states and background resource exemptions
#[derive(Parser, Debug)]
#[command(name = "standbyd")]
#[command(about = "Device standby state machine and resource exemption service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/standbyd/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set STANDBY_DATA_DIR env var)
    #[arg(short, long, env = "STANDBY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Read JSON-lines system events from this file instead of stdin
    #[arg(short, long)]
    events: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: StandbyEngine,
    service: StandbyService,
    tasks: mpsc::UnboundedReceiver<QueuedTask>,
    config_path: PathBuf,
    // keeps armed timers alive for the lifetime of the loop
    _timers: Arc<TokioTimerSource>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        let policy = load_policy(&args.config)?;

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DATABASE_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let (queue, tasks) = ChannelTaskQueue::channel();
        let queue: Arc<dyn TaskQueue> = Arc::new(queue);
        let timers = Arc::new(
            TokioTimerSource::new(queue.clone()).context("Failed to create timer source")?,
        );

        let ctx = PluginContext {
            policy: SharedPolicy::new(policy),
            timers: timers.clone(),
            queue,
            wake_lock: Arc::from(detect_wake_lock()),
            device_state: Arc::new(DeviceStateCache::new()),
            store,
        };

        let registry = PluginRegistry::new();
        let mut engine =
            StandbyEngine::new(&registry, ctx).context("Failed to load standby plugin")?;
        engine
            .init_ready_state(&ProcFsDirectory::new())
            .context("Failed to initialize standby service")?;

        let service = engine.service();

        Ok(Self {
            engine,
            service,
            tasks,
            config_path: args.config.clone(),
            _timers: timers,
        })
    }

    async fn run(mut self, events: Box<dyn AsyncBufRead + Unpin + Send>) -> Result<()> {
        let mut events = spawn_event_reader(events);
        let mut events_open = true;

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to create SIGUSR1 handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // SIGHUP - reload configuration; the plugin set stays
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    match load_config(&self.config_path) {
                        Ok(policy) => self.engine.reload_policy(policy),
                        Err(e) => warn!(error = %e, "Reload failed, keeping current policy"),
                    }
                }

                _ = sigusr1.recv() => {
                    info!(dump = %self.engine.dump(), "State dump");
                }

                task = self.tasks.recv() => {
                    match task {
                        Some(task) => self.engine.handle(task),
                        None => {
                            error!("Task queue closed");
                            break;
                        }
                    }
                }

                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.on_system_event(&event),
                        None => {
                            debug!("No more system events");
                            events_open = false;
                        }
                    }
                }
            }
        }

        self.engine.uninit_ready_state();
        info!("Service stopped");
        Ok(())
    }

    fn on_system_event(&self, event: &SystemEvent) {
        if let Err(e) = self.service.handle_common_event(event) {
            warn!(error = %e, ?event, "Failed to handle system event");
        }
    }
}

fn load_policy(path: &Path) -> Result<StandbyPolicy> {
    if !path.exists() {
        warn!(config_path = %path.display(), "Config file not found, using defaults");
        return Ok(StandbyPolicy::default());
    }

    let policy =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;

    info!(
        config_path = %path.display(),
        version = policy.version.as_deref().unwrap_or("(none)"),
        strategies = policy.strategies.len(),
        "Configuration loaded"
    );
    Ok(policy)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "standbyd starting"
    );

    let events: Box<dyn AsyncBufRead + Unpin + Send> = match &args.events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open event source {:?}", path))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let service = Service::new(&args)?;
    service.run(events).await
}
