//! Game host binary.
//!
//! Loads the configuration, boots the enabled services against an in-memory
//! engine, optionally replays recorded push traffic and then runs until a
//! shutdown signal arrives.

mod cli;
mod config;
mod host;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::{AppConfig, LoggingSettings};
use host::Host;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn setup_logging(config: &LoggingSettings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("Failed to load {}", args.config_path.display()))?;

        if let Some(services) = args.services {
            config.services.enabled = services;
        }
        if let Some(seed_file) = args.seed_file {
            config.engine.seed_file = Some(seed_file);
        }
        if let Some(replay_file) = args.replay_file {
            config.replay.file = Some(replay_file);
        }
        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config.validate().context("Configuration validation failed")?;
        setup_logging(&config.logging)?;

        info!("🚀 Game Host v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config_path.display());
        Ok(Self { config })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  📦 Services: {}", self.config.services.enabled.join(", "));
        match &self.config.engine.seed_file {
            Some(seed) => info!("  🌱 Engine seed: {}", seed.display()),
            None => info!("  🌱 Engine seed: none"),
        }

        let host = Host::boot(&self.config).await?;

        if let Some(replay) = &self.config.replay.file {
            host.replay(replay).await?;
        }

        let monitor = host.spawn_stats_monitor(self.config.logging.stats_interval_secs);

        info!("✅ Game host is running");
        info!("🛑 Press Ctrl+C to shut down");

        signals::shutdown_signal().await?;
        info!("🛑 Shutdown signal received, shutting down...");

        if let Some(monitor) = monitor {
            monitor.abort();
        }
        host.shutdown().await;

        info!("👋 Game host stopped");
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
