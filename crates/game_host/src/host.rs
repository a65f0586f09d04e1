//! Boots the services, replays push traffic and tears everything down.

use crate::config::AppConfig;
use anyhow::Context;
use game_services::{EngineSeed, InboundAdapter, MemoryEngine};
use server_context::{ContextOptions, ServerContext};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Outcome of replaying a push file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
}

pub struct Host {
    context: Arc<ServerContext>,
    inbound: InboundAdapter,
}

impl Host {
    /// Seeds the engine, registers the enabled services in order and initializes them.
    pub async fn boot(config: &AppConfig) -> anyhow::Result<Self> {
        let seed = match &config.engine.seed_file {
            Some(path) => EngineSeed::from_file(path)
                .with_context(|| format!("Failed to load seed file {}", path.display()))?,
            None => EngineSeed::default(),
        };
        let engine = Arc::new(MemoryEngine::from_seed(seed));

        let context = ServerContext::new(ContextOptions::new(engine));
        for kind in config.service_kinds()? {
            kind.register(&context)
                .with_context(|| format!("Failed to register the {} service", kind))?;
        }

        context
            .init()
            .await
            .context("Service initialization failed")?;

        let inbound = InboundAdapter::from_context(&context);
        Ok(Self { context, inbound })
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    /// Feeds a file of push envelopes, one JSON object per line, through the
    /// inbound adapter. Blank lines and lines starting with `#` are skipped.
    /// Each envelope's handlers settle before the next line is read.
    pub async fn replay(&self, path: &Path) -> anyhow::Result<ReplaySummary> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;

        let mut summary = ReplaySummary::default();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match self.inbound.push_json(line) {
                Ok(dispatch) => {
                    dispatch.settled().await;
                    summary.applied += 1;
                }
                Err(e) => {
                    warn!("⚠️ Skipping replay line {}: {}", index + 1, e);
                    summary.rejected += 1;
                }
            }
        }

        info!(
            "📼 Replayed {} push events from {} ({} rejected)",
            summary.applied,
            path.display(),
            summary.rejected
        );
        Ok(summary)
    }

    /// Periodically logs event bus statistics. Returns `None` for a zero interval.
    pub fn spawn_stats_monitor(&self, interval_secs: u64) -> Option<JoinHandle<()>> {
        if interval_secs == 0 {
            return None;
        }

        let events = self.context.events();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            let mut last_emitted = 0u64;

            loop {
                interval.tick().await;

                let stats = events.stats();
                let emitted = stats.events_emitted - last_emitted;
                last_emitted = stats.events_emitted;

                info!(
                    "📊 Event bus - {} events in the last {}s | {} handlers | {} handler failures",
                    emitted, interval_secs, stats.total_handlers, stats.handler_failures
                );
            }
        }))
    }

    /// Disposes every service in reverse registration order.
    pub async fn shutdown(self) {
        info!("🛑 Disposing services...");
        self.context.dispose().await;

        let stats = self.context.events().stats();
        info!("📊 Final statistics:");
        info!("  - Events emitted: {}", stats.events_emitted);
        info!("  - Handler failures: {}", stats.handler_failures);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_services::{LocalizationService, SessionService};
    use server_context::{Service, ServiceLifecycle};
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    const SEED: &str = r#"{
        "sessions": [
            { "id": "s1", "userId": "u1" },
            { "id": "s2" }
        ],
        "locales": [{ "code": "en", "isDefault": true, "translations": { "hello": "Hello" } }]
    }"#;

    const REPLAY: &str = r#"
# s1 leaves, s2 gets a user
{"event":"socketSessionFinished","data":{"id":"s1","endReason":"Kicked"}}
{"event":"playerConnecting","data":{"sessionId":"s3","ipAddress":"10.0.0.3"}}
not json at all

{"event":"socketSessionFinished","data":{"id":"s2","endReason":"Banned"}}
"#;

    fn write_temp(content: &str) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    fn config_with(seed: Option<PathBuf>, enabled: &[&str]) -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.seed_file = seed;
        config.services.enabled = enabled.iter().map(|name| name.to_string()).collect();
        config
    }

    #[tokio::test]
    async fn test_boot_registers_and_initializes_enabled_services() {
        let seed = write_temp(SEED);
        let config = config_with(Some(seed.path().to_path_buf()), &["localization", "session"]);

        let host = Host::boot(&config).await.unwrap();
        assert!(host.context().is_initialized());
        assert_eq!(
            host.context().service_names(),
            vec!["LocalizationService", "SessionService"]
        );

        let sessions = host.context().get_service::<SessionService>().unwrap();
        assert_eq!(sessions.session_count(), 2);
        let locales = host.context().get_service::<LocalizationService>().unwrap();
        assert_eq!(locales.translate("en", "hello").unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_replay_skips_rejected_lines() {
        let seed = write_temp(SEED);
        let replay = write_temp(REPLAY);
        let host = Host::boot(&config_with(Some(seed.path().to_path_buf()), &["session"]))
            .await
            .unwrap();

        let summary = host.replay(replay.path()).await.unwrap();
        // playerConnecting is native and not accepted from the push channel.
        assert_eq!(summary, ReplaySummary { applied: 2, rejected: 2 });

        let sessions = host.context().get_service::<SessionService>().unwrap();
        assert_eq!(sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_boot_fails_on_unreadable_seed() {
        let seed = write_temp("{ not a seed");
        let result = Host::boot(&config_with(Some(seed.path().to_path_buf()), &["session"])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_disposes_services() {
        let host = Host::boot(&config_with(None, &["session", "reference"]))
            .await
            .unwrap();
        let context = Arc::clone(host.context());
        assert!(host.spawn_stats_monitor(0).is_none());

        host.shutdown().await;

        let sessions = context.get_service::<SessionService>().unwrap();
        assert_eq!(sessions.base().lifecycle(), ServiceLifecycle::Disposed);
    }
}
