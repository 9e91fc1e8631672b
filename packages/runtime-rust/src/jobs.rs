//! Built-in jobs registered by the `stagehand` binary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use stagehand_core::{
    BackgroundService, ClassDescriptor, ClassRegistry, Component, Logger, ManagedRef,
};

/// Default heartbeat cadence: every minute, on the minute.
pub const DEFAULT_HEARTBEAT_SCHEDULE: &str = "0 * * * * *";

/// Registers every built-in job class.
pub fn register_builtin_jobs(classes: &ClassRegistry) {
    classes.register_component::<Heartbeat>();
    classes.register_component::<StartupReport>();
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Recurring liveness log line.
///
/// Schedule comes from `jobs.heartbeat.schedule`.
#[derive(Default)]
pub struct Heartbeat {
    schedule: OnceLock<String>,
    logger: OnceLock<Logger>,
    beats: AtomicU64,
    started_at: Mutex<Option<Instant>>,
}

impl Heartbeat {
    /// Number of beats since the last `start()`.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BackgroundService for Heartbeat {
    async fn start(&self) -> anyhow::Result<()> {
        self.beats.store(0, Ordering::Relaxed);
        *self.started_at.lock() = Some(Instant::now());
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        let beat = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        let uptime = self
            .started_at
            .lock()
            .map(|at| at.elapsed().as_secs())
            .unwrap_or_default();
        if let Some(logger) = self.logger.get() {
            logger.info(format_args!("heartbeat #{beat}, up {uptime}s"));
        }
        Ok(())
    }

    fn schedule(&self) -> Option<String> {
        Some(
            self.schedule
                .get()
                .cloned()
                .unwrap_or_else(|| DEFAULT_HEARTBEAT_SCHEDULE.to_string()),
        )
    }
}

impl Component for Heartbeat {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<Heartbeat>()
            .inject_config(
                "schedule",
                "jobs.heartbeat.schedule",
                Some(json!(DEFAULT_HEARTBEAT_SCHEDULE)),
                |this: &Heartbeat, schedule: String| {
                    let _ = this.schedule.set(schedule);
                },
            )
            .inject_logger("logger", |this: &Heartbeat, logger: Logger| {
                let _ = this.logger.set(logger);
            })
            .job(None)
            .build()
    }
}

// ---------------------------------------------------------------------------
// StartupReport
// ---------------------------------------------------------------------------

/// One-shot summary logged once the runtime is up.
#[derive(Default)]
pub struct StartupReport {
    settings: OnceLock<Value>,
    logger: OnceLock<Logger>,
    heartbeat: OnceLock<ManagedRef<Heartbeat>>,
    summary: Mutex<Option<String>>,
}

impl StartupReport {
    /// The summary produced by the last run.
    #[must_use]
    pub fn summary(&self) -> Option<String> {
        self.summary.lock().clone()
    }

    fn render(&self) -> String {
        let keys = self
            .settings
            .get()
            .and_then(Value::as_object)
            .map_or(0, serde_json::Map::len);
        let heartbeat = self
            .heartbeat
            .get()
            .and_then(ManagedRef::get)
            .and_then(|heartbeat| heartbeat.schedule())
            .unwrap_or_else(|| "unavailable".to_string());
        format!("runtime up: {keys} top-level settings, heartbeat schedule {heartbeat}")
    }
}

#[async_trait]
impl BackgroundService for StartupReport {
    async fn run(&self) -> anyhow::Result<()> {
        let summary = self.render();
        if let Some(logger) = self.logger.get() {
            logger.info(&summary);
        }
        *self.summary.lock() = Some(summary);
        Ok(())
    }
}

impl Component for StartupReport {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<StartupReport>()
            .inject_whole_config("settings", |this: &StartupReport, settings: Value| {
                let _ = this.settings.set(settings);
            })
            .inject_logger("logger", |this: &StartupReport, logger: Logger| {
                let _ = this.logger.set(logger);
            })
            .inject_managed(
                "heartbeat",
                None,
                vec![],
                |this: &StartupReport, heartbeat: ManagedRef<Heartbeat>| {
                    let _ = this.heartbeat.set(heartbeat);
                },
            )
            .job(None)
            .build()
    }
}
