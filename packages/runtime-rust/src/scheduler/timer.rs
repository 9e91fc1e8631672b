//! Cron timers bound to a service's `run()`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use cron::Schedule;
use stagehand_core::BackgroundService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::metrics::{self, RunOutcome};

/// Parses a cron expression.
///
/// Six fields (seconds first) are taken as is; five-field expressions fire at
/// second 0 of each matching minute.
///
/// # Errors
///
/// Returns the parser error for malformed expressions.
pub fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Invokes `run()` once and records its outcome.
pub(crate) async fn run_once(service_name: &str, service: &dyn BackgroundService) -> anyhow::Result<()> {
    let started = Instant::now();
    let result = service.run().await;
    let outcome = if result.is_ok() {
        RunOutcome::Ok
    } else {
        RunOutcome::Error
    };
    metrics::record_job_run(service_name, outcome, started.elapsed());
    result
}

/// An armed recurring timer.
///
/// Cancelling disarms future firings only. Runs already spawned keep going.
pub struct TimerHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Spawns the firing loop for `service` on the current runtime.
    #[must_use]
    pub fn arm(service_name: String, schedule: Schedule, service: Arc<dyn BackgroundService>) -> Self {
        let token = CancellationToken::new();
        let handle = tokio::spawn(fire_loop(service_name, schedule, service, token.clone()));
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Disarms the timer and waits for the firing loop to exit.
    pub async fn cancel(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

async fn fire_loop(
    service_name: String,
    schedule: Schedule,
    service: Arc<dyn BackgroundService>,
    token: CancellationToken,
) {
    let mut prev: DateTime<Utc> = Utc::now();
    loop {
        // Never schedule from the past: a stalled loop skips missed firings
        // instead of bursting through them.
        let from = prev.max(Utc::now());
        let Some(next) = schedule.after(&from).next() else {
            debug!(service = %service_name, "schedule has no further firings");
            break;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
        }
        prev = next;

        let name = service_name.clone();
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            if let Err(err) = run_once(&name, &*service).await {
                warn!(service = %name, error = %err, "scheduled run failed");
            }
        });
    }
    debug!(service = %service_name, "timer disarmed");
}
