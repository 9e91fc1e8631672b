//! Runtime metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Outcome label for a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    Error,
}

impl RunOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Ok => "ok",
            RunOutcome::Error => "error",
        }
    }
}

pub fn increment_instances_created(fqn: &str) {
    counter!("stagehand_instances_created_total", "fqn" => fqn.to_string()).increment(1);
}

pub fn increment_instances_destroyed(fqn: &str) {
    counter!("stagehand_instances_destroyed_total", "fqn" => fqn.to_string()).increment(1);
}

/// Record one `run()` invocation and how long it took.
pub fn record_job_run(service: &str, outcome: RunOutcome, duration: Duration) {
    counter!(
        "stagehand_job_runs_total",
        "service" => service.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "stagehand_job_run_duration_seconds",
        "service" => service.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn increment_startup_failures(service: &str) {
    counter!("stagehand_job_startup_failures_total", "service" => service.to_string())
        .increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_active_services(count: usize) {
    gauge!("stagehand_active_services").set(count as f64);
}
