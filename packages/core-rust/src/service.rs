//! Background service contract driven by the scheduler.

use async_trait::async_trait;

/// A job the scheduler can start, run, and stop.
///
/// The scheduler guarantees `start()` precedes any `run()` and that `stop()`
/// is called once per completed lifecycle. Recurring services have `run()`
/// re-invoked on every timer firing without waiting for the previous
/// invocation; implementations that must not overlap serialize themselves.
#[async_trait]
pub trait BackgroundService: Send + Sync + 'static {
    /// Called once before the first `run()`.
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// One unit of work.
    async fn run(&self) -> anyhow::Result<()>;

    /// Called once when the service is retired or stopped.
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cron schedule used when the class's job descriptor does not declare one.
    /// `None` makes the service one-shot.
    fn schedule(&self) -> Option<String> {
        None
    }
}
