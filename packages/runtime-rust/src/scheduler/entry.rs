use std::sync::Arc;

use stagehand_core::BackgroundService;

use super::timer::TimerHandle;

/// Lifecycle state of a scheduled service.
///
/// State machine: Unstarted -> Starting -> {Recurring | Completed} -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Never started, or the last start attempt failed.
    Unstarted,
    /// Entry reserved; instantiation or `start()` in progress.
    Starting,
    /// Timer armed.
    Recurring,
    /// One-shot service ran, stopped, and was destroyed.
    Completed,
    /// Recurring service stopped; the instance stays registered.
    Stopped,
}

/// Bookkeeping for one active service.
pub(crate) struct ScheduleEntry {
    /// Distinguishes this start attempt from later ones under the same name.
    pub(crate) generation: u64,
    pub(crate) instance_name: String,
    pub(crate) state: ServiceState,
    pub(crate) service: Option<Arc<dyn BackgroundService>>,
    pub(crate) timer: Option<TimerHandle>,
}

impl ScheduleEntry {
    /// A reserved entry, held while the service is being started.
    pub(crate) fn reserved(instance_name: String, generation: u64) -> Self {
        Self {
            generation,
            instance_name,
            state: ServiceState::Starting,
            service: None,
            timer: None,
        }
    }

    pub(crate) fn arm(&mut self, timer: TimerHandle) {
        self.timer = Some(timer);
        self.state = ServiceState::Recurring;
    }
}

impl std::fmt::Debug for ScheduleEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleEntry")
            .field("generation", &self.generation)
            .field("instance_name", &self.instance_name)
            .field("state", &self.state)
            .field("timer", &self.timer)
            .finish_non_exhaustive()
    }
}

/// What is remembered about a service after its entry is gone.
#[derive(Debug, Clone)]
pub(crate) struct Retired {
    pub(crate) state: ServiceState,
    pub(crate) instance_name: String,
}
