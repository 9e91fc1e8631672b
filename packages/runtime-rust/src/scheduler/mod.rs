//! Background service manager.
//!
//! Discovers job classes through the class registry, instantiates them through
//! the [`InstanceRegistry`], and drives their `start()` / `run()` / `stop()`
//! lifecycle. Recurring services are bound to a cron timer; one-shot services
//! run once and are destroyed in the same call that started them.
//!
//! Service names are job class FQNs. Each service is backed by the instance
//! `<FQN>:default`.

mod entry;
mod timer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use stagehand_core::{BackgroundService, ClassDescriptor, Error};
use tracing::{debug, error, info, warn};

pub use entry::ServiceState;
pub use timer::{parse_schedule, TimerHandle};

use self::entry::{Retired, ScheduleEntry};
use crate::metrics;
use crate::registry::{canonical_name, InstanceRegistry, DEFAULT_LOCAL};

/// Starts, stops, and tracks background services.
pub struct Scheduler {
    registry: Arc<InstanceRegistry>,
    entries: DashMap<String, ScheduleEntry>,
    retired: DashMap<String, Retired>,
    generations: AtomicU64,
}

impl Scheduler {
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self {
            registry,
            entries: DashMap::new(),
            retired: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Starts every registered job class, in registration order. A failing
    /// service does not prevent the others from starting.
    pub async fn start_all(&self) {
        let jobs = self.registry.classes().job_classes();
        info!(count = jobs.len(), "starting background services");
        for descriptor in jobs {
            self.start(descriptor.fqn(), None, Vec::new()).await;
        }
    }

    /// Starts `service_name`, backed by `class` (defaults to the service name).
    ///
    /// No-op if the service already has an active entry. Failures are logged
    /// as [`Error::Startup`] and leave the service inactive; they are never
    /// returned to the caller.
    pub async fn start(&self, service_name: &str, class: Option<&str>, args: Vec<Value>) {
        let fqn = class.unwrap_or(service_name);
        let instance_name = canonical_name(fqn, Some(DEFAULT_LOCAL));
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        // Reserve before the first suspension point so a concurrent start of
        // the same name sees the entry.
        match self.entries.entry(service_name.to_string()) {
            Entry::Occupied(_) => {
                debug!(service = service_name, "service already active, ignoring start");
                return;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ScheduleEntry::reserved(instance_name.clone(), generation));
            }
        }
        self.retired.remove(service_name);
        info!(service = service_name, class = fqn, "starting service");

        if let Err(source) = self
            .launch(service_name, fqn, &instance_name, generation, args)
            .await
        {
            self.entries
                .remove_if(service_name, |_, entry| entry.generation == generation);
            metrics::increment_startup_failures(service_name);
            let err = Error::Startup {
                service: service_name.to_string(),
                source,
            };
            error!(service = service_name, error = %err, "service failed to start");
        }
        metrics::set_active_services(self.entries.len());
    }

    /// True while the entry reserved by `generation` is still the active one.
    fn is_current(&self, service_name: &str, generation: u64) -> bool {
        self.entries
            .get(service_name)
            .is_some_and(|entry| entry.generation == generation)
    }

    async fn launch(
        &self,
        service_name: &str,
        fqn: &str,
        instance_name: &str,
        generation: u64,
        args: Vec<Value>,
    ) -> anyhow::Result<()> {
        let descriptor = self
            .registry
            .classes()
            .resolve(fqn)
            .ok_or_else(|| Error::ClassNotFound {
                fqn: fqn.to_string(),
            })?;
        let object = self
            .registry
            .new_instance_by_fqn(fqn, Some(DEFAULT_LOCAL), args)
            .await?;
        let service = descriptor
            .as_service(object)
            .with_context(|| format!("{fqn} is not a background service"))?;

        let activated = self
            .activate(service_name, instance_name, generation, &descriptor, service)
            .await;
        if activated.is_err() {
            // A service that never started must not stay reachable.
            self.registry.destroy([instance_name]).await;
        }
        activated
    }

    /// Parses the schedule, runs `start()`, then arms the timer or runs the
    /// one-shot. A stop that lands before the timer is armed is handled here
    /// with a single `stop()` call once `start()` has returned.
    async fn activate(
        &self,
        service_name: &str,
        instance_name: &str,
        generation: u64,
        descriptor: &ClassDescriptor,
        service: Arc<dyn BackgroundService>,
    ) -> anyhow::Result<()> {
        let expression = descriptor
            .job()
            .and_then(|job| job.schedule.clone())
            .or_else(|| service.schedule());
        let schedule = expression
            .as_deref()
            .map(|expr| {
                parse_schedule(expr).with_context(|| format!("invalid cron expression {expr:?}"))
            })
            .transpose()?;

        if let Some(mut entry) = self.entries.get_mut(service_name) {
            if entry.generation == generation {
                entry.service = Some(Arc::clone(&service));
            }
        }
        service.start().await.context("start hook failed")?;

        if !self.is_current(service_name, generation) {
            stop_service(service_name, &*service).await;
            debug!(service = service_name, "stopped while starting");
            return Ok(());
        }

        match schedule {
            Some(schedule) => {
                let armed = match self.entries.get_mut(service_name) {
                    Some(mut entry) if entry.generation == generation => {
                        let timer = TimerHandle::arm(
                            service_name.to_string(),
                            schedule,
                            Arc::clone(&service),
                        );
                        entry.arm(timer);
                        true
                    }
                    _ => false,
                };
                if armed {
                    info!(
                        service = service_name,
                        schedule = expression.as_deref().unwrap_or_default(),
                        "recurring service armed"
                    );
                } else {
                    stop_service(service_name, &*service).await;
                    debug!(service = service_name, "stopped while starting, timer not armed");
                }
            }
            None => {
                self.run_one_shot(service_name, instance_name, generation, service)
                    .await;
            }
        }
        Ok(())
    }

    /// Runs a one-shot service to completion and retires it.
    async fn run_one_shot(
        &self,
        service_name: &str,
        instance_name: &str,
        generation: u64,
        service: Arc<dyn BackgroundService>,
    ) {
        if let Err(err) = timer::run_once(service_name, &*service).await {
            warn!(service = service_name, error = %err, "one-shot run failed");
        }
        stop_service(service_name, &*service).await;
        drop(service);

        let removed = self
            .entries
            .remove_if(service_name, |_, entry| entry.generation == generation)
            .is_some();
        if !removed && self.entries.contains_key(service_name) {
            debug!(service = service_name, "restarted during its run, leaving the new start in place");
            return;
        }
        self.retired.insert(
            service_name.to_string(),
            Retired {
                state: ServiceState::Completed,
                instance_name: instance_name.to_string(),
            },
        );
        self.registry.destroy([instance_name]).await;
        info!(service = service_name, "one-shot service completed");
    }

    /// Stops `service_name`: disarms its timer and invokes `stop()` if the
    /// instance is still registered. Runs already in flight are not awaited.
    /// No-op for services without an active entry.
    ///
    /// A service still starting is only marked stopped; the pending start
    /// call invokes `stop()` after `start()` (or the one-shot run) returns.
    pub async fn stop(&self, service_name: &str) {
        let Some((_, mut entry)) = self.entries.remove(service_name) else {
            debug!(service = service_name, "no active entry, nothing to stop");
            return;
        };

        match entry.timer.as_mut() {
            Some(timer) => {
                timer.cancel().await;
                if self.registry.contains(&entry.instance_name) {
                    if let Some(service) = entry.service.take() {
                        stop_service(service_name, &*service).await;
                    }
                }
            }
            None => debug!(service = service_name, "stop requested while starting"),
        }

        self.retired.insert(
            service_name.to_string(),
            Retired {
                state: ServiceState::Stopped,
                instance_name: entry.instance_name,
            },
        );
        metrics::set_active_services(self.entries.len());
        info!(service = service_name, "service stopped");
    }

    /// Stops every active service, one after another, then drops all
    /// scheduler bookkeeping. Instances are not destroyed.
    pub async fn stop_all(&self) {
        let names = self.active_services();
        info!(count = names.len(), "stopping background services");
        for name in names {
            self.stop(&name).await;
        }
        self.entries.clear();
        metrics::set_active_services(0);
    }

    /// The service behind `service_name`: the active entry's handle, else the
    /// registry-tracked instance. Never starts anything.
    #[must_use]
    pub fn get_service(&self, service_name: &str) -> Option<Arc<dyn BackgroundService>> {
        if let Some(service) = self
            .entries
            .get(service_name)
            .and_then(|entry| entry.service.clone())
        {
            return Some(service);
        }

        let instance_name = match self.retired.get(service_name) {
            Some(retired) => retired.instance_name.clone(),
            None => canonical_name(service_name, Some(DEFAULT_LOCAL)),
        };
        let record = self.registry.record(&instance_name)?;
        record.descriptor().as_service(record.object())
    }

    #[must_use]
    pub fn state(&self, service_name: &str) -> ServiceState {
        if let Some(entry) = self.entries.get(service_name) {
            return entry.state;
        }
        self.retired
            .get(service_name)
            .map_or(ServiceState::Unstarted, |retired| retired.state)
    }

    /// Names of services with an active entry.
    #[must_use]
    pub fn active_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("active", &self.entries.len())
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

async fn stop_service(service_name: &str, service: &dyn BackgroundService) {
    if let Err(err) = service.stop().await {
        warn!(service = service_name, error = %err, "stop hook failed");
    }
}

#[cfg(test)]
mod tests;
