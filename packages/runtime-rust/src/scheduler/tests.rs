use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use stagehand_core::{
    BackgroundService, ClassDescriptor, ClassRegistry, Component, Datastores, JsonConfig,
    ManagedRef,
};

use super::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Shared counters, registered as `test::Tally:default` and injected into
/// every test service so counts survive service destruction.
#[derive(Default)]
struct Tally {
    starts: AtomicUsize,
    runs: AtomicUsize,
    stops: AtomicUsize,
}

impl Component for Tally {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<Tally>().fqn("test::Tally").build()
    }
}

fn set_tally<T: Tallied>(this: &T, tally: ManagedRef<Tally>) {
    let _ = this.slot().set(tally);
}

trait Tallied {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>>;

    fn tally(&self) -> Arc<Tally> {
        self.slot().get().and_then(ManagedRef::get).unwrap()
    }
}

#[derive(Default)]
struct OneShot {
    tally: OnceLock<ManagedRef<Tally>>,
}

impl Tallied for OneShot {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>> {
        &self.tally
    }
}

#[async_trait]
impl BackgroundService for OneShot {
    async fn start(&self) -> anyhow::Result<()> {
        self.tally().starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.tally().runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.tally().stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Component for OneShot {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<OneShot>()
            .fqn("test::OneShot")
            .inject_managed("tally", None, vec![], set_tally::<OneShot>)
            .job(None)
            .build()
    }
}

/// Fires every second; `start()` resets the run counter.
#[derive(Default)]
struct Ticker {
    tally: OnceLock<ManagedRef<Tally>>,
    count: AtomicUsize,
}

impl Tallied for Ticker {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>> {
        &self.tally
    }
}

#[async_trait]
impl BackgroundService for Ticker {
    async fn start(&self) -> anyhow::Result<()> {
        self.count.store(0, Ordering::SeqCst);
        self.tally().starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.tally().runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.tally().stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn schedule(&self) -> Option<String> {
        Some("not a cron expression".to_string())
    }
}

impl Component for Ticker {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<Ticker>()
            .fqn("test::Ticker")
            .inject_managed("tally", None, vec![], set_tally::<Ticker>)
            .job(Some("* * * * * *"))
            .build()
    }
}

/// Declares no schedule on the class; the service reports its own.
#[derive(Default)]
struct SelfScheduled;

#[async_trait]
impl BackgroundService for SelfScheduled {
    async fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn schedule(&self) -> Option<String> {
        Some("*/30 * * * *".to_string())
    }
}

impl Component for SelfScheduled {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<SelfScheduled>()
            .fqn("test::SelfScheduled")
            .job(None)
            .build()
    }
}

#[derive(Default)]
struct Grumpy;

#[async_trait]
impl BackgroundService for Grumpy {
    async fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("refusing to start")
    }

    async fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Component for Grumpy {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<Grumpy>()
            .fqn("test::Grumpy")
            .job(Some("* * * * * *"))
            .build()
    }
}

#[derive(Default)]
struct BadCron {
    tally: OnceLock<ManagedRef<Tally>>,
}

impl Tallied for BadCron {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>> {
        &self.tally
    }
}

#[async_trait]
impl BackgroundService for BadCron {
    async fn start(&self) -> anyhow::Result<()> {
        self.tally().starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl Component for BadCron {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<BadCron>()
            .fqn("test::BadCron")
            .inject_managed("tally", None, vec![], set_tally::<BadCron>)
            .job(Some("every tuesday"))
            .build()
    }
}

/// One-shot whose run outlasts a stop issued right after it starts.
#[derive(Default)]
struct SlowRun {
    tally: OnceLock<ManagedRef<Tally>>,
}

impl Tallied for SlowRun {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>> {
        &self.tally
    }
}

#[async_trait]
impl BackgroundService for SlowRun {
    async fn start(&self) -> anyhow::Result<()> {
        self.tally().starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.tally().runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.tally().stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Component for SlowRun {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<SlowRun>()
            .fqn("test::SlowRun")
            .inject_managed("tally", None, vec![], set_tally::<SlowRun>)
            .job(None)
            .build()
    }
}

/// Recurring service with a slow `start()`.
#[derive(Default)]
struct SlowStart {
    tally: OnceLock<ManagedRef<Tally>>,
}

impl Tallied for SlowStart {
    fn slot(&self) -> &OnceLock<ManagedRef<Tally>> {
        &self.tally
    }
}

#[async_trait]
impl BackgroundService for SlowStart {
    async fn start(&self) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.tally().starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        self.tally().runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        // Start must have completed before stop runs.
        assert_eq!(self.tally().starts.load(Ordering::SeqCst), 1);
        self.tally().stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Component for SlowStart {
    fn describe() -> ClassDescriptor {
        ClassDescriptor::with_default::<SlowStart>()
            .fqn("test::SlowStart")
            .inject_managed("tally", None, vec![], set_tally::<SlowStart>)
            .job(Some("* * * * * *"))
            .build()
    }
}

fn scheduler() -> Scheduler {
    let registry = InstanceRegistry::new(
        Arc::new(ClassRegistry::new()),
        Arc::new(JsonConfig::new(json!({}))),
        Arc::new(Datastores::new()),
    );
    Scheduler::new(Arc::new(registry))
}

fn register<T: Component>(scheduler: &Scheduler) {
    scheduler.registry().classes().register_component::<T>();
}

fn tally(scheduler: &Scheduler) -> Arc<Tally> {
    scheduler
        .registry()
        .get_instance::<Tally>("test::Tally")
        .unwrap()
}

fn ticker(scheduler: &Scheduler) -> Arc<Ticker> {
    scheduler
        .registry()
        .get_instance::<Ticker>("test::Ticker")
        .unwrap()
}

// ---------------------------------------------------------------------------
// One-shot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_shot_runs_once_and_is_retired() {
    let scheduler = scheduler();
    register::<OneShot>(&scheduler);

    scheduler.start("test::OneShot", None, vec![]).await;

    let tally = tally(&scheduler);
    assert_eq!(tally.starts.load(Ordering::SeqCst), 1);
    assert_eq!(tally.runs.load(Ordering::SeqCst), 1);
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);

    assert!(!scheduler.registry().contains("test::OneShot"));
    assert!(scheduler.get_service("test::OneShot").is_none());
    assert_eq!(scheduler.state("test::OneShot"), ServiceState::Completed);
    assert!(scheduler.active_services().is_empty());
}

#[tokio::test]
async fn completed_one_shot_can_run_again() {
    let scheduler = scheduler();
    register::<OneShot>(&scheduler);

    scheduler.start("test::OneShot", None, vec![]).await;
    scheduler.start("test::OneShot", None, vec![]).await;

    assert_eq!(tally(&scheduler).runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn service_name_can_differ_from_class() {
    let scheduler = scheduler();
    register::<OneShot>(&scheduler);

    scheduler
        .start("nightly-report", Some("test::OneShot"), vec![])
        .await;

    assert_eq!(tally(&scheduler).runs.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state("nightly-report"), ServiceState::Completed);
}

// ---------------------------------------------------------------------------
// Recurring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recurring_service_fires_every_second() {
    let scheduler = scheduler();
    register::<Ticker>(&scheduler);

    scheduler.start("test::Ticker", None, vec![]).await;
    assert_eq!(scheduler.state("test::Ticker"), ServiceState::Recurring);

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    let runs = ticker(&scheduler).count.load(Ordering::SeqCst);
    assert!(runs >= 5, "expected at least 5 runs, got {runs}");

    scheduler.stop("test::Ticker").await;
}

#[tokio::test]
async fn descriptor_schedule_wins_over_service_schedule() {
    // Ticker::schedule() is not a valid expression; the class schedule is used.
    let scheduler = scheduler();
    register::<Ticker>(&scheduler);
    register::<SelfScheduled>(&scheduler);

    scheduler.start_all().await;

    assert_eq!(scheduler.state("test::Ticker"), ServiceState::Recurring);
    assert_eq!(scheduler.state("test::SelfScheduled"), ServiceState::Recurring);
    scheduler.stop_all().await;
}

#[tokio::test]
async fn stop_then_start_resets_the_service() {
    let scheduler = scheduler();
    register::<Ticker>(&scheduler);

    scheduler.start("test::Ticker", None, vec![]).await;
    tokio::time::sleep(Duration::from_millis(2_300)).await;
    scheduler.stop("test::Ticker").await;

    let before = ticker(&scheduler).count.load(Ordering::SeqCst);
    assert!(before >= 1, "expected the ticker to have fired, got {before}");
    assert_eq!(tally(&scheduler).stops.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state("test::Ticker"), ServiceState::Stopped);

    // Stop only disarms: no further firings.
    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(ticker(&scheduler).count.load(Ordering::SeqCst), before);

    scheduler.start("test::Ticker", None, vec![]).await;
    assert_eq!(tally(&scheduler).starts.load(Ordering::SeqCst), 2);
    assert!(ticker(&scheduler).count.load(Ordering::SeqCst) <= 1);
    scheduler.stop("test::Ticker").await;
}

#[tokio::test]
async fn destroyed_service_is_reconstructed_on_start() {
    let scheduler = scheduler();
    register::<Ticker>(&scheduler);

    scheduler.start("test::Ticker", None, vec![]).await;
    let first = ticker(&scheduler);
    scheduler.stop("test::Ticker").await;
    scheduler.registry().destroy(["test::Ticker"]).await;

    scheduler.start("test::Ticker", None, vec![]).await;
    let second = ticker(&scheduler);
    assert!(!Arc::ptr_eq(&first, &second));
    scheduler.stop("test::Ticker").await;
}

#[tokio::test]
async fn double_start_is_noop() {
    let scheduler = scheduler();
    register::<Ticker>(&scheduler);

    tokio::join!(
        scheduler.start("test::Ticker", None, vec![]),
        scheduler.start("test::Ticker", None, vec![]),
    );
    scheduler.start("test::Ticker", None, vec![]).await;

    assert_eq!(tally(&scheduler).starts.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.active_services(), vec!["test::Ticker".to_string()]);
    scheduler.stop_all().await;
}

#[tokio::test]
async fn stop_during_one_shot_run_calls_stop_once() {
    let scheduler = scheduler();
    register::<SlowRun>(&scheduler);

    tokio::join!(scheduler.start("test::SlowRun", None, vec![]), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop("test::SlowRun").await;
    });

    let tally = tally(&scheduler);
    assert_eq!(tally.starts.load(Ordering::SeqCst), 1);
    assert_eq!(tally.runs.load(Ordering::SeqCst), 1);
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
    assert!(scheduler.active_services().is_empty());
}

#[tokio::test]
async fn stop_during_start_hook_defers_stop_and_never_arms() {
    let scheduler = scheduler();
    register::<SlowStart>(&scheduler);

    tokio::join!(scheduler.start("test::SlowStart", None, vec![]), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.stop("test::SlowStart").await;
    });

    let tally = tally(&scheduler);
    assert_eq!(tally.starts.load(Ordering::SeqCst), 1);
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.state("test::SlowStart"), ServiceState::Stopped);
    assert!(scheduler.active_services().is_empty());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(tally.runs.load(Ordering::SeqCst), 0);
    assert_eq!(tally.stops.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Bulk operations and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_all_then_stop_all_leaves_no_active_entries() {
    let scheduler = scheduler();
    register::<OneShot>(&scheduler);
    register::<Ticker>(&scheduler);
    register::<Tally>(&scheduler);

    scheduler.start_all().await;
    assert_eq!(scheduler.active_services(), vec!["test::Ticker".to_string()]);

    scheduler.stop_all().await;
    assert!(scheduler.active_services().is_empty());

    // The stopped recurring instance stays reachable until destroyed.
    assert!(scheduler.get_service("test::Ticker").is_some());
    scheduler.registry().destroy(["test::Ticker"]).await;
    assert!(scheduler.get_service("test::Ticker").is_none());
}

#[tokio::test]
async fn failing_service_does_not_block_others() {
    let scheduler = scheduler();
    register::<Grumpy>(&scheduler);
    register::<OneShot>(&scheduler);

    scheduler.start_all().await;

    assert_eq!(scheduler.state("test::Grumpy"), ServiceState::Unstarted);
    assert!(!scheduler.registry().contains("test::Grumpy"));
    assert!(scheduler.get_service("test::Grumpy").is_none());
    assert_eq!(scheduler.state("test::OneShot"), ServiceState::Completed);
    assert!(scheduler.active_services().is_empty());
}

#[tokio::test]
async fn unknown_class_is_a_startup_failure() {
    let scheduler = scheduler();
    scheduler.start("test::Nowhere", None, vec![]).await;

    assert_eq!(scheduler.state("test::Nowhere"), ServiceState::Unstarted);
    assert!(scheduler.get_service("test::Nowhere").is_none());
}

#[tokio::test]
async fn non_service_class_is_a_startup_failure() {
    let scheduler = scheduler();
    register::<Tally>(&scheduler);
    scheduler.start("test::Tally", None, vec![]).await;

    assert_eq!(scheduler.state("test::Tally"), ServiceState::Unstarted);
}

#[tokio::test]
async fn invalid_cron_fails_before_start_hook() {
    let scheduler = scheduler();
    register::<BadCron>(&scheduler);
    scheduler.start("test::BadCron", None, vec![]).await;

    assert_eq!(scheduler.state("test::BadCron"), ServiceState::Unstarted);
    assert_eq!(tally(&scheduler).starts.load(Ordering::SeqCst), 0);
    assert!(!scheduler.registry().contains("test::BadCron"));
    assert!(scheduler.get_service("test::BadCron").is_none());
}

#[tokio::test]
async fn stop_unknown_service_is_noop() {
    let scheduler = scheduler();
    scheduler.stop("test::Nowhere").await;
    assert_eq!(scheduler.state("test::Nowhere"), ServiceState::Unstarted);
}
