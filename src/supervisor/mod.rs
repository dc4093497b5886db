// SPDX-License-Identifier: Apache-2.0

//! Keeps one worker alive per container.
//!
//! Containers are discovered three ways: a scan at startup, start events from
//! the runtime, and a periodic reconciliation scan that catches anything the
//! event feed missed. The supervisor loop is the only owner of the worker
//! registry, so every adoption goes through one membership check.

pub mod launcher;
pub mod registry;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::task::{JoinError, spawn_blocking};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::{BoundedSender, SendError, bounded};
use crate::runtime::{self, ContainerRuntime, EventFeed};
use crate::tail::OffsetFile;

pub use launcher::{ThreadLauncher, WorkerHandle, WorkerLauncher, WorkerSettings, run_worker};
pub use registry::{Liveness, WorkerRegistry};

pub const DEFAULT_SELF_TAG: &str = "logsql";
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_EVENT_POLL: Duration = Duration::from_secs(1);

const EVENT_CHANNEL_SIZE: usize = 128;

/// How a container came to the supervisor's attention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Startup,
    Event,
    Reconcile,
}

/// Case-insensitive name marker for the collector's own containers.
#[derive(Debug, Clone)]
pub struct SelfTag(String);

impl SelfTag {
    pub fn new(tag: &str) -> Self {
        Self(tag.to_lowercase())
    }

    pub fn matches(&self, name: &str) -> bool {
        !self.0.is_empty() && name.to_lowercase().contains(&self.0)
    }
}

impl Default for SelfTag {
    fn default() -> Self {
        Self::new(DEFAULT_SELF_TAG)
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between reconciliation scans
    pub interval: Duration,
    pub self_tag: SelfTag,
    /// How long the event task waits on the feed before checking for shutdown
    pub event_poll: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            self_tag: SelfTag::default(),
            event_poll: DEFAULT_EVENT_POLL,
        }
    }
}

pub struct Supervisor {
    runtime: Arc<dyn ContainerRuntime>,
    launcher: Box<dyn WorkerLauncher>,
    registry: WorkerRegistry,
    config: SupervisorConfig,
}

impl Supervisor {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        launcher: Box<dyn WorkerLauncher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            runtime,
            launcher,
            registry: WorkerRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Adopt every eligible container. Returns the number adopted.
    pub fn startup_scan(&mut self) -> usize {
        self.scan(Discovery::Startup)
    }

    /// Adopt anything the event feed missed, then check on the workers.
    pub fn reconcile(&mut self) -> usize {
        let adopted = self.scan(Discovery::Reconcile);
        self.poll_workers();
        adopted
    }

    fn scan(&mut self, discovery: Discovery) -> usize {
        let containers = match self.runtime.list_all() {
            Ok(containers) => containers,
            Err(e) => {
                error!(error = %e, "Failed to list containers");
                return 0;
            }
        };

        containers
            .iter()
            .filter(|c| self.adopt(&c.id, &c.name, discovery))
            .count()
    }

    /// Start a worker for the container unless it is already tracked, is one
    /// of ours, or has no log file. Returns true if a worker was started.
    pub fn adopt(&mut self, id: &str, name: &str, discovery: Discovery) -> bool {
        if self.registry.contains(id) {
            return false;
        }

        if self.config.self_tag.matches(name) {
            if discovery == Discovery::Startup {
                info!(container = name, id, "Skipping own container");
            } else {
                debug!(container = name, id, "Skipping own container");
            }
            return false;
        }

        let info = match self.runtime.inspect(id) {
            Ok(info) => info,
            Err(e) => {
                error!(container = name, id, error = %e, "Failed to inspect container");
                return false;
            }
        };
        let Some(target) = info.into_target() else {
            warn!(container = name, id, "Container has no log path, skipping");
            return false;
        };

        match discovery {
            Discovery::Startup => info!(container = %target, "Adding container"),
            Discovery::Event => info!(container = %target, "Container started, adding"),
            Discovery::Reconcile => warn!(container = %target, "Manually adding container"),
        }

        match self.launcher.launch(target.clone()) {
            Ok(handle) => self.registry.insert(target, handle),
            Err(e) => {
                error!(container = %target, error = %e, "Failed to start worker");
                false
            }
        }
    }

    /// Log worker liveness. Exited workers are reported once and not restarted.
    pub fn poll_workers(&mut self) {
        for (target, liveness) in self.registry.poll() {
            match liveness {
                Liveness::Running => debug!(container = %target, "Worker is still running"),
                Liveness::Exited => warn!(container = %target, "Worker exited, not restarting"),
                Liveness::Gone => {}
            }
        }
    }

    /// Supervise until `cancel` fires.
    ///
    /// Scans and adoptions read the runtime's state and start threads, so they
    /// run on the blocking pool with the supervisor moved in and back out.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
        // Subscribe before the startup scan so a container starting in between is not missed.
        let runtime = self.runtime.clone();
        let feed = spawn_blocking(move || runtime.subscribe_events()).await??;
        let (events_tx, mut events_rx) = bounded(EVENT_CHANNEL_SIZE);
        let events = spawn_blocking({
            let cancel = cancel.clone();
            let self_tag = self.config.self_tag.clone();
            let poll = self.config.event_poll;
            move || forward_events(feed, events_tx, cancel, self_tag, poll)
        });

        let (mut this, adopted) = self.blocking(Self::startup_scan).await?;
        info!(adopted, "Startup scan complete");

        let period = this.config.interval;
        let mut reconcile = interval_at(Instant::now() + period, period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                Some((id, name)) = events_rx.next() => {
                    (this, _) = this
                        .blocking(move |s| s.adopt(&id, &name, Discovery::Event))
                        .await?;
                }

                _ = reconcile.tick() => {
                    debug!("Reconciling containers");
                    (this, _) = this.blocking(Self::reconcile).await?;
                }
            }
        }

        info!(workers = this.registry.len(), "Supervisor stopping");
        match events.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Event feed failed"),
            Err(e) => error!(error = %e, "Event task panicked"),
        }
        Ok(())
    }

    async fn blocking<R, F>(mut self, f: F) -> Result<(Self, R), JoinError>
    where
        F: FnOnce(&mut Self) -> R + Send + 'static,
        R: Send + 'static,
    {
        spawn_blocking(move || {
            let out = f(&mut self);
            (self, out)
        })
        .await
    }
}

/// Forward container start events until cancelled or the feed fails.
fn forward_events(
    mut feed: Box<dyn EventFeed>,
    tx: BoundedSender<(String, String)>,
    cancel: CancellationToken,
    self_tag: SelfTag,
    poll: Duration,
) -> runtime::Result<()> {
    while !cancel.is_cancelled() {
        let Some(event) = feed.next_event(poll)? else {
            continue;
        };
        debug!(?event, "Runtime event");

        if !event.is_container_start() {
            continue;
        }
        let name = event.name().unwrap_or_default().to_string();
        if self_tag.matches(&name) {
            continue;
        }

        let item = (event.id, name);
        loop {
            match tx.send_timeout(item.clone(), poll) {
                Ok(()) => break,
                Err(SendError::Timeout) if !cancel.is_cancelled() => continue,
                Err(_) => return Ok(()),
            }
        }
    }

    debug!("Event feed stopped");
    Ok(())
}

/// Delete the offset file of every container the runtime knows about.
/// Returns the offset files that were removed.
pub fn reset_offsets(runtime: &dyn ContainerRuntime) -> runtime::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for container in runtime.list_all()? {
        let info = match runtime.inspect(&container.id) {
            Ok(info) => info,
            Err(e) => {
                error!(container = %container.name, error = %e, "Failed to inspect container");
                continue;
            }
        };
        let Some(log_path) = info.log_path else {
            continue;
        };

        let path = OffsetFile::path_for(&log_path);
        match OffsetFile::remove(&log_path) {
            Ok(true) => {
                warn!(path = ?path, "Removing offset file");
                removed.push(path);
            }
            Ok(false) => {}
            Err(e) => error!(path = ?path, error = %e, "Failed to remove offset file"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ContainerInfo, ContainerSummary, RuntimeEvent};
    use crate::target::Target;
    use std::collections::HashMap;
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct FakeState {
        containers: Vec<ContainerInfo>,
        fail_list: bool,
        list_delay: Duration,
        events: Option<flume::Receiver<RuntimeEvent>>,
    }

    #[derive(Clone, Default)]
    struct FakeRuntime {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeRuntime {
        fn add(&self, id: &str, name: &str, log_path: Option<&str>) {
            self.state.lock().unwrap().containers.push(ContainerInfo {
                id: id.to_string(),
                name: name.to_string(),
                log_path: log_path.map(PathBuf::from),
            });
        }

        fn event_sender(&self) -> flume::Sender<RuntimeEvent> {
            let (tx, rx) = flume::unbounded();
            self.state.lock().unwrap().events = Some(rx);
            tx
        }
    }

    struct FakeFeed(flume::Receiver<RuntimeEvent>);

    impl EventFeed for FakeFeed {
        fn next_event(&mut self, timeout: Duration) -> runtime::Result<Option<RuntimeEvent>> {
            match self.0.recv_timeout(timeout) {
                Ok(event) => Ok(Some(event)),
                Err(flume::RecvTimeoutError::Timeout) => Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    Err(runtime::Error::Events("closed".to_string()))
                }
            }
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn list_all(&self) -> runtime::Result<Vec<ContainerSummary>> {
            let delay = self.state.lock().unwrap().list_delay;
            std::thread::sleep(delay);

            let state = self.state.lock().unwrap();
            if state.fail_list {
                return Err(runtime::Error::Events("daemon unavailable".to_string()));
            }
            Ok(state
                .containers
                .iter()
                .map(|c| ContainerSummary {
                    id: c.id.clone(),
                    name: c.name.clone(),
                })
                .collect())
        }

        fn inspect(&self, id: &str) -> runtime::Result<ContainerInfo> {
            let state = self.state.lock().unwrap();
            state
                .containers
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| runtime::Error::NotFound(id.to_string()))
        }

        fn subscribe_events(&self) -> runtime::Result<Box<dyn EventFeed>> {
            let rx = self.state.lock().unwrap().events.take();
            let rx = rx.unwrap_or_else(|| flume::unbounded().1);
            Ok(Box::new(FakeFeed(rx)))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingLauncher {
        launched: Arc<Mutex<Vec<Target>>>,
        alive: Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>,
        refuse: Arc<AtomicBool>,
    }

    impl RecordingLauncher {
        fn launched_ids(&self) -> Vec<String> {
            let launched = self.launched.lock().unwrap();
            launched.iter().map(|t| t.id.clone()).collect()
        }

        fn kill(&self, id: &str) {
            self.alive.lock().unwrap()[id].store(false, Ordering::SeqCst);
        }
    }

    struct FlagHandle(Arc<AtomicBool>);

    impl WorkerHandle for FlagHandle {
        fn is_running(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl WorkerLauncher for RecordingLauncher {
        fn launch(&self, target: Target) -> io::Result<Box<dyn WorkerHandle>> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::other("no threads left"));
            }
            let flag = Arc::new(AtomicBool::new(true));
            self.alive
                .lock()
                .unwrap()
                .insert(target.id.clone(), flag.clone());
            self.launched.lock().unwrap().push(target);
            Ok(Box::new(FlagHandle(flag)))
        }
    }

    fn supervisor(runtime: &FakeRuntime, launcher: &RecordingLauncher) -> Supervisor {
        Supervisor::new(
            Arc::new(runtime.clone()),
            Box::new(launcher.clone()),
            SupervisorConfig {
                interval: Duration::from_millis(50),
                event_poll: Duration::from_millis(20),
                ..Default::default()
            },
        )
    }

    fn count_lines(lines: &[&str], needle: &str) -> usize {
        lines.iter().filter(|l| l.contains(needle)).count()
    }

    #[test]
    fn test_self_tag() {
        let tag = SelfTag::default();
        assert!(tag.matches("logsql"));
        assert!(tag.matches("LogSQL-collector"));
        assert!(!tag.matches("web"));
        assert!(!SelfTag::new("").matches("web"));
    }

    #[traced_test]
    #[test]
    fn test_startup_scan_adopts_eligible() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        runtime.add("bbb", "logsql", Some("/logs/bbb-json.log"));
        runtime.add("ccc", "nolog", None);
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);

        assert_eq!(supervisor.startup_scan(), 1);
        assert_eq!(launcher.launched_ids(), vec!["aaa"]);
        assert!(logs_contain("Adding container"));
        assert!(logs_contain("Skipping own container"));
        assert!(logs_contain("no log path"));

        // nothing new the second time round
        assert_eq!(supervisor.reconcile(), 0);
        assert_eq!(launcher.launched_ids(), vec!["aaa"]);
        assert!(!logs_contain("Manually adding container"));
    }

    #[traced_test]
    #[test]
    fn test_reconcile_adopts_missed_at_warn() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);
        supervisor.startup_scan();

        runtime.add("ddd", "db", Some("/logs/ddd-json.log"));
        assert_eq!(supervisor.reconcile(), 1);
        assert_eq!(supervisor.reconcile(), 0);

        assert_eq!(launcher.launched_ids(), vec!["aaa", "ddd"]);
        logs_assert(|lines: &[&str]| {
            match count_lines(lines, "Manually adding container") {
                1 => Ok(()),
                n => Err(format!("expected one manual adoption, saw {n}")),
            }
        });
        assert!(logs_contain("WARN"));
    }

    #[test]
    fn test_event_adoption_is_idempotent() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);

        assert!(supervisor.adopt("aaa", "web", Discovery::Event));
        assert!(!supervisor.adopt("aaa", "web", Discovery::Event));
        assert!(!supervisor.adopt("aaa", "web", Discovery::Reconcile));
        assert_eq!(supervisor.startup_scan(), 0);
        assert_eq!(launcher.launched_ids(), vec!["aaa"]);
    }

    #[test]
    fn test_unknown_container_not_adopted() {
        let runtime = FakeRuntime::default();
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);

        assert!(!supervisor.adopt("zzz", "ghost", Discovery::Event));
        assert!(supervisor.registry().is_empty());
    }

    #[traced_test]
    #[test]
    fn test_exited_worker_reported_once() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);
        supervisor.startup_scan();

        supervisor.reconcile();
        assert!(logs_contain("Worker is still running"));

        launcher.kill("aaa");
        supervisor.reconcile();
        supervisor.reconcile();

        assert_eq!(launcher.launched_ids(), vec!["aaa"]);
        assert_eq!(supervisor.registry().running(), 0);
        logs_assert(|lines: &[&str]| {
            match count_lines(lines, "Worker exited, not restarting") {
                1 => Ok(()),
                n => Err(format!("expected one exit warning, saw {n}")),
            }
        });
    }

    #[traced_test]
    #[test]
    fn test_list_failure_is_logged() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        runtime.state.lock().unwrap().fail_list = true;
        let launcher = RecordingLauncher::default();
        let mut supervisor = supervisor(&runtime, &launcher);

        assert_eq!(supervisor.startup_scan(), 0);
        assert!(logs_contain("Failed to list containers"));

        runtime.state.lock().unwrap().fail_list = false;
        assert_eq!(supervisor.reconcile(), 1);
    }

    #[test]
    fn test_launch_failure_retried_later() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        let launcher = RecordingLauncher::default();
        launcher.refuse.store(true, Ordering::SeqCst);
        let mut supervisor = supervisor(&runtime, &launcher);

        assert_eq!(supervisor.startup_scan(), 0);
        assert!(!supervisor.registry().contains("aaa"));

        launcher.refuse.store(false, Ordering::SeqCst);
        assert_eq!(supervisor.reconcile(), 1);
    }

    #[tokio::test]
    async fn test_run_adopts_from_events_until_cancelled() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        let events = runtime.event_sender();
        let launcher = RecordingLauncher::default();
        let supervisor = Supervisor::new(
            Arc::new(runtime.clone()),
            Box::new(launcher.clone()),
            SupervisorConfig {
                interval: Duration::from_secs(3600),
                event_poll: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.launched_ids().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(launcher.launched_ids(), vec!["aaa"]);

        // reconciliation is an hour away, so only events can adopt these
        runtime.add("bbb", "api", Some("/logs/bbb-json.log"));
        runtime.add("ccc", "logsql-sidecar", Some("/logs/ccc-json.log"));
        events.send(RuntimeEvent::container_start("ccc", "logsql-sidecar")).unwrap();
        events
            .send(RuntimeEvent {
                action: "die".to_string(),
                ..RuntimeEvent::container_start("bbb", "api")
            })
            .unwrap();
        events.send(RuntimeEvent::container_start("bbb", "api")).unwrap();
        events.send(RuntimeEvent::container_start("bbb", "api")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.launched_ids().len() < 2 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // give a duplicate event the chance to slip through
        tokio::time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert!(result.is_ok());

        assert_eq!(launcher.launched_ids(), vec!["aaa", "bbb"]);
    }

    #[tokio::test]
    async fn test_run_keeps_scans_off_the_async_thread() {
        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", Some("/logs/aaa-json.log"));
        runtime.state.lock().unwrap().list_delay = Duration::from_millis(500);
        let launcher = RecordingLauncher::default();
        let supervisor = Supervisor::new(
            Arc::new(runtime.clone()),
            Box::new(launcher.clone()),
            SupervisorConfig {
                interval: Duration::from_secs(3600),
                event_poll: Duration::from_millis(20),
                ..Default::default()
            },
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervisor.run(cancel.clone()));

        // a scan on this single-threaded runtime would hold the timer back
        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(launcher.launched_ids().is_empty());

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.launched_ids().is_empty() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(launcher.launched_ids(), vec!["aaa"]);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("supervisor did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_reset_offsets_removes_existing_files() {
        let dir = tempdir().unwrap();
        let web = dir.path().join("aaa-json.log");
        let db = dir.path().join("bbb-json.log");
        fs::write(&web, "").unwrap();
        fs::write(&db, "").unwrap();
        fs::write(OffsetFile::path_for(&web), "1\n0\n").unwrap();

        let runtime = FakeRuntime::default();
        runtime.add("aaa", "web", web.to_str());
        runtime.add("bbb", "db", db.to_str());
        runtime.add("ccc", "nolog", None);

        let removed = reset_offsets(&runtime).unwrap();

        assert_eq!(removed, vec![OffsetFile::path_for(&web)]);
        assert!(!OffsetFile::path_for(&web).exists());
        assert!(web.exists());
    }
}
