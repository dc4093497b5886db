// SPDX-License-Identifier: Apache-2.0

//! Starting workers. Each worker tails one target on its own OS thread with
//! its own tailer and storage connection, so a failure stays with that target.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{error, info, info_span, warn};

use crate::ingest::{self, IngestConfig, IngestStats, Ingestor, Transform};
use crate::storage::SinkFactory;
use crate::tail::{OffsetFile, Tailer};
use crate::target::Target;

/// Liveness view of a launched worker
pub trait WorkerHandle: Send {
    fn is_running(&self) -> bool;
}

pub trait WorkerLauncher: Send {
    fn launch(&self, target: Target) -> io::Result<Box<dyn WorkerHandle>>;
}

#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    pub ingest: IngestConfig,
    /// Delete the target's offset file before tailing
    pub reset_on_launch: bool,
}

/// Run one worker to completion on the calling thread.
pub fn run_worker(
    target: Target,
    sinks: &dyn SinkFactory,
    transform: Arc<dyn Transform>,
    settings: &WorkerSettings,
) -> ingest::Result<IngestStats> {
    if settings.reset_on_launch && OffsetFile::remove(&target.log_path)? {
        warn!(container = %target, "Removed offset file, reading from the start");
    }

    let sink = sinks.open()?;
    let tailer = Tailer::open(&target.log_path)?;
    Ingestor::new(target, tailer, sink, transform, settings.ingest.clone()).run()
}

struct ThreadHandle(JoinHandle<()>);

impl WorkerHandle for ThreadHandle {
    fn is_running(&self) -> bool {
        !self.0.is_finished()
    }
}

pub struct ThreadLauncher {
    sinks: Arc<dyn SinkFactory>,
    transform: Arc<dyn Transform>,
    settings: WorkerSettings,
}

impl ThreadLauncher {
    pub fn new(
        sinks: Arc<dyn SinkFactory>,
        transform: Arc<dyn Transform>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            sinks,
            transform,
            settings,
        }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, target: Target) -> io::Result<Box<dyn WorkerHandle>> {
        let sinks = self.sinks.clone();
        let transform = self.transform.clone();
        let settings = self.settings.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{}", target.short_id()))
            .spawn(move || {
                let span = info_span!("worker", container = %target);
                let _guard = span.enter();

                match run_worker(target, sinks.as_ref(), transform, &settings) {
                    Ok(stats) => info!(
                        batches = stats.batches,
                        records = stats.records,
                        "Worker finished"
                    ),
                    Err(e) if e.is_not_found() => warn!(error = %e, "Log file removed, worker exiting"),
                    Err(e) => error!(error = %e, "Worker failed"),
                }
            })?;

        Ok(Box::new(ThreadHandle(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{Identity, RunMode};
    use crate::storage::MemorySink;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn once() -> WorkerSettings {
        WorkerSettings {
            ingest: IngestConfig {
                mode: RunMode::Once,
                ..Default::default()
            },
            reset_on_launch: false,
        }
    }

    #[test]
    fn test_thread_launcher_runs_worker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc-json.log");
        fs::write(&path, "{\"log\":\"one\"}\n{\"log\":\"two\"}\n").unwrap();

        let sink = MemorySink::new();
        let launcher = ThreadLauncher::new(Arc::new(sink.clone()), Arc::new(Identity), once());
        let handle = launcher.launch(Target::new("abc", "web", &path)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert!(!handle.is_running());
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_failed_worker_stays_on_its_thread() {
        let dir = tempdir().unwrap();
        let launcher = ThreadLauncher::new(Arc::new(MemorySink::new()), Arc::new(Identity), once());
        let handle = launcher
            .launch(Target::new("abc", "web", dir.path().join("missing.log")))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!handle.is_running());
    }

    #[test]
    fn test_reset_on_launch_rereads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc-json.log");
        fs::write(&path, "{\"n\":1}\n").unwrap();

        let sink = MemorySink::new();
        let target = Target::new("abc", "web", &path);
        run_worker(target.clone(), &sink, Arc::new(Identity), &once()).unwrap();
        run_worker(target.clone(), &sink, Arc::new(Identity), &once()).unwrap();
        assert_eq!(sink.records().len(), 1);

        let settings = WorkerSettings {
            reset_on_launch: true,
            ..once()
        };
        run_worker(target, &sink, Arc::new(Identity), &settings).unwrap();
        assert_eq!(sink.records().len(), 2);
    }

    #[test]
    fn test_invalid_offset_file_fails_worker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc-json.log");
        fs::write(&path, "{\"n\":1}\n").unwrap();
        fs::write(OffsetFile::path_for(&path), "garbage\n").unwrap();

        let sink = MemorySink::new();
        let err = run_worker(Target::new("abc", "web", &path), &sink, Arc::new(Identity), &once())
            .unwrap_err();
        assert!(matches!(err, ingest::Error::Tail(_)));

        assert!(OffsetFile::remove(&path).unwrap());
        run_worker(Target::new("abc", "web", &path), &sink, Arc::new(Identity), &once()).unwrap();
        assert_eq!(sink.records().len(), 1);
    }
}
