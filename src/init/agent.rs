// SPDX-License-Identifier: Apache-2.0

//! Wires the command line onto the runtime, storage and supervisor.

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::ingest::{Identity, IngestStats, RunMode};
use crate::init::args::{IngestArgs, ResetArgs, StartArgs};
use crate::runtime::{ContainerRuntime, DockerDirRuntime};
use crate::storage::SqliteSink;
use crate::supervisor::{Supervisor, ThreadLauncher, reset_offsets, run_worker};

pub struct Agent {
    config: Box<StartArgs>,
}

impl Agent {
    pub fn new(config: Box<StartArgs>) -> Self {
        Self { config }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), Box<dyn Error + Send + Sync>> {
        let sinks = self.config.worker.sink_factory();
        // Fail at startup, not in every worker, if the database is unusable.
        SqliteSink::open(sinks.path())?;
        info!(database = ?sinks.path(), "Log database ready");

        let runtime = Arc::new(DockerDirRuntime::new(&self.config.runtime.containers_root));
        let launcher = ThreadLauncher::new(
            Arc::new(sinks),
            Arc::new(Identity),
            self.config
                .worker
                .settings(RunMode::Continuous, self.config.reset),
        );

        Supervisor::new(runtime, Box::new(launcher), self.config.supervisor_config())
            .run(cancel)
            .await
    }
}

/// Tail a single container in the foreground.
pub fn run_ingest(args: &IngestArgs) -> Result<IngestStats, Box<dyn Error + Send + Sync>> {
    let runtime = DockerDirRuntime::new(&args.runtime.containers_root);
    let target = runtime
        .inspect(&args.container_id)?
        .into_target()
        .ok_or_else(|| format!("container {} has no log path", args.container_id))?;

    let sinks = args.worker.sink_factory();
    let settings = args.worker.settings(args.mode(), args.reset);
    Ok(run_worker(target, &sinks, Arc::new(Identity), &settings)?)
}

/// Remove the offset file of every known container.
pub fn run_reset(args: &ResetArgs) -> Result<Vec<PathBuf>, Box<dyn Error + Send + Sync>> {
    let runtime = DockerDirRuntime::new(&args.runtime.containers_root);
    Ok(reset_offsets(&runtime)?)
}
