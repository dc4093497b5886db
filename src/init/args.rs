// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

use crate::ingest::{IngestConfig, RunMode};
use crate::runtime::DEFAULT_CONTAINERS_ROOT;
use crate::storage::SqliteSinkFactory;
use crate::supervisor::{SelfTag, SupervisorConfig, WorkerSettings};

#[derive(Debug, Args, Clone)]
pub struct RuntimeArgs {
    /// Docker containers state directory
    #[arg(long, env = "LOGSQL_CONTAINERS_ROOT", default_value = DEFAULT_CONTAINERS_ROOT)]
    pub containers_root: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    /// SQLite database file records are written to
    #[arg(long, env = "LOGSQL_DATABASE", default_value = "/var/lib/logsql/logs.db")]
    pub database: PathBuf,

    /// Maximum lines per storage write
    #[arg(long, env = "LOGSQL_BATCH_SIZE", default_value = "1000")]
    pub batch_size: usize,

    /// Sleep between polls when a log has no new lines
    #[arg(long, env = "LOGSQL_POLL_INTERVAL", default_value = "1s")]
    pub poll_interval: humantime::Duration,
}

impl WorkerArgs {
    pub fn sink_factory(&self) -> SqliteSinkFactory {
        SqliteSinkFactory::new(&self.database)
    }

    pub fn settings(&self, mode: RunMode, reset_on_launch: bool) -> WorkerSettings {
        WorkerSettings {
            ingest: IngestConfig {
                batch_size: self.batch_size,
                poll_interval: self.poll_interval.into(),
                mode,
            },
            reset_on_launch,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct StartArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(flatten)]
    pub worker: WorkerArgs,

    /// Time between reconciliation scans
    #[arg(long, env = "LOGSQL_INTERVAL", default_value = "60s")]
    pub interval: humantime::Duration,

    /// Containers whose name contains this tag are never tailed
    #[arg(long, env = "LOGSQL_SELF_TAG", default_value = "logsql")]
    pub self_tag: String,

    /// Delete each container's offset file before tailing it
    #[arg(long, env = "LOGSQL_RESET", default_value = "false")]
    pub reset: bool,
}

impl StartArgs {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            interval: self.interval.into(),
            self_tag: SelfTag::new(&self.self_tag),
            ..Default::default()
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct IngestArgs {
    /// Container to tail
    pub container_id: String,

    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(flatten)]
    pub worker: WorkerArgs,

    /// Stop once the log has no new lines
    #[arg(long, default_value = "false")]
    pub once: bool,

    /// Delete the offset file before tailing
    #[arg(long, env = "LOGSQL_RESET", default_value = "false")]
    pub reset: bool,
}

impl IngestArgs {
    pub fn mode(&self) -> RunMode {
        if self.once {
            RunMode::Once
        } else {
            RunMode::Continuous
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct ResetArgs {
    #[command(flatten)]
    pub runtime: RuntimeArgs,
}
