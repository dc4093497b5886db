// SPDX-License-Identifier: Apache-2.0

//! Container runtime backed by the Docker engine's on-disk state.
//!
//! Every container has a directory `<root>/<id>/` holding a `config.v2.json`
//! with its id, name, log path and state. Listing and inspecting read those
//! files directly, stopped containers included. The event feed watches the
//! tree with `notify` and reports a `start` whenever a container turns up
//! running. Only config files and container directories are looked at, so log
//! appends and offset commits under the same tree cost nothing.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::runtime::error::{Error, Result};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSummary, EventFeed, RuntimeEvent};

pub const DEFAULT_CONTAINERS_ROOT: &str = "/var/lib/docker/containers";

const CONFIG_FILE: &str = "config.v2.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(rename = "ID")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    log_path: String,
    #[serde(default)]
    state: ContainerState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    running: bool,
}

impl ContainerConfig {
    fn name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }

    fn info(&self) -> ContainerInfo {
        ContainerInfo {
            id: self.id.clone(),
            name: self.name().to_string(),
            log_path: (!self.log_path.is_empty()).then(|| PathBuf::from(&self.log_path)),
        }
    }
}

fn read_config(dir: &Path) -> Result<Option<ContainerConfig>> {
    let path = dir.join(CONFIG_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| Error::InvalidConfig { path, source })
}

#[derive(Debug, Clone)]
pub struct DockerDirRuntime {
    root: PathBuf,
}

impl DockerDirRuntime {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Configs of every container, running or not. Unreadable entries are skipped.
    fn configs(&self) -> Result<Vec<ContainerConfig>> {
        let mut configs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match read_config(&entry.path()) {
                Ok(Some(config)) => configs.push(config),
                Ok(None) => {}
                Err(e) => warn!(dir = ?entry.path(), error = %e, "Skipping container"),
            }
        }
        Ok(configs)
    }
}

impl Default for DockerDirRuntime {
    fn default() -> Self {
        Self::new(DEFAULT_CONTAINERS_ROOT)
    }
}

impl ContainerRuntime for DockerDirRuntime {
    fn list_all(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .configs()?
            .into_iter()
            .map(|config| ContainerSummary {
                name: config.name().to_string(),
                id: config.id,
            })
            .collect())
    }

    fn inspect(&self, id: &str) -> Result<ContainerInfo> {
        // ids come from the command line; keep them inside the root
        let mut components = Path::new(id).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::InvalidId(id.to_string()));
        }

        match read_config(&self.root.join(id))? {
            Some(config) => Ok(config.info()),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    fn subscribe_events(&self) -> Result<Box<dyn EventFeed>> {
        Ok(Box::new(DockerDirFeed::new(self)?))
    }
}

/// Turns config file changes into container start events
pub struct DockerDirFeed {
    root: PathBuf,
    _watcher: RecommendedWatcher,
    receiver: Receiver<notify::Result<Event>>,
    running: HashSet<String>,
    pending: VecDeque<RuntimeEvent>,
}

impl DockerDirFeed {
    fn new(runtime: &DockerDirRuntime) -> Result<Self> {
        let root = fs::canonicalize(&runtime.root)?;
        let (tx, rx) = channel();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| Error::Events(e.to_string()))?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| Error::Events(e.to_string()))?;

        // Containers already running at subscription are not news.
        let running = runtime
            .configs()?
            .into_iter()
            .filter(|c| c.state.running)
            .map(|c| c.id)
            .collect();

        Ok(Self {
            root,
            _watcher: watcher,
            receiver: rx,
            running,
            pending: VecDeque::new(),
        })
    }

    /// Container directories whose config may have changed with `event`.
    ///
    /// Only the config file itself (a rename target included) and the
    /// container directory count. Logs and offset files live next to the
    /// config and change far more often.
    fn affected_dirs(&self, event: &Event) -> HashSet<PathBuf> {
        // our own config reads show up as access events
        match event.kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {}
            EventKind::Access(_) => return HashSet::new(),
            _ => {}
        }

        event
            .paths
            .iter()
            .filter_map(|path| {
                let mut components = path.strip_prefix(&self.root).ok()?.components();
                let first = components.next()?;
                match (components.next(), components.next()) {
                    (None, _) => {}
                    (Some(file), None) if file.as_os_str() == CONFIG_FILE => {}
                    _ => return None,
                }
                Some(self.root.join(first))
            })
            .collect()
    }

    fn handle(&mut self, event: Event) {
        for dir in self.affected_dirs(&event) {
            let config = match read_config(&dir) {
                Ok(Some(config)) => config,
                Ok(None) => {
                    // removed, or not written yet
                    if let Some(id) = dir.file_name().and_then(|id| id.to_str()) {
                        self.running.remove(id);
                    }
                    continue;
                }
                Err(e) => {
                    // usually a half-written config; the final write fires again
                    debug!(dir = ?dir, error = %e, "Ignoring unreadable config");
                    continue;
                }
            };

            if !config.state.running {
                self.running.remove(&config.id);
            } else if self.running.insert(config.id.clone()) {
                self.pending
                    .push_back(RuntimeEvent::container_start(&config.id, config.name()));
            }
        }
    }
}

impl EventFeed for DockerDirFeed {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<RuntimeEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(Ok(event)) => self.handle(event),
            Ok(Err(e)) => warn!(error = %e, "Container watcher error"),
            Err(RecvTimeoutError::Timeout) => return Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(Error::Events("watcher channel disconnected".into()));
            }
        }

        loop {
            match self.receiver.try_recv() {
                Ok(Ok(event)) => self.handle(event),
                Ok(Err(e)) => warn!(error = %e, "Container watcher error"),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    return Err(Error::Events("watcher channel disconnected".into()));
                }
            }
        }

        Ok(self.pending.pop_front())
    }
}
