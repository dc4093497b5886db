// SPDX-License-Identifier: Apache-2.0

//! Container runtime interface: listing, inspecting and watching containers.

pub mod docker_dir;
pub mod error;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use docker_dir::{DEFAULT_CONTAINERS_ROOT, DockerDirRuntime};
pub use error::{Error, Result};

use crate::target::Target;

pub const EVENT_TYPE_CONTAINER: &str = "container";
pub const ACTION_START: &str = "start";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub log_path: Option<PathBuf>,
}

impl ContainerInfo {
    /// The tailing target for this container, if it writes a log file.
    pub fn into_target(self) -> Option<Target> {
        let log_path = self.log_path?;
        Some(Target::new(self.id, self.name, log_path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeEvent {
    pub event_type: String,
    pub action: String,
    pub id: String,
    pub attributes: HashMap<String, String>,
}

impl RuntimeEvent {
    pub fn container_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), name.into());
        Self {
            event_type: EVENT_TYPE_CONTAINER.to_string(),
            action: ACTION_START.to_string(),
            id: id.into(),
            attributes,
        }
    }

    pub fn is_container_start(&self) -> bool {
        self.event_type == EVENT_TYPE_CONTAINER && self.action == ACTION_START
    }

    /// Name of the container the event is about.
    pub fn name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }
}

/// Blocking stream of runtime events.
pub trait EventFeed: Send {
    /// Wait up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<RuntimeEvent>>;
}

pub trait ContainerRuntime: Send + Sync {
    fn list_all(&self) -> Result<Vec<ContainerSummary>>;

    fn inspect(&self, id: &str) -> Result<ContainerInfo>;

    fn subscribe_events(&self) -> Result<Box<dyn EventFeed>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_start_event() {
        let event = RuntimeEvent::container_start("abc", "web");
        assert!(event.is_container_start());
        assert_eq!(event.name(), Some("web"));

        let stop = RuntimeEvent {
            action: "stop".to_string(),
            ..event
        };
        assert!(!stop.is_container_start());
    }

    #[test]
    fn test_into_target_requires_log_path() {
        let info = ContainerInfo {
            id: "abc".to_string(),
            name: "web".to_string(),
            log_path: None,
        };
        assert!(info.clone().into_target().is_none());

        let target = ContainerInfo {
            log_path: Some(PathBuf::from("/logs/abc-json.log")),
            ..info
        }
        .into_target()
        .unwrap();
        assert_eq!(target.id, "abc");
        assert_eq!(target.log_path, PathBuf::from("/logs/abc-json.log"));
    }
}
