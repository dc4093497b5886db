// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

/// Longest container name kept on records, matching the storage column width.
pub const MAX_NAME_LEN: usize = 128;

/// A log-producing container to be tailed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub name: String,
    pub log_path: PathBuf,
}

impl Target {
    pub fn new(id: impl Into<String>, name: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        let mut name = name.into();
        if let Some((idx, _)) = name.char_indices().nth(MAX_NAME_LEN) {
            name.truncate(idx);
        }

        Self {
            id: id.into(),
            name,
            log_path: log_path.into(),
        }
    }

    /// First 12 characters of the id, as shown by container tooling.
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(12) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.short_id())
    }
}
