// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::target::Target;

/// One decoded log line, ready to be stored
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub target_id: String,
    pub target_name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(target: &Target, payload: Value) -> Self {
        Self {
            target_id: target.id.clone(),
            target_name: target.name.clone(),
            payload,
            timestamp: Utc::now(),
        }
    }
}
