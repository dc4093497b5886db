// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

/// Rewrites or drops a decoded log payload before it is stored.
///
/// Returning `None` drops the record. Transforms must not have side effects:
/// a batch can be replayed after a crash and the transform applied again.
pub trait Transform: Send + Sync {
    fn apply(&self, target_name: &str, payload: Value) -> Option<Value>;
}

impl<F> Transform for F
where
    F: Fn(&str, Value) -> Option<Value> + Send + Sync,
{
    fn apply(&self, target_name: &str, payload: Value) -> Option<Value> {
        self(target_name, payload)
    }
}

/// Stores every payload unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, _target_name: &str, payload: Value) -> Option<Value> {
        Some(payload)
    }
}
