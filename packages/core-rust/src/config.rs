//! Configuration lookup contract consumed by the injection protocol.

use serde_json::Value;

/// Read-only configuration lookup.
///
/// Paths are dot-separated (`"jobs.heartbeat.schedule"`). Implementations
/// return `None` for missing paths; the registry decides whether that is an
/// error based on whether the injection point declared a default.
pub trait ConfigSource: Send + Sync {
    /// Looks up a single value by dotted path.
    fn get(&self, path: &str) -> Option<Value>;

    /// Returns the entire configuration tree.
    fn whole(&self) -> Value;
}

/// [`ConfigSource`] backed by an in-memory JSON tree.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    root: Value,
}

impl JsonConfig {
    #[must_use]
    pub fn new(root: Value) -> Self {
        Self { root }
    }
}

impl ConfigSource for JsonConfig {
    fn get(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return Some(self.root.clone());
        }
        let mut current = &self.root;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    fn whole(&self) -> Value {
        self.root.clone()
    }
}
