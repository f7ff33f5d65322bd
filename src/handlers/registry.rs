//! Handler Registry
//!
//! Read-only map from operation name to handler, built once at startup by
//! merging handler groups in order. A later group replaces an earlier
//! group's handler of the same name.

use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Handler, HandlerGroup};

/// Registry of invocable operations
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Merge groups in order; last write wins on name collisions
    pub fn from_groups(groups: impl IntoIterator<Item = HandlerGroup>) -> Self {
        let mut handlers: HashMap<String, Arc<dyn Handler>> = HashMap::new();

        for group in groups {
            let group_name = group.name;
            for (name, handler) in group.into_entries() {
                if handlers.insert(name.clone(), handler).is_some() {
                    debug!("Handler {} replaced by group {}", name, group_name);
                }
            }
        }

        info!("Handler registry ready with {} operations", handlers.len());
        Self { handlers }
    }

    /// Look up a handler by operation name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    /// All registered operation names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
