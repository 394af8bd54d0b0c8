//! # Registry (requested state)
//!
//! Holds what callers have asked a connection to monitor. Registration calls
//! append here from any thread and return immediately; the worker reads it
//! once per cycle and converges the live session toward it.
//!
//! Entries are never removed. Each append bumps a revision counter so the
//! worker can tell when there is something new to reconcile.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::core::model::TagOptions;

/// A requested `(list, tag)` membership.
#[derive(Debug, Clone, PartialEq)]
pub struct TagRequest {
    /// List the tag belongs to.
    pub list: String,
    /// Tag name.
    pub tag: String,
    /// Options given by the first registration.
    pub options: TagOptions,
}

#[derive(Default)]
struct Requested {
    lists: Vec<String>,
    list_index: HashSet<String>,
    tags: Vec<TagRequest>,
    tag_index: HashSet<(String, String)>,
    revision: u64,
}

/// Append-only requested lists and tags.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Requested>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Requested> {
        // Entries are only ever appended, so a poisoned guard still holds a consistent view.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Requests a list. Returns `false` if it was already requested.
    pub fn add_list(&self, name: &str) -> bool {
        let mut req = self.lock();
        if !req.list_index.insert(name.to_string()) {
            return false;
        }
        req.lists.push(name.to_string());
        req.revision += 1;
        true
    }

    /// Requests a tag in a list. Returns `false` if the pair was already
    /// requested, in which case the earlier options stay in effect.
    pub fn add_tag(&self, list: &str, tag: &str, options: TagOptions) -> bool {
        let mut req = self.lock();
        if !req.tag_index.insert((list.to_string(), tag.to_string())) {
            return false;
        }
        req.tags.push(TagRequest {
            list: list.to_string(),
            tag: tag.to_string(),
            options,
        });
        req.revision += 1;
        true
    }

    /// Requested lists in registration order.
    pub fn lists(&self) -> Vec<String> {
        self.lock().lists.clone()
    }

    /// Requested tags in registration order.
    pub fn tags(&self) -> Vec<TagRequest> {
        self.lock().tags.clone()
    }

    /// True if the list has been requested.
    pub fn has_list(&self, name: &str) -> bool {
        self.lock().list_index.contains(name)
    }

    /// True if the `(list, tag)` pair has been requested.
    pub fn has_tag(&self, list: &str, tag: &str) -> bool {
        self.lock()
            .tag_index
            .contains(&(list.to_string(), tag.to_string()))
    }

    /// Counter bumped by every new list or tag.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_list_is_idempotent() {
        let registry = Registry::new();
        assert!(registry.add_list("mytags"));
        assert!(!registry.add_list("mytags"));
        assert_eq!(registry.lists(), vec!["mytags".to_string()]);
        assert_eq!(registry.revision(), 1);
    }

    #[test]
    fn test_first_tag_options_win() {
        let registry = Registry::new();
        let fast = TagOptions {
            poll_period_ms: 50,
            ..Default::default()
        };
        assert!(registry.add_tag("mytags", "PUMP_1", fast.clone()));
        assert!(!registry.add_tag("mytags", "PUMP_1", TagOptions::default()));
        assert!(registry.add_tag("other", "PUMP_1", TagOptions::default()));

        let tags = registry.tags();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].options, fast);
        assert!(registry.has_tag("other", "PUMP_1"));
        assert!(!registry.has_list("other"));
    }

    #[test]
    fn test_concurrent_registration_keeps_every_entry_once() {
        let registry = std::sync::Arc::new(Registry::new());
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let registry = std::sync::Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        registry.add_list(&format!("list{}", i % 10));
                        registry.add_tag(&format!("list{}", i % 10), &format!("T{}_{}", n % 2, i), TagOptions::default());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.lists().len(), 10);
        assert_eq!(registry.tags().len(), 100);
    }
}
