//! Keyed table of cancellation handles shared by resolution and fetch tasks.
//!
//! Every long-running task registers a [`CancellationToken`] under a
//! [`TaskKey`] and holds the returned [`TaskRegistration`] for its whole
//! lifetime. Dropping the registration unregisters the key on every exit
//! path, including unwinding from a panic in the task body.
//!
//! Registering a key that is already present overwrites the previous entry.
//! The registry does not decide whether work is "already running"; that is
//! the admission controller's job.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::locator::ResourceId;
use crate::manifest::FileSelector;
use crate::quota::Identity;

/// Identifies one cancellable task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskKey {
    /// Metadata resolution requested by one identity.
    Resolution {
        resource_id: ResourceId,
        requester: Identity,
    },
    /// Transfer of one selection of a resource.
    Fetch {
        resource_id: ResourceId,
        selector: FileSelector,
    },
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution {
                resource_id,
                requester,
            } => write!(f, "resolve:{resource_id}:{requester}"),
            Self::Fetch {
                resource_id,
                selector,
            } => write!(f, "fetch:{resource_id}:{selector}"),
        }
    }
}

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<TaskKey, Entry>>,
    next_generation: AtomicU64,
}

/// Thread-safe registry of cancellation handles.
///
/// Cheap to clone; clones share one table.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskKey, Entry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `token` under `key`, replacing any previous handle.
    ///
    /// The key stays registered until the returned guard is dropped or
    /// [`TaskRegistry::cancel`] removes it.
    #[must_use = "dropping the registration unregisters the task immediately"]
    pub fn register(&self, key: TaskKey, token: CancellationToken) -> TaskRegistration {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let replaced = self
            .entries()
            .insert(key.clone(), Entry { generation, token })
            .is_some();
        debug!(key = %key, replaced, "task registered");

        TaskRegistration {
            registry: self.clone(),
            key,
            generation,
        }
    }

    /// Removes the handle for `key` without cancelling it.
    pub fn unregister(&self, key: &TaskKey) {
        if self.entries().remove(key).is_some() {
            debug!(key = %key, "task unregistered");
        }
    }

    /// Cancels and removes the handle for `key`.
    ///
    /// Returns false when nothing is registered under `key`.
    pub fn cancel(&self, key: &TaskKey) -> bool {
        let removed = self.entries().remove(key);
        match removed {
            Some(entry) => {
                entry.token.cancel();
                debug!(key = %key, "task cancelled");
                true
            }
            None => {
                debug!(key = %key, "nothing to cancel");
                false
            }
        }
    }

    /// True while a handle exists for `key`.
    #[must_use]
    pub fn is_registered(&self, key: &TaskKey) -> bool {
        self.entries().contains_key(key)
    }

    /// Number of registered handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True when no handle is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn unregister_generation(&self, key: &TaskKey, generation: u64) {
        let mut entries = self.entries();
        if entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(key);
            drop(entries);
            debug!(key = %key, "task unregistered");
        }
    }
}

/// Keeps a key registered; unregisters it on drop.
///
/// Only removes the entry it created, so a later registration that
/// overwrote the key is left alone.
#[derive(Debug)]
pub struct TaskRegistration {
    registry: TaskRegistry,
    key: TaskKey,
    generation: u64,
}

impl TaskRegistration {
    /// Key this registration holds.
    #[must_use]
    pub fn key(&self) -> &TaskKey {
        &self.key
    }
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        self.registry
            .unregister_generation(&self.key, self.generation);
    }
}
