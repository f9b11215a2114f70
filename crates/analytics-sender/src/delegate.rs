// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Observers of sender lifecycle events.
//!
//! Delegates are held weakly: registering one never keeps it alive, and a
//! delegate that has been dropped is pruned the next time the registry is
//! walked.

use crate::error::SenderError;
use crate::sender::SenderHandle;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Receives suspend/resume transitions and per-batch outcomes.
///
/// Callbacks run on the sender's service task and must not block.
pub trait SenderDelegate: Send + Sync {
    fn on_suspend(&self, sender: &SenderHandle);

    fn on_resume(&self, sender: &SenderHandle);

    /// A batch was accepted by ingestion and can be evicted from storage.
    fn on_delivered(&self, _sender: &SenderHandle, _batch_id: &str) {}

    /// A batch was permanently rejected.
    fn on_failed(&self, _sender: &SenderHandle, _batch_id: &str, _error: &SenderError) {}
}

/// Identity of a delegate, derived from the address of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelegateId(usize);

impl DelegateId {
    #[must_use]
    pub fn of(delegate: &Arc<dyn SenderDelegate>) -> Self {
        Self(Arc::as_ptr(delegate) as *const () as usize)
    }
}

#[derive(Default)]
pub struct DelegateRegistry {
    delegates: HashMap<DelegateId, Weak<dyn SenderDelegate>>,
}

impl DelegateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a delegate. Adding a live delegate twice has no effect.
    pub fn add(&mut self, id: DelegateId, delegate: Weak<dyn SenderDelegate>) {
        let live = self
            .delegates
            .get(&id)
            .is_some_and(|existing| existing.strong_count() > 0);
        if !live {
            // A dead entry at this address belonged to a dropped delegate.
            self.delegates.insert(id, delegate);
        }
    }

    pub fn remove(&mut self, id: DelegateId) -> bool {
        self.delegates.remove(&id).is_some()
    }

    /// Number of registered delegates that are still alive.
    pub fn len(&mut self) -> usize {
        self.prune();
        self.delegates.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Calls `f` once for every live delegate, dropping dead entries.
    pub fn notify(&mut self, mut f: impl FnMut(&dyn SenderDelegate)) {
        let mut dead = Vec::new();
        for (id, weak) in &self.delegates {
            match weak.upgrade() {
                Some(delegate) => f(delegate.as_ref()),
                None => dead.push(*id),
            }
        }
        for id in dead {
            self.delegates.remove(&id);
        }
    }

    fn prune(&mut self) {
        self.delegates.retain(|_, weak| weak.strong_count() > 0);
    }
}
