// SPDX-License-Identifier: GPL-3.0-only

//! Recording publisher
//!
//! Keeps every published message in memory with explicit subscriber control.
//! Used by the integration tests and for dry runs.

use super::{Message, Publisher};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    /// topic → latched
    advertised: BTreeMap<String, bool>,
    subscribers: BTreeMap<String, usize>,
    subscribe_all: bool,
    published: Vec<(String, Message)>,
}

#[derive(Debug, Default)]
pub struct MemoryPublisher {
    state: Mutex<MemoryState>,
}

impl MemoryPublisher {
    /// Publisher where no topic has subscribers until [`Self::subscribe`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publisher where every topic reports one subscriber
    pub fn subscribed() -> Self {
        let publisher = Self::default();
        publisher.lock().subscribe_all = true;
        publisher
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self, topic: &str) {
        *self.lock().subscribers.entry(topic.to_string()).or_default() += 1;
    }

    pub fn unsubscribe(&self, topic: &str) {
        if let Some(count) = self.lock().subscribers.get_mut(topic) {
            *count = count.saturating_sub(1);
        }
    }

    /// Latch flag of an advertised topic
    pub fn advertised(&self, topic: &str) -> Option<bool> {
        self.lock().advertised.get(topic).copied()
    }

    pub fn advertised_topics(&self) -> BTreeSet<String> {
        self.lock().advertised.keys().cloned().collect()
    }

    /// Messages published on `topic`, oldest first
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn count(&self, topic: &str) -> usize {
        self.lock().published.iter().filter(|(t, _)| t == topic).count()
    }

    /// Every publish in order
    pub fn all(&self) -> Vec<(String, Message)> {
        self.lock().published.clone()
    }

    pub fn clear(&self) {
        self.lock().published.clear();
    }
}

impl Publisher for MemoryPublisher {
    fn advertise(&self, topic: &str, latched: bool) {
        debug!(topic, latched, "Advertising topic");
        self.lock().advertised.insert(topic.to_string(), latched);
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        let state = self.lock();
        if state.subscribe_all {
            return state.subscribers.get(topic).copied().unwrap_or(0).max(1);
        }
        state.subscribers.get(topic).copied().unwrap_or(0)
    }

    fn publish(&self, topic: &str, message: Message) {
        self.lock().published.push((topic.to_string(), message));
    }
}
