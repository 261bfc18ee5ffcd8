// SPDX-License-Identifier: GPL-3.0-only

//! Bounded-channel publisher
//!
//! Forwards messages from the frame callback into a tokio channel consumed
//! by an async task. Sending never blocks the callback: when the channel is
//! full the message is dropped and counted.

use super::{Message, Publisher};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tracing::{debug, warn};

/// A message tagged with its topic
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub message: Message,
}

pub struct ChannelPublisher {
    sender: Sender<PublishedMessage>,
    /// topic → latched
    topics: Mutex<BTreeMap<String, bool>>,
    /// Last message of each latched topic
    latched: Mutex<BTreeMap<String, Message>>,
    dropped: AtomicU64,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, Receiver<PublishedMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            sender,
            topics: Mutex::new(BTreeMap::new()),
            latched: Mutex::new(BTreeMap::new()),
            dropped: AtomicU64::new(0),
        };
        (publisher, receiver)
    }

    /// Messages dropped because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Retained message of a latched topic
    pub fn latched(&self, topic: &str) -> Option<Message> {
        self.latched.lock().ok()?.get(topic).cloned()
    }

    fn is_latched(&self, topic: &str) -> bool {
        self.topics
            .lock()
            .map(|topics| topics.get(topic).copied().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Publisher for ChannelPublisher {
    fn advertise(&self, topic: &str, latched: bool) {
        if let Ok(mut topics) = self.topics.lock() {
            topics.insert(topic.to_string(), latched);
        }
    }

    /// The channel consumer counts as the single subscriber of every topic
    fn subscriber_count(&self, _topic: &str) -> usize {
        usize::from(!self.sender.is_closed())
    }

    fn publish(&self, topic: &str, message: Message) {
        if self.is_latched(topic)
            && let Ok(mut latched) = self.latched.lock()
        {
            latched.insert(topic.to_string(), message.clone());
        }

        let item = PublishedMessage {
            topic: topic.to_string(),
            message,
        };
        match self.sender.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(item)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % 100 == 0 {
                    warn!(topic = %item.topic, dropped, "Publish channel full, dropping messages");
                }
            }
            Err(TrySendError::Closed(item)) => {
                debug!(topic = %item.topic, "Publish channel closed");
            }
        }
    }
}
