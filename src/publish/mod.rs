// SPDX-License-Identifier: GPL-3.0-only

//! Publish sink boundary
//!
//! The node hands finished records to a [`Publisher`] by topic name. The
//! transport behind it is opaque: it only has to report how many consumers
//! a topic has, so the node can skip encoding work nobody will read.
//!
//! ```text
//! node ──publish(topic, Message)──▶ Publisher
//!                                     ├─ MemoryPublisher   (records, tests)
//!                                     └─ ChannelPublisher  (bounded tokio channel)
//! ```

pub mod channel;
pub mod diagnostics;
pub mod memory;
pub mod messages;

pub use channel::{ChannelPublisher, PublishedMessage};
pub use diagnostics::{FrequencyDiagnostics, FrequencyStatus};
pub use memory::MemoryPublisher;
pub use messages::{
    CameraInfo, CounterMessage, ExtrinsicsMessage, Header, ImageMessage, ImuInfo, ImuMessage,
    Message, PointCloudMessage, TransformStamped,
};

/// Outbound message sink
pub trait Publisher: Send + Sync {
    /// Declare a topic before its first message
    ///
    /// Latched topics keep their last message for late subscribers.
    fn advertise(&self, topic: &str, latched: bool);

    /// Number of consumers currently attached to `topic`
    fn subscriber_count(&self, topic: &str) -> usize;

    fn publish(&self, topic: &str, message: Message);

    fn has_subscribers(&self, topic: &str) -> bool {
        self.subscriber_count(topic) > 0
    }
}
