//! Pub/sub transport seam.
//!
//! The engine only assumes topic semantics: `publish(topic, msg)` and
//! `subscribe(topic) → stream`, with per-topic publish ordering. The
//! backing service is external; [`MemoryTransport`] is the in-process
//! implementation used by the binary, the tests, and embedded deployments.

use crate::error::TransportError;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Buffered messages per topic before slow subscribers start lagging.
const TOPIC_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait Transport: Send + Sync {
    /// Publish a payload. Publishing to a topic nobody subscribes to is a
    /// no-op, not an error.
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Open a live subscription. Messages published after this call are
    /// delivered in publish order.
    fn subscribe(&self, topic: &str) -> Subscription;
}

/// Serialize-and-publish helper shared by server and client call sites.
pub fn publish_json<T: Serialize>(
    transport: &dyn Transport,
    topic: &str,
    msg: &T,
) -> Result<(), TransportError> {
    let payload = serde_json::to_vec(msg)?;
    transport.publish(topic, Bytes::from(payload))
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live claim on one topic. Dropping it releases the claim.
pub struct Subscription {
    topic: String,
    rx: broadcast::Receiver<Bytes>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message on this topic. `Lagged` reports how many messages a
    /// slow consumer missed; the stream stays usable afterwards.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        match self.rx.recv().await {
            Ok(payload) => Ok(payload),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                Err(TransportError::Lagged(self.topic.clone(), n))
            }
            Err(broadcast::error::RecvError::Closed) => {
                Err(TransportError::Closed(self.topic.clone()))
            }
        }
    }

    /// Non-blocking variant used by poll-style consumers.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Topic fanout over per-topic broadcast channels.
#[derive(Default)]
pub struct MemoryTransport {
    topics: RwLock<HashMap<String, broadcast::Sender<Bytes>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Bytes> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
            .clone()
    }
}

impl Transport for MemoryTransport {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), TransportError> {
        // send() fails only when no receiver exists; an empty topic is fine.
        let _ = self.sender(topic).send(payload);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription {
        Subscription {
            topic: topic.to_string(),
            rx: self.sender(topic).subscribe(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
