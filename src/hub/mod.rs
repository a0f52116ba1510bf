//! Subscription hub: the single broker between event producers and
//! WebSocket subscribers.
//!
//! One broadcast loop owns the client set and the sequence counter, fed
//! through `register` / `unregister` / `broadcast` channels plus a shutdown
//! token. Serializing all mutation through the loop keeps `seq` strictly
//! monotonic and makes queue closing single-authority: only the hub ever
//! drops a client's sender, so queues close exactly once no matter how the
//! connection dies.
//!
//! Delivery is best effort. Frames are marshalled once per broadcast and
//! pushed with `try_send`; a subscriber whose queue is full loses that frame
//! (visible to it as a `seq` gap), and a full broadcast channel sheds the
//! event at the producer boundary.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::{auth::Claims, envelope::now_rfc3339};

pub mod topic;

pub use topic::{is_valid_topic, topic_matches};

/// Per-subscriber queue depth; overflow drops frames for that subscriber.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;
const CONTROL_QUEUE_CAPACITY: usize = 64;
const BROADCAST_QUEUE_CAPACITY: usize = 256;

/// Wire frame for one broadcast event.
#[derive(Clone, Debug, Serialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub ts: String,
    pub seq: i64,
    pub topic: String,
    pub event_type: String,
    pub data: Value,
}

/// Subscriber identity and topic set. Topics are owned by the client and
/// read by the broadcast loop under the lock.
pub struct ClientInfo {
    pub id: String,
    pub claims: Option<Claims>,
    topics: RwLock<HashSet<String>>,
}

impl ClientInfo {
    pub fn new(id: String, claims: Option<Claims>) -> Arc<Self> {
        Arc::new(Self {
            id,
            claims,
            topics: RwLock::new(HashSet::new()),
        })
    }

    /// Adds topics; returns the total subscription count afterwards.
    pub fn subscribe(&self, topics: &[String]) -> usize {
        let mut set = self.topics.write();
        for topic in topics {
            set.insert(topic.clone());
        }
        set.len()
    }

    /// Removes topics; returns the total subscription count afterwards.
    pub fn unsubscribe(&self, topics: &[String]) -> usize {
        let mut set = self.topics.write();
        for topic in topics {
            set.remove(topic);
        }
        set.len()
    }

    fn wants(&self, topic: &str) -> bool {
        self.topics
            .read()
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
    }
}

/// Per-topic subscription ACL hook.
///
/// Invoked for every subscribe request; the baseline allows any
/// authenticated client, but deployments can deny by topic prefix without
/// any wire-protocol change.
pub trait SubscribePolicy: Send + Sync {
    fn can_subscribe(&self, claims: Option<&Claims>, topic: &str) -> bool;
}

pub struct AllowAll;

impl SubscribePolicy for AllowAll {
    fn can_subscribe(&self, _claims: Option<&Claims>, _topic: &str) -> bool {
        true
    }
}

/// Denies subscription to topics under any of the given prefixes.
pub struct DenyPrefixes(pub Vec<String>);

impl SubscribePolicy for DenyPrefixes {
    fn can_subscribe(&self, _claims: Option<&Claims>, topic: &str) -> bool {
        !self.0.iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }
}

struct Registration {
    info: Arc<ClientInfo>,
    tx: mpsc::Sender<String>,
}

/// Cloneable hub handle; the broadcast loop runs until shutdown.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<String>,
    broadcast_tx: mpsc::Sender<EventFrame>,
    done: CancellationToken,
    policy: Arc<dyn SubscribePolicy>,
}

impl Hub {
    /// Starts the broadcast loop and returns its handle.
    pub fn spawn(policy: Arc<dyn SubscribePolicy>) -> Self {
        let (register_tx, register_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (unregister_tx, unregister_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_CAPACITY);
        let done = CancellationToken::new();

        tokio::spawn(run(register_rx, unregister_rx, broadcast_rx, done.clone()));

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            done,
            policy,
        }
    }

    /// Registers a subscriber and returns its frame queue.
    pub async fn register(&self, info: Arc<ClientInfo>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        self.register_with_queue(info, tx).await;
        rx
    }

    pub(crate) async fn register_with_queue(&self, info: Arc<ClientInfo>, tx: mpsc::Sender<String>) {
        // A failed send means the hub is already stopped; the dropped sender
        // closes the caller's receiver immediately.
        let _ = self.register_tx.send(Registration { info, tx }).await;
    }

    /// Removes a subscriber. The hub drops the send queue, closing it.
    pub async fn unregister(&self, id: &str) {
        let _ = self.unregister_tx.send(id.to_string()).await;
    }

    /// Stamps and enqueues an event for broadcast. A full broadcast channel
    /// drops the event here rather than blocking the producer.
    pub fn publish(&self, topic: impl Into<String>, event_type: impl Into<String>, data: Value) {
        let frame = EventFrame {
            frame_type: "event",
            ts: now_rfc3339(),
            seq: 0,
            topic: topic.into(),
            event_type: event_type.into(),
            data,
        };
        if let Err(err) = self.broadcast_tx.try_send(frame) {
            tracing::warn!(%err, "hub broadcast queue full, shedding event");
        }
    }

    /// The subscription ACL hook.
    pub fn can_subscribe(&self, claims: Option<&Claims>, topic: &str) -> bool {
        self.policy.can_subscribe(claims, topic)
    }

    /// Stops the broadcast loop; all subscriber queues close.
    pub fn shutdown(&self) {
        self.done.cancel();
    }
}

async fn run(
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::Receiver<String>,
    mut broadcast_rx: mpsc::Receiver<EventFrame>,
    done: CancellationToken,
) {
    let mut clients: HashMap<String, Registration> = HashMap::new();
    let mut seq: i64 = 0;

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            Some(registration) = register_rx.recv() => {
                tracing::debug!(client = %registration.info.id, "hub client registered");
                clients.insert(registration.info.id.clone(), registration);
            }
            Some(id) = unregister_rx.recv() => {
                if clients.remove(&id).is_some() {
                    tracing::debug!(client = %id, "hub client unregistered");
                }
            }
            Some(mut frame) = broadcast_rx.recv() => {
                seq += 1;
                frame.seq = seq;
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(%err, "failed to marshal event frame");
                        continue;
                    }
                };
                for registration in clients.values() {
                    if !registration.info.wants(&frame.topic) {
                        continue;
                    }
                    match registration.tx.try_send(text.clone()) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                client = %registration.info.id,
                                seq,
                                "subscriber queue full, dropping frame"
                            );
                        }
                        // Writer already gone; unregistration is in flight.
                        Err(TrySendError::Closed(_)) => {}
                    }
                }
            }
            else => break,
        }
    }

    // Dropping the registrations closes every send queue.
    clients.clear();
    tracing::debug!("hub broadcast loop stopped");
}
