// bus.rs — Minimal in-process topic transport.
//
// Stands in for the middleware the node would normally be hosted by: a
// Topic<T> fans published messages out to bounded per-subscriber queues.
// The subscriber count is what drives the node's lazy subscription state
// machine (see node.rs) — work only happens while someone is listening.
//
// Backpressure policy: publish never blocks. A subscriber whose queue is
// full loses that message (bounded queue-depth semantics); a subscriber
// that was dropped is pruned on the next publish or count.

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use log::debug;

/// One registered subscriber: its queue plus a liveness token. The token's
/// strong count drops to zero when the `Subscriber` is dropped, which is
/// how the topic notices departures without sending anything.
struct Entry<T> {
    tx: SyncSender<T>,
    alive: Weak<()>,
}

impl<T> Entry<T> {
    fn is_live(&self) -> bool {
        self.alive.strong_count() > 0
    }
}

/// A named many-to-many message channel.
pub struct Topic<T> {
    name: String,
    entries: Arc<Mutex<Vec<Entry<T>>>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Topic {
            name: self.name.clone(),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T: Clone> Topic<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a subscriber with the given queue depth (minimum 1).
    pub fn subscribe(&self, queue_size: usize) -> Subscriber<T> {
        let (tx, rx) = sync_channel(queue_size.max(1));
        let token = Arc::new(());
        self.entries.lock().unwrap().push(Entry {
            tx,
            alive: Arc::downgrade(&token),
        });
        Subscriber { rx, _token: token }
    }

    /// Publish a message to every live subscriber.
    ///
    /// Returns the number of subscribers that accepted the message.
    pub fn publish(&self, msg: &T) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let mut delivered = 0;
        entries.retain(|e| {
            if !e.is_live() {
                return false;
            }
            match e.tx.try_send(msg.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(std::sync::mpsc::TrySendError::Full(_)) => {
                    debug!("topic {}: subscriber queue full, message dropped", self.name);
                    true
                }
                Err(std::sync::mpsc::TrySendError::Disconnected(_)) => false,
            }
        });
        delivered
    }

    /// Number of live subscribers, pruning any that have been dropped.
    pub fn subscriber_count(&self) -> usize {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(Entry::is_live);
        entries.len()
    }
}

/// The receiving half of a subscription. Dropping it unsubscribes.
pub struct Subscriber<T> {
    rx: Receiver<T>,
    _token: Arc<()>,
}

impl<T> Subscriber<T> {
    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocking receive with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(msg) = self.try_recv() {
            out.push(msg);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_to_single_subscriber() {
        let topic = Topic::new("image");
        let sub = topic.subscribe(4);
        assert_eq!(topic.publish(&1u32), 1);
        assert_eq!(topic.publish(&2u32), 1);
        assert_eq!(sub.drain(), vec![1, 2]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let topic = Topic::<u32>::new("image");
        assert_eq!(topic.publish(&1), 0);
        assert_eq!(topic.subscriber_count(), 0);
    }

    #[test]
    fn test_fanout_to_multiple_subscribers() {
        let topic = Topic::new("image");
        let a = topic.subscribe(4);
        let b = topic.subscribe(4);
        assert_eq!(topic.subscriber_count(), 2);
        topic.publish(&7u32);
        assert_eq!(a.try_recv(), Some(7));
        assert_eq!(b.try_recv(), Some(7));
    }

    #[test]
    fn test_full_queue_drops_message() {
        let topic = Topic::new("image");
        let sub = topic.subscribe(2);
        topic.publish(&1u32);
        topic.publish(&2u32);
        // Queue depth 2 is exhausted; this one is dropped, not blocked on.
        topic.publish(&3u32);
        assert_eq!(sub.drain(), vec![1, 2]);
        // Draining frees capacity again.
        topic.publish(&4u32);
        assert_eq!(sub.try_recv(), Some(4));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let topic = Topic::new("image");
        let a = topic.subscribe(2);
        let b = topic.subscribe(2);
        assert_eq!(topic.subscriber_count(), 2);
        drop(b);
        assert_eq!(topic.subscriber_count(), 1);
        assert_eq!(topic.publish(&1u32), 1);
        assert_eq!(a.try_recv(), Some(1));
    }

    #[test]
    fn test_clone_shares_subscribers() {
        let topic = Topic::new("image");
        let handle = topic.clone();
        let sub = handle.subscribe(2);
        topic.publish(&9u32);
        assert_eq!(sub.try_recv(), Some(9));
    }

    #[test]
    fn test_recv_timeout_on_empty_topic() {
        let topic = Topic::<u32>::new("image");
        let sub = topic.subscribe(1);
        assert_eq!(sub.recv_timeout(Duration::from_millis(5)), None);
    }
}
