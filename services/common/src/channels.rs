//! Replay-latest observation channels
//!
//! A `StateChannel` holds the most recent value of one observation point
//! (status, candle, positions) and fans it out to an explicit registry of
//! subscribers. A publish that is structurally equal to the previous value
//! is suppressed, which gives observers the no-duplicate-transitions and
//! no-identical-position-lists guarantees without a reactive library.

use parking_lot::RwLock;
use tokio::sync::mpsc;

/// Publish/subscribe holder for the latest value of one observation point
pub struct StateChannel<T> {
    inner: RwLock<Inner<T>>,
}

struct Inner<T> {
    latest: Option<T>,
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

impl<T> Default for StateChannel<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateChannel<T>
where
    T: Clone + PartialEq + Send + 'static,
{
    /// Create an empty channel with no retained value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                latest: None,
                subscribers: Vec::new(),
            }),
        }
    }

    /// Create a channel seeded with an initial value.
    ///
    /// The seed is replayed to subscribers but was never "published", so the
    /// first real publish of an equal value is still suppressed.
    #[must_use]
    pub fn with_initial(value: T) -> Self {
        Self {
            inner: RwLock::new(Inner {
                latest: Some(value),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Publish a new value to all subscribers.
    ///
    /// Returns `false` when the value equals the retained one and the
    /// emission was suppressed. Disconnected subscribers are pruned.
    pub fn publish(&self, value: T) -> bool {
        let mut inner = self.inner.write();
        if inner.latest.as_ref() == Some(&value) {
            return false;
        }
        inner.latest = Some(value.clone());
        inner
            .subscribers
            .retain(|tx| tx.send(value.clone()).is_ok());
        true
    }

    /// Register a subscriber; the retained value, if any, is replayed
    /// immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        if let Some(latest) = &inner.latest {
            // Replay cannot fail: rx is still in scope.
            let _ = tx.send(latest.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Current retained value.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.inner.read().latest.clone()
    }

    /// Number of live subscribers (closed ones are pruned on publish).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.read().subscribers.len()
    }
}
