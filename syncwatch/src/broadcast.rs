//! Fan-out of local playback changes to every connected peer.
//!
//! There is one bus per event kind. Each peer holds a [`Subscription`] to all
//! three and drains it from a single writer task, so the order within one kind
//! is kept while the interleaving across kinds is not defined. Subscribers only
//! see what is published after they subscribed.
//!
//! Every subscriber has its own bounded queue. A subscriber that falls behind
//! loses the oldest queued values of that kind, never blocks the publisher and
//! never slows down the other peers.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use syncwatch_net::Envelope;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub const DEFAULT_CAPACITY: usize = 32;

type Bus<T> = Mutex<Option<broadcast::Sender<T>>>;

pub struct Broadcaster {
    pauses: Bus<bool>,
    positions: Bus<f64>,
    buffering: Bus<bool>,
    published: AtomicUsize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pauses: Mutex::new(Some(broadcast::channel(capacity).0)),
            positions: Mutex::new(Some(broadcast::channel(capacity).0)),
            buffering: Mutex::new(Some(broadcast::channel(capacity).0)),
            published: AtomicUsize::new(0),
        }
    }

    pub fn pause(&self, paused: bool) {
        self.publish(&self.pauses, paused);
    }

    /// Publish an absolute position in nanoseconds
    pub fn position(&self, nanos: f64) {
        self.publish(&self.positions, nanos);
    }

    pub fn buffering(&self, buffering: bool) {
        self.publish(&self.buffering, buffering);
    }

    fn publish<T: Clone>(&self, bus: &Bus<T>, value: T) {
        let Ok(bus) = bus.lock() else {
            return;
        };
        let Some(sender) = bus.as_ref() else {
            tracing::trace!("Broadcaster closed, dropping update");
            return;
        };

        self.published.fetch_add(1, Ordering::SeqCst);
        // no subscribers is fine
        let _ = sender.send(value);
    }

    /// Number of values published so far
    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    /// Subscribe to all three buses, `None` once closed
    pub fn subscribe(&self) -> Option<Subscription> {
        Some(Subscription {
            pauses: subscribe(&self.pauses)?,
            positions: subscribe(&self.positions)?,
            buffering: subscribe(&self.buffering)?,
            closed: [false; 3],
        })
    }

    /// Close all buses. Subscriptions end once they drained what was
    /// published before. Safe to call more than once.
    pub fn close(&self) {
        let was_open = close_bus(&self.pauses);
        close_bus(&self.positions);
        close_bus(&self.buffering);
        if was_open {
            tracing::debug!("Closed broadcaster");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pauses.lock().map(|bus| bus.is_none()).unwrap_or(true)
    }
}

fn close_bus<T>(bus: &Bus<T>) -> bool {
    bus.lock().ok().and_then(|mut bus| bus.take()).is_some()
}

fn subscribe<T: Clone>(bus: &Bus<T>) -> Option<broadcast::Receiver<T>> {
    bus.lock().ok()?.as_ref().map(broadcast::Sender::subscribe)
}

/// One peer's view of the three buses
pub struct Subscription {
    pauses: broadcast::Receiver<bool>,
    positions: broadcast::Receiver<f64>,
    buffering: broadcast::Receiver<bool>,
    closed: [bool; 3],
}

impl Subscription {
    /// Wait for the next published value of any kind, `None` once the
    /// broadcaster is closed and drained
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            if self.closed.iter().all(|closed| *closed) {
                return None;
            }

            let [pauses_closed, positions_closed, buffering_closed] = self.closed;
            let (bus, received) = tokio::select! {
                pause = self.pauses.recv(), if !pauses_closed => (0, pause.map(Envelope::pause)),
                position = self.positions.recv(), if !positions_closed => {
                    (1, position.map(Envelope::position))
                }
                buffering = self.buffering.recv(), if !buffering_closed => {
                    (2, buffering.map(Envelope::buffering))
                }
            };

            match received {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Peer is falling behind, dropped oldest updates");
                }
                Err(RecvError::Closed) => self.closed[bus] = true,
            }
        }
    }

    /// Everything queued right now, pauses first, then positions, then
    /// buffering
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        drain_into(&mut self.pauses, &mut envelopes, Envelope::pause);
        drain_into(&mut self.positions, &mut envelopes, Envelope::position);
        drain_into(&mut self.buffering, &mut envelopes, Envelope::buffering);
        envelopes
    }
}

fn drain_into<T: Clone>(
    receiver: &mut broadcast::Receiver<T>,
    out: &mut Vec<Envelope>,
    wrap: fn(T) -> Envelope,
) {
    loop {
        match receiver.try_recv() {
            Ok(value) => out.push(wrap(value)),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_per_kind_order_is_kept() {
        let broadcaster = Broadcaster::new(8);
        let mut subscription = broadcaster.subscribe().unwrap();

        broadcaster.pause(true);
        broadcaster.position(1.0);
        broadcaster.pause(false);
        broadcaster.position(2.0);

        let received = subscription.drain();
        let pauses: Vec<_> = received
            .iter()
            .filter(|e| matches!(e, Envelope::Pause { .. }))
            .cloned()
            .collect();
        let positions: Vec<_> = received
            .iter()
            .filter(|e| matches!(e, Envelope::Position { .. }))
            .cloned()
            .collect();
        assert_eq!(pauses, vec![Envelope::pause(true), Envelope::pause(false)]);
        assert_eq!(
            positions,
            vec![Envelope::position(1.0), Envelope::position(2.0)]
        );
        assert_eq!(broadcaster.published(), 4);
    }

    #[tokio::test]
    async fn test_new_subscribers_see_only_future_values() {
        let broadcaster = Broadcaster::default();
        broadcaster.buffering(true);

        let mut subscription = broadcaster.subscribe().unwrap();
        assert!(subscription.drain().is_empty());

        broadcaster.buffering(false);
        assert_eq!(subscription.recv().await, Some(Envelope::buffering(false)));
    }

    #[tokio::test]
    async fn test_slow_subscriber_loses_oldest() {
        let broadcaster = Broadcaster::new(2);
        let mut subscription = broadcaster.subscribe().unwrap();

        for nanos in 1..=5 {
            broadcaster.position(nanos as f64);
        }

        assert_eq!(subscription.recv().await, Some(Envelope::position(4.0)));
        assert_eq!(subscription.recv().await, Some(Envelope::position(5.0)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_subscriptions() {
        let broadcaster = Broadcaster::default();
        let mut subscription = broadcaster.subscribe().unwrap();
        broadcaster.pause(true);

        broadcaster.close();
        broadcaster.close();
        assert!(broadcaster.is_closed());
        assert!(broadcaster.subscribe().is_none());

        assert_eq!(subscription.recv().await, Some(Envelope::pause(true)));
        assert_eq!(subscription.recv().await, None);

        broadcaster.pause(false);
        assert_eq!(broadcaster.published(), 1);
    }
}
