use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

lazy_static::lazy_static! {
  static ref NEXT_BROADCASTER_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

struct Subscriber<T> {
  tx: mpsc::Sender<T>,
  buffer_size: usize,
  // Cancelled when the subscriber leaves the registry; pending spilled sends
  // give up and release their sender clones.
  released: CancellationToken,
}

impl<T> Drop for Subscriber<T> {
  fn drop(&mut self) {
    self.released.cancel();
  }
}

/// Fans a single input stream out to a dynamic set of subscribers.
///
/// Every subscriber owns a bounded channel. Cloning a `Broadcaster` yields
/// another handle onto the same subscriber registry, so one clone can feed
/// values while others subscribe and unsubscribe.
pub struct Broadcaster<T> {
  broadcaster_id: u64,
  subscribers: Arc<DashMap<u64, Subscriber<T>>>,
  next_index: Arc<AtomicU64>,
}

impl<T> Clone for Broadcaster<T> {
  fn clone(&self) -> Self {
    Self {
      broadcaster_id: self.broadcaster_id,
      subscribers: self.subscribers.clone(),
      next_index: self.next_index.clone(),
    }
  }
}

impl<T> fmt::Debug for Broadcaster<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Broadcaster")
      .field("broadcaster_id", &self.broadcaster_id)
      .field("subscriber_count", &self.subscribers.len())
      .finish_non_exhaustive()
  }
}

impl<T> Default for Broadcaster<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Broadcaster<T> {
  pub fn new() -> Self {
    Self {
      broadcaster_id: NEXT_BROADCASTER_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      subscribers: Arc::new(DashMap::new()),
      next_index: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Registers a new subscriber and returns its index with the receiving end.
  ///
  /// Tokio channels need at least one slot, so a `buffer_size` of zero
  /// behaves like one. Indices are never reused.
  pub fn subscribe(&self, buffer_size: usize) -> (u64, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let index = self.next_index.fetch_add(1, AtomicOrdering::Relaxed);
    self.subscribers.insert(
      index,
      Subscriber {
        tx,
        buffer_size,
        released: CancellationToken::new(),
      },
    );
    debug!(broadcaster_id = self.broadcaster_id, subscriber = index, buffer_size, "Subscriber added.");
    (index, rx)
  }

  /// Like [`subscribe`](Self::subscribe), but the returned [`Subscription`]
  /// unsubscribes itself when dropped.
  pub fn subscribe_scoped(&self, buffer_size: usize) -> Subscription<T> {
    let (index, rx) = self.subscribe(buffer_size);
    Subscription {
      index,
      rx,
      broadcaster: self.clone(),
    }
  }

  /// Removes a subscriber and closes its channel.
  ///
  /// Returns `false` when the index is unknown or was already removed.
  pub fn unsubscribe(&self, index: u64) -> bool {
    match self.subscribers.remove(&index) {
      Some((_, subscriber)) => {
        debug!(
          broadcaster_id = self.broadcaster_id,
          subscriber = index,
          buffer_size = subscriber.buffer_size,
          "Subscriber removed."
        );
        true
      }
      None => {
        trace!(broadcaster_id = self.broadcaster_id, subscriber = index, "Unsubscribe: unknown index.");
        false
      }
    }
  }

  /// Snapshot of the number of live subscribers. Only useful for diagnostics:
  /// the value can change right after it is read.
  pub fn subscriber_count(&self) -> usize {
    self.subscribers.len()
  }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
  /// Forwards every value read from `source` to all current subscribers.
  ///
  /// Subscriber channels stay open after `source` is exhausted; use
  /// [`bind_to`](Self::bind_to) to close them as well.
  ///
  /// A subscriber whose buffer is full is never waited on: each value it
  /// cannot take right away is handed to a spawned send. Those sends pile up
  /// for as long as the subscriber neither reads nor leaves, so `buffer_size`
  /// bounds the channel, not the backlog. Removing the subscriber (through
  /// `unsubscribe`, `bind_to` or a dropped receiver) discards its backlog and
  /// closes the channel once the buffered values are read.
  pub async fn broadcast(&self, mut source: mpsc::Receiver<T>) {
    debug!(broadcaster_id = self.broadcaster_id, "Broadcast loop started.");
    while let Some(value) = source.recv().await {
      self.fan_out(value);
    }
    debug!(broadcaster_id = self.broadcaster_id, "Broadcast source closed.");
  }

  /// Same fan-out as [`broadcast`](Self::broadcast), but once `source` closes
  /// every subscriber channel is closed and the registry is cleared.
  pub async fn bind_to(&self, source: mpsc::Receiver<T>) {
    self.broadcast(source).await;
    let closed = self.subscribers.len();
    self.subscribers.clear();
    info!(broadcaster_id = self.broadcaster_id, closed, "Bound source closed, all subscribers released.");
  }

  fn fan_out(&self, value: T) {
    let mut disconnected = Vec::new();

    for entry in self.subscribers.iter() {
      let index = *entry.key();
      match entry.value().tx.try_send(value.clone()) {
        Ok(()) => {}
        Err(TrySendError::Full(spilled)) => {
          // A full subscriber gets its own sender task so the others are not held up.
          trace!(broadcaster_id = self.broadcaster_id, subscriber = index, "Subscriber buffer full, spilling send.");
          let tx = entry.value().tx.clone();
          let released = entry.value().released.clone();
          tokio::spawn(async move {
            tokio::select! {
              biased;
              _ = released.cancelled() => {}
              _ = tx.send(spilled) => {}
            }
          });
        }
        Err(TrySendError::Closed(_)) => disconnected.push(index),
      }
    }

    for index in disconnected {
      if self.subscribers.remove(&index).is_some() {
        debug!(broadcaster_id = self.broadcaster_id, subscriber = index, "Receiver dropped, subscriber pruned.");
      }
    }
  }
}

/// A subscription that unsubscribes when dropped.
pub struct Subscription<T> {
  index: u64,
  rx: mpsc::Receiver<T>,
  broadcaster: Broadcaster<T>,
}

impl<T> fmt::Debug for Subscription<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subscription")
      .field("index", &self.index)
      .field("broadcaster_id", &self.broadcaster.broadcaster_id)
      .finish_non_exhaustive()
  }
}

impl<T> Subscription<T> {
  pub fn index(&self) -> u64 {
    self.index
  }

  /// Receives the next value, or `None` once the subscription was closed.
  pub async fn recv(&mut self) -> Option<T> {
    self.rx.recv().await
  }

  pub fn receiver(&mut self) -> &mut mpsc::Receiver<T> {
    &mut self.rx
  }
}

impl<T> Drop for Subscription<T> {
  fn drop(&mut self) {
    self.broadcaster.unsubscribe(self.index);
  }
}

struct UnsubscribeOnDrop<'a, T> {
  broadcaster: &'a Broadcaster<T>,
  index: u64,
}

impl<T> Drop for UnsubscribeOnDrop<'_, T> {
  fn drop(&mut self) {
    self.broadcaster.unsubscribe(self.index);
  }
}

/// Subscribes, runs `handler` with the receiver and unsubscribes afterwards.
///
/// The subscriber is removed even if `handler` panics or the returned future
/// is dropped before completion.
pub async fn with_subscription<T, F, Fut, R>(broadcaster: &Broadcaster<T>, buffer_size: usize, handler: F) -> R
where
  F: FnOnce(mpsc::Receiver<T>) -> Fut,
  Fut: Future<Output = R>,
{
  let (index, rx) = broadcaster.subscribe(buffer_size);
  let _guard = UnsubscribeOnDrop { broadcaster, index };
  handler(rx).await
}
