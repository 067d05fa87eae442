use crate::error::PoolError;

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::cmp::Ordering;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

lazy_static::lazy_static! {
  static ref NEXT_POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

type Generator<T> = Box<dyn Fn() -> T + Send + Sync + 'static>;

struct PoolState<T> {
  items: VecDeque<T>,
  max_size: usize,
  // Items created on demand by `get`; the eager fill is not counted.
  items_created: usize,
}

/// A bounded pool of reusable values with a resizable ceiling.
///
/// Idle items live in a buffer of at most `size()` entries. When the buffer
/// is empty, `get` creates a fresh item as long as fewer than `size()` items
/// were created on demand, and otherwise waits for a `put` or for `close`.
pub struct Pool<T> {
  pool_id: u64,
  generator: Generator<T>,
  state: Mutex<PoolState<T>>,
  available: Notify,
  closed: AtomicBool,
  close_token: CancellationToken,
}

impl<T> fmt::Debug for Pool<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("Pool")
      .field("pool_id", &self.pool_id)
      .field("max_size", &state.max_size)
      .field("current_size", &state.items.len())
      .field("items_created", &state.items_created)
      .field("closed", &self.closed.load(AtomicOrdering::Acquire))
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static> Pool<T> {
  /// Creates a pool holding `initial_size` (at least one) freshly generated items.
  pub fn new<G>(generator: G, initial_size: usize) -> Arc<Self>
  where
    G: Fn() -> T + Send + Sync + 'static,
  {
    let max_size = initial_size.max(1);
    let pool = Self {
      pool_id: NEXT_POOL_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      generator: Box::new(generator),
      state: Mutex::new(PoolState {
        items: VecDeque::with_capacity(max_size),
        max_size,
        items_created: 0,
      }),
      available: Notify::new(),
      closed: AtomicBool::new(false),
      close_token: CancellationToken::new(),
    };

    let generated = {
      let mut state = pool.state.lock();
      pool.populate(&mut state)
    };
    debug!(pool_id = pool.pool_id, max_size, generated, "Pool created and pre-populated.");

    Arc::new(pool)
  }

  /// Fills the buffer up to `max_size`. Returns how many items were generated.
  fn populate(&self, state: &mut PoolState<T>) -> usize {
    let mut generated = 0;
    while state.items.len() < state.max_size {
      state.items.push_back((self.generator)());
      generated += 1;
    }
    generated
  }

  /// Takes an item from the pool.
  ///
  /// Returns `None` once the pool is closed, including for callers that were
  /// already waiting when `close` ran.
  pub async fn get(&self) -> Option<T> {
    loop {
      let notified = self.available.notified();
      tokio::pin!(notified);
      // Register interest before looking at the buffer so a concurrent `put`
      // cannot slip between the check and the wait.
      notified.as_mut().enable();

      {
        let mut state = self.state.lock();
        if self.closed.load(AtomicOrdering::Acquire) {
          trace!(pool_id = self.pool_id, "Get on closed pool.");
          return None;
        }
        if let Some(item) = state.items.pop_front() {
          trace!(pool_id = self.pool_id, remaining = state.items.len(), "Get: reused buffered item.");
          return Some(item);
        }
        if state.items_created < state.max_size {
          state.items_created += 1;
          let items_created = state.items_created;
          drop(state);
          trace!(pool_id = self.pool_id, items_created, "Get: buffer empty, generating a new item.");
          return Some((self.generator)());
        }
      }

      trace!(pool_id = self.pool_id, "Get: pool exhausted and at capacity, waiting.");
      tokio::select! {
        biased;
        _ = self.close_token.cancelled() => {
          trace!(pool_id = self.pool_id, "Get: pool closed while waiting.");
          return None;
        }
        _ = &mut notified => {}
      }
    }
  }

  /// Returns an item to the pool.
  ///
  /// If the buffer is already full the item is dropped.
  ///
  /// # Panics
  /// Panics if the pool has been closed.
  pub fn put(&self, item: T) {
    if let Err(e) = self.try_put(item) {
      panic!("{}", e);
    }
  }

  /// Like [`put`](Self::put), but reports a closed pool as an error instead of panicking.
  pub fn try_put(&self, item: T) -> Result<(), PoolError> {
    let mut state = self.state.lock();
    if self.closed.load(AtomicOrdering::Acquire) {
      return Err(PoolError::Closed);
    }
    if state.items.len() < state.max_size {
      state.items.push_back(item);
      drop(state);
      self.available.notify_one();
    } else {
      trace!(pool_id = self.pool_id, max_size = state.max_size, "Put: buffer full, discarding item.");
    }
    Ok(())
  }

  /// Changes the pool ceiling at runtime. Sizes below one are raised to one.
  ///
  /// Growing tops the buffer up with new items. Shrinking keeps at most
  /// `new_size` idle items and resets the on-demand creation counter to the
  /// number kept, so later `get` calls may create items again even though
  /// items handed out before the shrink are still alive.
  pub fn set_size(&self, new_size: usize) {
    let new_size = new_size.max(1);
    if self.closed.load(AtomicOrdering::Acquire) {
      return;
    }

    let mut state = self.state.lock();
    if self.closed.load(AtomicOrdering::Acquire) {
      return;
    }
    let old_size = state.max_size;
    state.max_size = new_size;

    match new_size.cmp(&old_size) {
      Ordering::Greater => {
        let generated = self.populate(&mut state);
        drop(state);
        self.available.notify_waiters();
        debug!(pool_id = self.pool_id, old_size, new_size, generated, "Pool grown.");
      }
      Ordering::Less => {
        let before = state.items.len();
        state.items.truncate(new_size);
        state.items.shrink_to_fit();
        let kept = state.items.len();
        state.items_created = kept;
        debug!(pool_id = self.pool_id, old_size, new_size, kept, dropped = before - kept, "Pool shrunk.");
      }
      Ordering::Equal => {}
    }
  }

  /// Closes the pool. Only the first call has any effect.
  pub fn close(&self) {
    if self
      .closed
      .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_err()
    {
      trace!(pool_id = self.pool_id, "Close: already closed.");
      return;
    }

    self.close_token.cancel();
    let drained = {
      let mut state = self.state.lock();
      let drained = state.items.len();
      state.items.clear();
      drained
    };
    info!(pool_id = self.pool_id, drained, "Pool closed.");
  }

  /// Borrows an item for the duration of `job`, then hands it back.
  ///
  /// Returns `None` without running `job` when the pool is closed. If the
  /// pool closes while `job` runs, the item is dropped.
  pub async fn using<R>(&self, job: impl FnOnce(&mut T) -> R) -> Option<R> {
    let mut item = self.get().await?;
    let result = job(&mut item);
    if self.try_put(item).is_err() {
      trace!(pool_id = self.pool_id, "Using: pool closed during job, item dropped.");
    }
    Some(result)
  }

  /// Current ceiling.
  pub fn size(&self) -> usize {
    self.state.lock().max_size
  }

  /// Number of idle items in the buffer.
  pub fn current_count(&self) -> usize {
    self.state.lock().items.len()
  }

  pub fn items_created(&self) -> usize {
    self.state.lock().items_created
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(AtomicOrdering::Acquire)
  }
}
