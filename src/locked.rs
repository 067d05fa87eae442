use parking_lot::RwLock;

/// A value guarded by a read/write lock.
///
/// Readers share the lock; `set` and `operate` take it exclusively, so an
/// `operate` call observes and replaces the value atomically with respect to
/// every other access.
#[derive(Debug, Default)]
pub struct LockedValue<T> {
  value: RwLock<T>,
}

impl<T> LockedValue<T> {
  pub fn new(initial: T) -> Self {
    Self {
      value: RwLock::new(initial),
    }
  }

  /// Returns a copy of the current value.
  pub fn get(&self) -> T
  where
    T: Clone,
  {
    self.value.read().clone()
  }

  pub fn set(&self, new_value: T) {
    *self.value.write() = new_value;
  }

  /// Computes in place under the exclusive lock.
  pub fn operate<F>(&self, operator: F)
  where
    F: FnOnce(&mut T),
  {
    operator(&mut self.value.write());
  }

  /// Runs `reader` against the value under the shared lock.
  pub fn read<R>(&self, reader: impl FnOnce(&T) -> R) -> R {
    reader(&self.value.read())
  }

  pub fn into_inner(self) -> T {
    self.value.into_inner()
  }
}
