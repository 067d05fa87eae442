use thiserror::Error;

/// Errors raised by [`Pool`](crate::Pool) operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
  #[error("cannot put item to closed pool")]
  Closed,
}

/// Why a [`Context`](crate::Context) finished.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
  #[error("context canceled")]
  Canceled,

  #[error("context deadline exceeded")]
  DeadlineExceeded,
}

/// Errors returned by the future combinators.
///
/// Cancellation is kept apart from task failures so callers can always tell
/// "the context ended" from "the task said no".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FutureError<E> {
  #[error(transparent)]
  Context(#[from] ContextError),

  #[error("{0}")]
  Task(E),
}

impl<E> FutureError<E> {
  /// Returns `true` when the failure came from the governing context.
  pub fn is_context(&self) -> bool {
    matches!(self, FutureError::Context(_))
  }

  /// Returns the context error, if that is what ended the call.
  pub fn context_error(&self) -> Option<ContextError> {
    match self {
      FutureError::Context(e) => Some(*e),
      FutureError::Task(_) => None,
    }
  }
}

/// Terminal outcomes of a reload session other than a clean task exit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReloadError<E> {
  #[error("parent context canceled: {cause}")]
  ParentContextCanceled {
    #[source]
    cause: ContextError,
  },

  #[error("reload timeout exceeded")]
  ReloadTimeout,

  #[error("reload channel closed")]
  ReloadChannelClosed,

  #[error("task panic: {0}")]
  TaskPanicked(String),

  #[error("{0}")]
  Task(E),

  #[error("failed to register os signal listener: {0}")]
  Signal(String),
}

impl<E> ReloadError<E> {
  /// Returns the parent's cancellation cause when the session ended because
  /// the parent context finished.
  pub fn parent_cause(&self) -> Option<ContextError> {
    match self {
      ReloadError::ParentContextCanceled { cause } => Some(*cause),
      _ => None,
    }
  }
}
