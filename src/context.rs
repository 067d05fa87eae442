//! Cancellation scope shared by the combinators and the reloader.
//!
//! A [`Context`] pairs a [`CancellationToken`] with an optional deadline.
//! Deriving a child never lets the child outlive its parent: cancelling the
//! parent cancels the child, and a child deadline is never later than the
//! parent's.

use crate::error::ContextError;

use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Context {
  token: CancellationToken,
  deadline: Option<Instant>,
}

impl Default for Context {
  fn default() -> Self {
    Self::background()
  }
}

impl Context {
  /// A root context that is never done unless cancelled explicitly.
  pub fn background() -> Self {
    Self {
      token: CancellationToken::new(),
      deadline: None,
    }
  }

  /// Derives a child that can be cancelled on its own.
  pub fn with_cancel(&self) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: self.deadline,
    }
  }

  /// Derives a child that finishes after `timeout` at the latest.
  pub fn with_timeout(&self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  /// Derives a child that finishes at `deadline` at the latest.
  pub fn with_deadline(&self, deadline: Instant) -> Self {
    let deadline = match self.deadline {
      Some(parent) if parent < deadline => parent,
      _ => deadline,
    };
    Self {
      token: self.token.child_token(),
      deadline: Some(deadline),
    }
  }

  /// Cancels this context and all contexts derived from it.
  pub fn cancel(&self) {
    self.token.cancel();
  }

  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// Non-blocking check of why the context finished, if it has.
  pub fn err(&self) -> Option<ContextError> {
    if self.token.is_cancelled() {
      return Some(ContextError::Canceled);
    }
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
      _ => None,
    }
  }

  pub fn is_done(&self) -> bool {
    self.err().is_some()
  }

  /// Completes when the context is cancelled or its deadline passes.
  pub async fn done(&self) -> ContextError {
    match self.deadline {
      Some(deadline) => {
        tokio::select! {
          biased;
          _ = self.token.cancelled() => ContextError::Canceled,
          _ = sleep_until(deadline) => ContextError::DeadlineExceeded,
        }
      }
      None => {
        self.token.cancelled().await;
        ContextError::Canceled
      }
    }
  }
}
