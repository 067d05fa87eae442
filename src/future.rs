//! Racing and aggregation over concurrently running futures.
//!
//! Every combinator spawns the supplied futures onto the Tokio runtime and
//! races them against a [`Context`]. Panics inside a spawned future are
//! resumed on the caller rather than turned into errors.

use crate::context::Context;
use crate::error::{ContextError, FutureError};

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::trace;

fn narrow(ctx: &Context, timeout: Option<Duration>) -> Context {
  match timeout {
    Some(timeout) => ctx.with_timeout(timeout),
    None => ctx.clone(),
  }
}

fn join_outcome<T>(joined: Result<T, JoinError>) -> Result<T, ContextError> {
  match joined {
    Ok(value) => Ok(value),
    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
    // Only reachable when the runtime is shutting down underneath us.
    Err(_) => Err(ContextError::Canceled),
  }
}

/// Runs `get` on its own task and waits for its value.
///
/// Fails with the context error if `ctx`, optionally narrowed by `timeout`,
/// finishes first. The spawned task is then abandoned, not aborted: it keeps
/// running in the background until `get` completes on its own.
pub async fn from<T, F>(ctx: &Context, get: F, timeout: Option<Duration>) -> Result<T, ContextError>
where
  T: Send + 'static,
  F: Future<Output = T> + Send + 'static,
{
  let ctx = narrow(ctx, timeout);
  let mut handle = tokio::spawn(get);

  tokio::select! {
    joined = &mut handle => join_outcome(joined),
    cause = ctx.done() => {
      trace!(%cause, "from: context finished first, abandoning task.");
      Err(cause)
    }
  }
}

/// Like [`from`], for futures that can fail. The first of value, task error
/// or context completion wins.
pub async fn from_err<T, E, F>(ctx: &Context, get: F, timeout: Option<Duration>) -> Result<T, FutureError<E>>
where
  T: Send + 'static,
  E: Send + 'static,
  F: Future<Output = Result<T, E>> + Send + 'static,
{
  let ctx = narrow(ctx, timeout);
  let mut handle = tokio::spawn(get);

  tokio::select! {
    joined = &mut handle => match join_outcome(joined)? {
      Ok(value) => Ok(value),
      Err(e) => Err(FutureError::Task(e)),
    },
    cause = ctx.done() => {
      trace!(%cause, "from_err: context finished first, abandoning task.");
      Err(cause.into())
    }
  }
}

/// Like [`from`], but yields `default` instead of an error when `ctx` finishes first.
pub async fn or<T, F>(ctx: &Context, get: F, default: T) -> T
where
  T: Send + 'static,
  F: Future<Output = T> + Send + 'static,
{
  from(ctx, get, None).await.unwrap_or(default)
}

/// Runs every future concurrently and collects their values in input order.
///
/// The first failure, either a task error or the context finishing, is
/// returned and no partial results are produced. Errors from other tasks are
/// discarded. Tasks still running when the outcome is decided are aborted.
pub async fn all<T, E, F, I>(ctx: &Context, futures: I) -> Result<Vec<T>, FutureError<E>>
where
  T: Send + 'static,
  E: Send + 'static,
  F: Future<Output = Result<T, E>> + Send + 'static,
  I: IntoIterator<Item = F>,
{
  let mut set = JoinSet::new();
  for (index, future) in futures.into_iter().enumerate() {
    set.spawn(async move { (index, future.await) });
  }

  let mut results: Vec<(usize, T)> = Vec::with_capacity(set.len());
  loop {
    tokio::select! {
      joined = set.join_next() => match joined {
        Some(joined) => {
          let (index, outcome) = join_outcome(joined)?;
          match outcome {
            Ok(value) => results.push((index, value)),
            Err(e) => {
              trace!(index, "all: task failed, aborting the rest.");
              return Err(FutureError::Task(e));
            }
          }
        }
        None => break,
      },
      cause = ctx.done() => {
        trace!(%cause, completed = results.len(), "all: context finished before every task completed.");
        return Err(cause.into());
      }
    }
  }

  results.sort_unstable_by_key(|(index, _)| *index);
  Ok(results.into_iter().map(|(_, value)| value).collect())
}

/// Runs every future concurrently and returns the first success.
///
/// If every task fails the first error observed is returned. If `ctx`
/// finishes before any success its error is returned. An empty input
/// succeeds with `T::default()`.
pub async fn any<T, E, F, I>(ctx: &Context, futures: I) -> Result<T, FutureError<E>>
where
  T: Default + Send + 'static,
  E: Send + 'static,
  F: Future<Output = Result<T, E>> + Send + 'static,
  I: IntoIterator<Item = F>,
{
  let mut set = JoinSet::new();
  for future in futures {
    set.spawn(future);
  }
  if set.is_empty() {
    return Ok(T::default());
  }

  let mut first_error: Option<E> = None;
  loop {
    tokio::select! {
      joined = set.join_next() => match joined {
        Some(joined) => match join_outcome(joined)? {
          Ok(value) => return Ok(value),
          Err(e) => {
            if first_error.is_none() {
              first_error = Some(e);
            }
          }
        },
        None => break,
      },
      cause = ctx.done() => {
        trace!(%cause, "any: context finished before any task succeeded.");
        return Err(cause.into());
      }
    }
  }

  match first_error {
    Some(e) => Err(FutureError::Task(e)),
    None => Err(ctx.err().unwrap_or(ContextError::Canceled).into()),
  }
}

/// Runs a blocking closure on the blocking pool and signals once it returns.
///
/// Lets blocking waits (thread joins, barriers, condition variables) take part
/// in a `tokio::select!`. If `get` panics the receiver yields an error.
pub fn channel<F>(get: F) -> oneshot::Receiver<()>
where
  F: FnOnce() + Send + 'static,
{
  let (tx, rx) = oneshot::channel();
  tokio::task::spawn_blocking(move || {
    get();
    let _ = tx.send(());
  });
  rx
}
