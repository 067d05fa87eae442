//! Supervised restarts of a long-running task.
//!
//! [`with_reload`] runs one task instance at a time. A value on the reload
//! channel cancels the instance's [`Context`] and, once the instance has
//! stopped, starts a new one. An instance that does not stop within the
//! grace period ends the session with [`ReloadError::ReloadTimeout`].

use crate::context::Context;
use crate::error::ReloadError;
use crate::os_signal;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

#[cfg(unix)]
use crate::os_signal::SignalKind;

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

type Instance<E> = Pin<Box<dyn Future<Output = Result<(), ReloadError<E>>> + Send>>;

// The instance is polled in place by the reload loop, so an instance that
// completes on its first poll wins over a reload signal already queued.
fn start_instance<E, Fut>(future: Fut, generation: u64) -> Instance<E>
where
  E: Send + 'static,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
{
  Box::pin(
    async move {
      match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ReloadError::Task(e)),
        Err(payload) => {
          let message = panic_message(&*payload);
          error!(generation, panic = %message, "Task instance panicked.");
          Err(ReloadError::TaskPanicked(message))
        }
      }
    }
    .instrument(info_span!("reload_task", generation)),
  )
}

/// Runs `task`, restarting it whenever a value arrives on `reload`.
///
/// The session ends when:
/// - the task returns on its own: its result is returned as is (`Ok(())` or
///   [`ReloadError::Task`]); a panic becomes [`ReloadError::TaskPanicked`],
/// - `parent` finishes: [`ReloadError::ParentContextCanceled`] with the cause,
/// - an instance ignores cancellation for longer than `timeout` after a
///   reload: [`ReloadError::ReloadTimeout`],
/// - `reload` is closed: [`ReloadError::ReloadChannelClosed`].
///
/// Each instance receives a child of `parent` and must return promptly once
/// it is done. A new instance is only started after the previous one has
/// returned, so instances never overlap. Instances are driven by the future
/// returned from this function rather than spawned, so an instance that is
/// already finished when first polled ends the session before any queued
/// reload is looked at.
pub async fn with_reload<S, E, F, Fut>(
  parent: &Context,
  mut reload: mpsc::Receiver<S>,
  mut task: F,
  timeout: Duration,
) -> Result<(), ReloadError<E>>
where
  E: Send + 'static,
  F: FnMut(Context) -> Fut,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
{
  let mut generation: u64 = 0;

  loop {
    generation += 1;
    let task_ctx = parent.with_cancel();
    let mut instance = start_instance(task(task_ctx.clone()), generation);
    debug!(generation, "Task instance started.");

    tokio::select! {
      biased;

      cause = parent.done() => {
        task_ctx.cancel();
        info!(generation, %cause, "Parent context finished, stopping reloader.");
        return Err(ReloadError::ParentContextCanceled { cause });
      }

      outcome = &mut instance => {
        debug!(generation, "Task instance finished on its own, ending session.");
        return outcome;
      }

      signal = reload.recv() => {
        if signal.is_none() {
          task_ctx.cancel();
          warn!(generation, "Reload channel closed.");
          return Err(ReloadError::ReloadChannelClosed);
        }
      }
    }

    info!(generation, ?timeout, "Reload requested, waiting for task instance to stop.");
    task_ctx.cancel();
    let grace = tokio::time::sleep(timeout);
    tokio::pin!(grace);

    loop {
      tokio::select! {
        biased;

        cause = parent.done() => {
          info!(generation, %cause, "Parent context finished during reload, stopping reloader.");
          return Err(ReloadError::ParentContextCanceled { cause });
        }

        outcome = &mut instance => {
          if outcome.is_err() {
            debug!(generation, "Stopped instance returned an error, ignored on reload.");
          }
          break;
        }

        _ = &mut grace => {
          drop(instance);
          error!(generation, ?timeout, "Task instance ignored cancellation past the reload timeout.");
          return Err(ReloadError::ReloadTimeout);
        }

        signal = reload.recv() => {
          if signal.is_none() {
            warn!(generation, "Reload channel closed while waiting for task instance to stop.");
            return Err(ReloadError::ReloadChannelClosed);
          }
          trace!(generation, "Reload already in progress, signal coalesced.");
        }
      }
    }
  }
}

/// Runs `task` under [`with_reload`], reloading on OS signals.
///
/// An empty `signals` slice uses [`os_signal::default_signals`].
#[cfg(unix)]
pub async fn with_os_signal<E, F, Fut>(
  parent: &Context,
  task: F,
  timeout: Duration,
  signals: &[SignalKind],
) -> Result<(), ReloadError<E>>
where
  E: Send + 'static,
  F: FnMut(Context) -> Fut,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
{
  let (reload, _guard) = os_signal::listen(signals).map_err(|e| ReloadError::Signal(e.to_string()))?;
  with_reload(parent, reload, task, timeout).await
}

/// Runs `task` under [`with_reload`], reloading on Ctrl-C.
#[cfg(not(unix))]
pub async fn with_os_signal<E, F, Fut>(parent: &Context, task: F, timeout: Duration) -> Result<(), ReloadError<E>>
where
  E: Send + 'static,
  F: FnMut(Context) -> Fut,
  Fut: Future<Output = Result<(), E>> + Send + 'static,
{
  let (reload, _guard) = os_signal::listen().map_err(|e| ReloadError::Signal(e.to_string()))?;
  with_reload(parent, reload, task, timeout).await
}
