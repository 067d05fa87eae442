//! OS signal plumbing for reloads and cancellation.
//!
//! ## Unix
//! Any [`SignalKind`] can be listened to. The default reload set is
//! **SIGINT** and **SIGHUP**.
//!
//! ## Other platforms
//! Only Ctrl-C is available, via [`tokio::signal::ctrl_c`].

use crate::context::Context;

use std::io;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, trace};

#[cfg(unix)]
pub use tokio::signal::unix::SignalKind;

/// Capacity of the channel signals are forwarded into. Signals arriving while
/// it is full wait for the consumer; bursts of the same signal are already
/// coalesced by the OS.
pub const DEFAULT_SIGNAL_BUFFER: usize = 1;

/// Keeps signal forwarders alive. Dropping it stops forwarding.
#[derive(Debug)]
pub struct SignalGuard {
  _forwarders: JoinSet<()>,
}

/// The signals that trigger a reload when none are given explicitly.
#[cfg(unix)]
pub fn default_signals() -> Vec<SignalKind> {
  vec![SignalKind::interrupt(), SignalKind::hangup()]
}

/// Forwards every delivery of `kinds` (the defaults when empty) into a channel.
///
/// Registration happens before this returns, so a signal raised right after
/// the call is not missed. Must be called from within a Tokio runtime.
#[cfg(unix)]
pub fn listen(kinds: &[SignalKind]) -> io::Result<(mpsc::Receiver<SignalKind>, SignalGuard)> {
  use tokio::signal::unix::signal;

  let kinds = if kinds.is_empty() { default_signals() } else { kinds.to_vec() };
  let (tx, rx) = mpsc::channel(DEFAULT_SIGNAL_BUFFER);
  let mut forwarders = JoinSet::new();

  for kind in kinds {
    let mut stream = signal(kind)?;
    let tx = tx.clone();
    forwarders.spawn(async move {
      while stream.recv().await.is_some() {
        trace!(signal = ?kind, "OS signal received.");
        if tx.send(kind).await.is_err() {
          return;
        }
      }
    });
    debug!(signal = ?kind, "Listening for OS signal.");
  }

  Ok((rx, SignalGuard { _forwarders: forwarders }))
}

/// Forwards Ctrl-C into a channel.
#[cfg(not(unix))]
pub fn listen() -> io::Result<(mpsc::Receiver<()>, SignalGuard)> {
  let (tx, rx) = mpsc::channel(DEFAULT_SIGNAL_BUFFER);
  let mut forwarders = JoinSet::new();
  forwarders.spawn(async move {
    while tokio::signal::ctrl_c().await.is_ok() {
      trace!("Ctrl-C received.");
      if tx.send(()).await.is_err() {
        return;
      }
    }
  });
  debug!("Listening for Ctrl-C.");
  Ok((rx, SignalGuard { _forwarders: forwarders }))
}

/// Derives a child of `ctx` that is cancelled when one of `kinds` (the
/// defaults when empty) is delivered.
#[cfg(unix)]
pub fn cancel_on(ctx: &Context, kinds: &[SignalKind]) -> io::Result<Context> {
  let (rx, guard) = listen(kinds)?;
  Ok(spawn_canceller(ctx, rx, guard))
}

/// Derives a child of `ctx` that is cancelled on Ctrl-C.
#[cfg(not(unix))]
pub fn cancel_on(ctx: &Context) -> io::Result<Context> {
  let (rx, guard) = listen()?;
  Ok(spawn_canceller(ctx, rx, guard))
}

fn spawn_canceller<S: Send + 'static>(ctx: &Context, mut rx: mpsc::Receiver<S>, guard: SignalGuard) -> Context {
  let child = ctx.with_cancel();
  let watched = child.clone();
  tokio::spawn(async move {
    let _guard = guard;
    tokio::select! {
      received = rx.recv() => {
        if received.is_some() {
          debug!("OS signal received, cancelling context.");
          watched.cancel();
        }
      }
      _ = watched.done() => {}
    }
  });
  child
}
