use conctools::{with_reload, Context, ReloadError};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

// Stands in for a server that rereads its configuration on every start.
async fn serve(ctx: Context, generation: u32) -> Result<(), Infallible> {
  info!("Generation {} started, serving until told to stop.", generation);
  let mut ticker = tokio::time::interval(Duration::from_millis(300));
  loop {
    tokio::select! {
      cause = ctx.done() => {
        info!("Generation {} stopping: {}", generation, cause);
        return Ok(());
      }
      _ = ticker.tick() => info!("Generation {} tick", generation),
    }
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Reload Example ---");

  // Stop the whole session after a few seconds.
  let parent = Context::background().with_timeout(Duration::from_secs(3));

  // Simulated reload requests; on Unix, `with_os_signal` wires the same loop
  // to SIGINT and SIGHUP instead.
  let (reload_tx, reload_rx) = mpsc::channel(1);
  tokio::spawn(async move {
    for _ in 0..2 {
      tokio::time::sleep(Duration::from_secs(1)).await;
      info!("Requesting reload.");
      if reload_tx.send(()).await.is_err() {
        return;
      }
    }
    // Keep the channel open until the session ends.
    reload_tx.closed().await;
  });

  let mut generation = 0;
  let outcome = with_reload(
    &parent,
    reload_rx,
    move |ctx| {
      generation += 1;
      serve(ctx, generation)
    },
    Duration::from_millis(500),
  )
  .await;

  match outcome {
    Err(ReloadError::ParentContextCanceled { cause }) => info!("Session ended: {}", cause),
    Err(e) => error!("Session failed: {}", e),
    Ok(()) => info!("Task exited on its own."),
  }
}
