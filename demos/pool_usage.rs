use conctools::future;
use conctools::{Broadcaster, Context, LockedValue, Pool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug)]
struct Connection {
  id: u32,
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Pool Usage Example ---");

  let next_id = Arc::new(AtomicU32::new(0));
  let generator_ids = next_id.clone();
  let pool = Pool::new(
    move || Connection {
      id: generator_ids.fetch_add(1, Ordering::SeqCst),
    },
    2,
  );

  // Completed request ids are fanned out to every interested listener.
  let completions = Broadcaster::<u32>::new();
  let (completion_tx, completion_rx) = mpsc::channel(8);
  let feeder = completions.clone();
  let fan_out = tokio::spawn(async move { feeder.bind_to(completion_rx).await });

  let mut audit = completions.subscribe_scoped(16);
  let auditor = tokio::spawn(async move {
    let mut seen = 0;
    while let Some(request) = audit.recv().await {
      seen += 1;
      info!("Audit log: request {} done ({} so far)", request, seen);
    }
    seen
  });

  let served = Arc::new(LockedValue::new(0usize));
  let mut workers = Vec::new();
  for request in 0..6u32 {
    let pool = pool.clone();
    let served = served.clone();
    let completion_tx = completion_tx.clone();
    workers.push(async move {
      let conn = pool.get().await.ok_or("pool closed")?;
      info!("Request {} using connection {}", request, conn.id);
      tokio::time::sleep(Duration::from_millis(100)).await;
      pool.put(conn);
      served.operate(|count| *count += 1);
      let _ = completion_tx.send(request).await;
      Ok::<u32, &'static str>(request)
    });
  }
  drop(completion_tx);

  let ctx = Context::background().with_timeout(Duration::from_secs(5));
  match future::all(&ctx, workers).await {
    Ok(done) => info!("All requests served in order: {:?}", done),
    Err(e) => warn!("Serving requests failed: {}", e),
  }

  info!(
    "Served {} requests with {} connections ({} created on demand)",
    served.get(),
    next_id.load(Ordering::SeqCst),
    pool.items_created()
  );

  info!("Shrinking pool to a single idle connection.");
  pool.set_size(1);
  info!("Pool size {}, idle {}", pool.size(), pool.current_count());

  pool.close();
  fan_out.await.unwrap();
  let audited = auditor.await.unwrap();
  info!("Auditor saw {} completions. Pool closed.", audited);
}
