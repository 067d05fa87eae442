use conctools::{Pool, PoolError};
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

// Generator handing out 1, 2, 3, ... and counting its calls.
fn counting_generator() -> (Arc<AtomicUsize>, impl Fn() -> usize + Send + Sync + 'static) {
  let counter = Arc::new(AtomicUsize::new(0));
  let gen_counter = counter.clone();
  (counter, move || gen_counter.fetch_add(1, Ordering::SeqCst) + 1)
}

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,conctools=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

#[tokio::test]
async fn test_new_prepopulates_and_clamps_size() {
  setup_tracing_for_test();
  let (calls, generator) = counting_generator();
  let pool = Pool::new(generator, 3);
  assert_eq!(pool.size(), 3);
  assert_eq!(pool.current_count(), 3);
  assert_eq!(calls.load(Ordering::SeqCst), 3);
  assert_eq!(pool.items_created(), 0, "eager fill does not count as on-demand creation");
  pool.close();

  let pool = Pool::new(|| "test", 0);
  assert_eq!(pool.size(), 1);
  assert_eq!(pool.current_count(), 1);
  pool.close();
}

#[tokio::test]
async fn test_get_and_put_track_idle_count() {
  setup_tracing_for_test();
  let (_, generator) = counting_generator();
  let pool = Pool::new(generator, 2);

  let item1 = pool.get().await.unwrap();
  assert_eq!(pool.current_count(), 1);
  let item2 = pool.get().await.unwrap();
  assert_eq!(pool.current_count(), 0);

  pool.put(item1);
  assert_eq!(pool.current_count(), 1);
  pool.put(item2);
  assert_eq!(pool.current_count(), 2);

  pool.close();
}

#[tokio::test]
async fn test_exhaustion_generates_then_blocks_until_put() {
  setup_tracing_for_test();
  let (calls, generator) = counting_generator();
  let pool = Pool::new(generator, 1);

  let first = pool.get().await.unwrap();
  let second = pool.get().await.unwrap();
  assert_ne!(first, second, "second get must produce a freshly generated item");
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  let waiter_pool = pool.clone();
  let mut third = tokio::spawn(async move { waiter_pool.get().await });

  assert!(
    timeout(Duration::from_millis(50), &mut third).await.is_err(),
    "third get should block while the pool is exhausted and at capacity"
  );

  pool.put(first);
  let third_item = timeout(Duration::from_millis(500), third)
    .await
    .expect("get should complete after put")
    .unwrap();
  assert_eq!(third_item, Some(first));
  assert_eq!(calls.load(Ordering::SeqCst), 2, "no extra item generated for the waiter");

  pool.close();
}

#[tokio::test]
async fn test_put_to_full_pool_discards_item() {
  setup_tracing_for_test();
  let pool = Pool::new(|| "test".to_string(), 1);

  let item = pool.get().await.unwrap();
  pool.put(item);
  assert_eq!(pool.current_count(), 1);

  pool.put("extra".to_string());
  assert_eq!(pool.current_count(), 1);
  assert_eq!(pool.get().await.as_deref(), Some("test"));

  pool.close();
}

#[tokio::test]
async fn test_close_releases_blocked_get_and_rejects_put() {
  setup_tracing_for_test();
  let (_, generator) = counting_generator();
  let pool = Pool::new(generator, 1);

  let held1 = pool.get().await.unwrap();
  let held2 = pool.get().await.unwrap();

  let waiter_pool = pool.clone();
  let waiter = tokio::spawn(async move { waiter_pool.get().await });
  sleep(Duration::from_millis(30)).await;

  pool.close();
  pool.close(); // idempotent
  assert!(pool.is_closed());

  let result = timeout(Duration::from_millis(500), waiter)
    .await
    .expect("blocked get should be released by close")
    .unwrap();
  assert_eq!(result, None);
  assert_eq!(pool.get().await, None);

  assert_eq!(pool.try_put(held1), Err(PoolError::Closed));
  let put_after_close = std::panic::catch_unwind(AssertUnwindSafe(|| pool.put(held2)));
  assert!(put_after_close.is_err(), "put after close must panic");
}

#[tokio::test]
async fn test_close_drains_buffered_items() {
  setup_tracing_for_test();
  let pool = Pool::new(|| 0u8, 4);
  assert_eq!(pool.current_count(), 4);
  pool.close();
  assert_eq!(pool.current_count(), 0);
  pool.set_size(10);
  assert_eq!(pool.size(), 4, "set_size is a no-op after close");
}

#[tokio::test]
async fn test_set_size_grows_and_refills() {
  setup_tracing_for_test();
  let (calls, generator) = counting_generator();
  let pool = Pool::new(generator, 2);

  pool.set_size(5);
  assert_eq!(pool.size(), 5);
  assert_eq!(pool.current_count(), 5);
  assert_eq!(calls.load(Ordering::SeqCst), 5);

  pool.close();
}

#[tokio::test]
async fn test_growing_wakes_blocked_get() {
  setup_tracing_for_test();
  let pool = Pool::new(|| 1u32, 1);
  let _a = pool.get().await.unwrap();
  let _b = pool.get().await.unwrap();

  let waiter_pool = pool.clone();
  let waiter = tokio::spawn(async move { waiter_pool.get().await });
  sleep(Duration::from_millis(30)).await;

  pool.set_size(2);
  let got = timeout(Duration::from_millis(500), waiter).await.expect("grow should wake waiter").unwrap();
  assert_eq!(got, Some(1));

  pool.close();
}

#[tokio::test]
async fn test_set_size_shrinks_and_clamps() {
  setup_tracing_for_test();
  let pool = Pool::new(|| "test", 5);

  pool.set_size(2);
  assert_eq!(pool.size(), 2);
  assert!(pool.current_count() <= 2);

  pool.set_size(0);
  assert_eq!(pool.size(), 1);
  assert_eq!(pool.current_count(), 1);

  pool.close();
}

// Known sharp edge: shrinking resets the on-demand creation counter to the
// number of idle items kept, ignoring items that are checked out.
#[tokio::test]
async fn test_shrink_resets_items_created() {
  setup_tracing_for_test();
  let (calls, generator) = counting_generator();
  let pool = Pool::new(generator, 3);

  let mut held = Vec::new();
  for _ in 0..5 {
    held.push(pool.get().await.unwrap());
  }
  assert_eq!(pool.items_created(), 2);
  assert_eq!(pool.current_count(), 0);

  pool.set_size(2);
  assert_eq!(pool.items_created(), 0);

  // Two more items can be created even though five are still checked out.
  let extra1 = pool.get().await.unwrap();
  let extra2 = pool.get().await.unwrap();
  assert_ne!(extra1, extra2);
  assert_eq!(calls.load(Ordering::SeqCst), 7);
  assert_eq!(pool.items_created(), 2);

  pool.close();
}

#[tokio::test]
async fn test_generator_called_once_per_missing_item() {
  setup_tracing_for_test();
  let (calls, generator) = counting_generator();
  let pool = Pool::new(generator, 3);
  assert_eq!(calls.load(Ordering::SeqCst), 3);

  for _ in 0..3 {
    pool.get().await.unwrap();
  }
  assert_eq!(calls.load(Ordering::SeqCst), 3);

  pool.get().await.unwrap();
  assert_eq!(calls.load(Ordering::SeqCst), 4);

  pool.close();
}

#[tokio::test]
async fn test_using_returns_item_to_pool() {
  setup_tracing_for_test();
  let pool = Pool::new(|| 1, 1);

  let seen = pool.using(|item| *item + 1).await;
  assert_eq!(seen, Some(2));
  assert_eq!(pool.current_count(), 1);

  pool.close();
  assert_eq!(pool.using(|item| *item).await, None);
}

#[tokio::test]
async fn test_capacity_invariant_under_random_operations() {
  setup_tracing_for_test();
  let pool = Pool::new(|| 0u64, 4);
  let mut held = Vec::new();
  let mut rng = rand::rng();

  for _ in 0..500 {
    match rng.random_range(0..3) {
      0 => {
        // Only take when it cannot block.
        if pool.current_count() > 0 || pool.items_created() < pool.size() {
          held.push(pool.get().await.unwrap());
        }
      }
      1 => {
        if let Some(item) = held.pop() {
          pool.put(item);
        }
      }
      _ => pool.set_size(rng.random_range(0..8)),
    }
    assert!(pool.current_count() <= pool.size());
  }

  pool.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_put() {
  setup_tracing_for_test();
  let (_, generator) = counting_generator();
  let pool = Pool::new(generator, 10);

  let mut workers = Vec::new();
  for _ in 0..50 {
    let pool = pool.clone();
    workers.push(tokio::spawn(async move {
      for _ in 0..10 {
        let item = pool.get().await.unwrap();
        sleep(Duration::from_micros(50)).await;
        pool.put(item);
        assert!(pool.current_count() <= pool.size());
      }
    }));
  }
  for worker in workers {
    timeout(Duration::from_secs(10), worker).await.expect("worker stalled").unwrap();
  }

  assert!(pool.current_count() <= pool.size());
  pool.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_set_size_with_get_put() {
  setup_tracing_for_test();
  let pool = Pool::new(|| "test", 5);

  let mut workers = Vec::new();
  for i in 0..10 {
    let pool = pool.clone();
    workers.push(tokio::spawn(async move {
      pool.set_size(i % 5 + 1);
    }));
  }
  for _ in 0..10 {
    let pool = pool.clone();
    workers.push(tokio::spawn(async move {
      for _ in 0..5 {
        if let Some(item) = pool.get().await {
          let _ = pool.try_put(item);
        }
      }
    }));
  }

  // Unblock any getter left waiting by a shrink.
  let closer_pool = pool.clone();
  let closer = tokio::spawn(async move {
    sleep(Duration::from_secs(2)).await;
    closer_pool.close();
  });

  for worker in workers {
    worker.await.unwrap();
  }
  assert!(pool.current_count() <= pool.size());
  closer.abort();
  pool.close();
}
