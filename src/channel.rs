use tokio::sync::mpsc;
use tracing::trace;

/// Merges several receivers into one.
///
/// Each input is drained by its own task. The returned receiver yields values
/// in arrival order and closes once every input is closed and drained.
/// Must be called from within a Tokio runtime.
pub fn zip<T, I>(buffer: usize, channels: I) -> mpsc::Receiver<T>
where
  T: Send + 'static,
  I: IntoIterator<Item = mpsc::Receiver<T>>,
{
  let (tx, rx) = mpsc::channel(buffer.max(1));
  for (input, mut channel) in channels.into_iter().enumerate() {
    let tx = tx.clone();
    tokio::spawn(async move {
      while let Some(value) = channel.recv().await {
        if tx.send(value).await.is_err() {
          trace!(input, "Zip output dropped, stopping forwarder.");
          return;
        }
      }
      trace!(input, "Zip input closed.");
    });
  }
  rx
}
