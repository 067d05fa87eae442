//! Tokio-based concurrency primitives: a resizable object pool, a fan-out
//! broadcaster, future combinators and a signal-driven task reloader.

pub mod broadcast;
pub mod channel;
mod context;
mod error;
pub mod future;
mod locked;
mod pool;
pub mod os_signal;
pub mod reloader;

pub use broadcast::{with_subscription, Broadcaster, Subscription};
pub use context::Context;
pub use error::{ContextError, FutureError, PoolError, ReloadError};
pub use locked::LockedValue;
pub use pool::Pool;
pub use reloader::{with_os_signal, with_reload};
