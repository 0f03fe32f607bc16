use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future used at `dyn` seams (extension hooks, erased executors).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased, cheaply cloneable value as stored in accessor cells,
/// preset tables and tag stores.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;
