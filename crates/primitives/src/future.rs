use std::future::Future;
use std::pin::Pin;

/// A pinned, boxed future that is required to be Send and 'static.
///
/// Mutation operations are handed to the queue in this shape so they can be
/// moved onto a runtime task once the dispatcher starts them.
pub type BoxFutureStatic<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
