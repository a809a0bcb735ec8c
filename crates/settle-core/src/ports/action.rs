//! Action port - the one operation a submission runs.

use std::future::Future;

use async_trait::async_trait;

use crate::error::BoxError;

/// A single-shot async operation producing a value or failing.
///
/// The engine invokes it at most once. Closures returning a future implement it
/// directly:
/// ```ignore
/// let action = || async { Ok::<_, BoxError>(42) };
/// ```
#[async_trait]
pub trait Action<V>: Send + 'static {
    async fn run(self: Box<Self>) -> Result<V, BoxError>;
}

#[async_trait]
impl<V, F, Fut> Action<V> for F
where
    V: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
{
    async fn run(self: Box<Self>) -> Result<V, BoxError> {
        let action = *self;
        action().await
    }
}
