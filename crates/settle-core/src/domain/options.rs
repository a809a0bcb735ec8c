//! Submission options.

use std::fmt;
use std::future::Future;

use super::{CompleteContext, ErrorContext};
use crate::error::{BoxError, TaskError};
use crate::ports::Action;

pub type OnComplete<V> = Box<dyn FnOnce(&V, CompleteContext) + Send>;
pub type OnError<V> = Box<dyn FnOnce(&TaskError, ErrorContext<V>) + Send>;

/// Everything a caller supplies for one submission.
///
/// # Example
/// ```ignore
/// let opts = TaskOptions::new("update", || async { api.update(4).await })
///     .depends_on(["add"])
///     .can_replace(true)
///     .on_complete(|value, ctx| if ctx.is_final { view.set(*value) });
/// ```
pub struct TaskOptions<V> {
    pub(crate) name: String,
    pub(crate) action: Box<dyn Action<V>>,
    pub(crate) depends_on: Vec<String>,
    pub(crate) waits_for: Option<Vec<String>>,
    pub(crate) can_replace: bool,
    pub(crate) on_complete: Option<OnComplete<V>>,
    pub(crate) on_error: Option<OnError<V>>,
}

impl<V: Send + 'static> TaskOptions<V> {
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, BoxError>> + Send + 'static,
    {
        Self::from_action(name, Box::new(action))
    }

    /// Build from an existing `Action` implementation.
    pub fn from_action(name: impl Into<String>, action: Box<dyn Action<V>>) -> Self {
        Self {
            name: name.into(),
            action,
            depends_on: Vec::new(),
            waits_for: None,
            can_replace: false,
            on_complete: None,
            on_error: None,
        }
    }

    /// Names whose failure cancels this submission. Also waited for unless
    /// `waits_for` is given.
    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    /// Names this submission waits for. Waiting alone never cancels.
    pub fn waits_for<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.waits_for = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn can_replace(mut self, can_replace: bool) -> Self {
        self.can_replace = can_replace;
        self
    }

    pub fn on_complete(
        mut self,
        callback: impl FnOnce(&V, CompleteContext) + Send + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn on_error(
        mut self,
        callback: impl FnOnce(&TaskError, ErrorContext<V>) + Send + 'static,
    ) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<V> fmt::Debug for TaskOptions<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("waits_for", &self.waits_for)
            .field("can_replace", &self.can_replace)
            .finish_non_exhaustive()
    }
}
