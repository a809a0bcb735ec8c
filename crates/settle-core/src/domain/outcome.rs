//! What a submission settles with, and what its callbacks are told.

/// Successful settlement of a submission handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<V> {
    /// The action ran and produced this value.
    Value(V),

    /// A later submission with the same name replaced this one before it ran.
    Superseded,
}

impl<V> Resolution<V> {
    pub fn value(self) -> Option<V> {
        match self {
            Resolution::Value(value) => Some(value),
            Resolution::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Resolution::Superseded)
    }
}

/// Passed to `on_complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompleteContext {
    /// The value is the one to treat as current truth.
    pub is_final: bool,
}

/// Passed to `on_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext<V> {
    pub is_final: bool,

    /// Value of the most recently settled item, if any.
    pub last_value: Option<V>,
}
