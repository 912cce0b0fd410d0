/// Result alias that carries the custom [`DanceError`] type.
pub type Result<T> = std::result::Result<T, DanceError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum DanceError {
    /// A move list line held a token outside the fixed move vocabulary.
    #[error("unknown move `{token}` on line {line}")]
    UnknownMove { line: usize, token: String },
    /// The move list contained no moves at all.
    #[error("move list is empty")]
    EmptyMoveList,
    /// A beat arrived after the last move of the routine was consumed.
    #[error("move sequence exhausted after {len} moves")]
    SequenceExhausted { len: usize },
    /// A configuration value that the pipeline cannot run with.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around configuration parse errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl DanceError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns `true` for errors caused by the move list or configuration,
    /// which are expected to be caught before the detection loop starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownMove { .. }
                | Self::EmptyMoveList
                | Self::SequenceExhausted { .. }
                | Self::InvalidConfig(_)
        )
    }
}

impl From<&str> for DanceError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for DanceError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
