use thiserror::Error;

/// Error types that can occur while driving a rule session
#[derive(Error, Debug)]
pub enum EngineError {
    /// Insert of a fact that is already present in working memory
    #[error("fact is already present in working memory: {fact}")]
    AlreadyExists {
        /// Display form of the offending fact
        fact: String,
    },

    /// Update or retract of a fact that is not in working memory
    #[error("fact is not present in working memory: {fact}")]
    UnknownFact {
        /// Display form of the offending fact
        fact: String,
    },

    /// A condition closure failed during network propagation
    #[error("condition `{condition}` failed during {operation}: {message}")]
    ConditionEvaluation {
        /// Name of the failing selection/join/aggregate node
        condition: String,
        /// The top-level operation that was in flight
        operation: String,
        /// Underlying error message
        message: String,
    },

    /// A rule action failed during fire
    #[error("action of rule `{rule}` failed: {message}")]
    ActionEvaluation {
        /// Name of the rule whose action failed
        rule: String,
        /// Underlying error message
        message: String,
    },

    /// A fact or tuple element had an unexpected runtime type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name
        expected: &'static str,
        /// Actual type description
        actual: String,
    },

    /// General evaluation error raised by user-supplied closures
    #[error("evaluation error: {message}")]
    Evaluation {
        /// Error message
        message: String,
    },
}

impl EngineError {
    /// Shorthand for an [`EngineError::Evaluation`] with the given message.
    pub fn evaluation(message: impl Into<String>) -> Self {
        EngineError::Evaluation { message: message.into() }
    }
}

/// Convenient Result type alias for session operations
pub type Result<T> = std::result::Result<T, EngineError>;
