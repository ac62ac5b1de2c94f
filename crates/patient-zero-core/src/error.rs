//! Error types for the contagion engine.

use patient_zero_db::StoreError;

/// A call into a chat-platform collaborator failed.
///
/// Collaborators (role oracle, history source, notification sink) are
/// implemented outside this crate, so their failures are carried as a
/// description rather than a typed source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct CollaboratorError {
    /// The collaborator operation that failed (e.g. `mark_infected`).
    pub operation: &'static str,
    /// Description of the failure.
    pub message: String,
}

impl CollaboratorError {
    /// Build an error for the named operation.
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Errors that can occur while evaluating or committing a contagion event.
#[derive(Debug, thiserror::Error)]
pub enum ContagionError {
    /// The participant store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A chat-platform collaborator failed.
    #[error("collaborator error: {source}")]
    Collaborator {
        /// The underlying collaborator error.
        #[from]
        source: CollaboratorError,
    },
}
