//! Error types for the replay driver.
//!
//! [`EngineError`] is the top-level error type that wraps every failure
//! mode during startup and replay.

/// Top-level error for the replay driver.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: patient_zero_core::ConfigError,
    },

    /// The user store could not be reached.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: patient_zero_db::StoreError,
    },

    /// Reading the event input failed.
    #[error("input error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An input line was not a valid event.
    #[error("line {line}: invalid event: {source}")]
    Parse {
        /// One-based line number in the input.
        line: usize,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}
