//! Core error type definitions

/// Result type alias for utilz operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for utilz operations using thiserror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A group was asked for zero permits or more than the semaphore can hold
    InvalidCapacity { capacity: usize, max: usize },

    /// The permit semaphore was closed while a submitter waited on it
    PermitAcquisition { message: String },

    /// An operation stopped because its cancellation token fired
    Cancelled { operation: String },

    /// A join did not finish within its deadline
    Timeout {
        operation: String,
        timeout: std::time::Duration,
    },

    /// Listening for process signals failed
    Signal { message: String },

    /// Configuration errors
    Configuration { message: String },

    /// Environment variable related errors
    Environment { variable: String, message: String },

    /// Installing the global tracing subscriber failed
    TracingInit { message: String },
}
