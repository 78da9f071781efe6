//! Builder methods for creating errors with context

use super::types::Error;

impl Error {
    /// Create an invalid capacity error
    #[must_use]
    pub fn invalid_capacity(capacity: usize, max: usize) -> Self {
        Error::InvalidCapacity { capacity, max }
    }

    /// Create a permit acquisition error
    #[must_use]
    pub fn permit_acquisition(message: impl Into<String>) -> Self {
        Error::PermitAcquisition {
            message: message.into(),
        }
    }

    /// Create a cancellation error for the named operation
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a timeout error for the named operation
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a signal registration error
    #[must_use]
    pub fn signal(message: impl Into<String>) -> Self {
        Error::Signal {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create an environment variable error
    #[must_use]
    pub fn environment(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Environment {
            variable: variable.into(),
            message: message.into(),
        }
    }

    /// Create a tracing initialisation error
    #[must_use]
    pub fn tracing_init(message: impl Into<String>) -> Self {
        Error::TracingInit {
            message: message.into(),
        }
    }

    /// Whether this error came from a cancelled operation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Whether this error came from an operation that ran out of time
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}
