//! Display implementations for error types

use super::types::Error;
use std::fmt;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCapacity { capacity, max } => {
                write!(
                    f,
                    "invalid group capacity {capacity}: must be between 1 and {max}"
                )
            }
            Error::PermitAcquisition { message } => {
                write!(f, "failed to acquire concurrency permit: {message}")
            }
            Error::Cancelled { operation } => {
                write!(f, "operation '{operation}' was cancelled")
            }
            Error::Timeout { operation, timeout } => {
                write!(f, "operation '{operation}' timed out after {timeout:?}")
            }
            Error::Signal { message } => {
                write!(f, "failed to listen for signals: {message}")
            }
            Error::Configuration { message } => {
                write!(f, "configuration error: {message}")
            }
            Error::Environment { variable, message } => {
                write!(f, "environment variable '{variable}' error: {message}")
            }
            Error::TracingInit { message } => {
                write!(f, "failed to initialise tracing: {message}")
            }
        }
    }
}
