//! Extension traits for turning foreign errors into [`Error`]

use super::types::{Error, Result};
use std::fmt::Display;

/// Attach utilz context to any `Result` whose error can be displayed
pub trait ResultExt<T> {
    /// Report the error against the environment variable `variable`
    ///
    /// `describe` only runs on failure.
    fn env_context<F>(self, variable: &str, describe: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Display,
{
    fn env_context<F>(self, variable: &str, describe: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::environment(variable, format!("{}: {e}", describe())))
    }
}
