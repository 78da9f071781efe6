//! Core errors, configuration and constants for the `utilz` workspace.
//!
//! ## Key Components
//!
//! - **`errors`**: The shared `Error` enum and `Result` alias. Task errors
//!   produced by callers are never wrapped in it; it only covers misuse of
//!   the library and environment problems.
//! - **`config`**: `GroupConfig`, the settings a task group is built from,
//!   loadable from the process environment.
//! - **`tracing`**: Subscriber initialisation for binaries and tests.
//! - **`constants`**: Environment variable names and defaults.

pub mod config;
pub mod constants;
pub mod errors;
pub mod tracing;

pub use self::{
    config::GroupConfig,
    constants::*,
    errors::{Error, Result, ResultExt},
};
