//! Bounded concurrency helpers for async tasks.
//!
//! The centrepiece is [`TaskGroup`]: a set of tasks that never has more
//! than `capacity` of them running at once, keeps the first error any of
//! them returns, and can signal a linked [`CancellationToken`] when the
//! first task fails or the group finishes.
//!
//! ```rust,no_run
//! use utilz_sync::TaskGroup;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let group = TaskGroup::<anyhow::Error>::new(4)?;
//! for url in ["a", "b", "c"] {
//!     group
//!         .go(async move {
//!             println!("fetching {url}");
//!             Ok(())
//!         })
//!         .await?;
//! }
//! group.wait().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`run_batch`] and [`spawn_result`] cover the unbounded cases: run a fixed
//! list of futures and keep the first error, or spawn one future and
//! receive its output through a channel.
//!
//! [`Shutdown`] turns SIGINT and SIGTERM into a cancelled token, and
//! [`TaskGroup::wait_timeout`] bounds how long a join may take.

pub mod batch;
pub mod group;
pub mod shutdown;

pub use batch::{run_batch, spawn_result};
pub use group::TaskGroup;
pub use shutdown::{notify, Shutdown, ShutdownSignal};
pub use tokio_util::sync::CancellationToken;
pub use utilz_core::{Error, GroupConfig, Result};
