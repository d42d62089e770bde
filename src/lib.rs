#![deny(missing_docs)]

//! A fixed-size worker thread pool.
//!
//! A [`ThreadPool`] owns a set of long-lived worker threads that pull tasks
//! from one shared FIFO queue. Every submission returns a [`TaskHandle`]
//! that later yields the task's value, or re-raises its panic on the
//! thread that asks for the result.

mod error;
mod handle;
/// The worker pool and its configuration.
pub mod thread_pool;

pub use error::{PoolError, Result, TaskError};
pub use handle::{TaskHandle, TaskState};
pub use thread_pool::{Builder, ThreadPool};
