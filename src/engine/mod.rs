//! Submission engine: the worker pool that runs injection and approval jobs.

pub mod pool;

pub use pool::{QueuePolicy, Task, WorkerPool};
