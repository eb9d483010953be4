//! # request-injector
//!
//! Submits approved simulation requests to a workload manager over a remote
//! command channel, and approves the resulting workflows.
//!
//! Jobs run on a worker pool ([`engine`]); per-prepid locks and batch
//! counters live in [`locker`]; the injection state machine and the approval
//! retry loop are in [`inject`]; notifications are coalesced by [`notify`].

pub mod config;
pub mod engine;
pub mod error;
pub mod inject;
pub mod locker;
pub mod model;
pub mod notify;
pub mod remote;
pub mod scripts;
pub mod service;
pub mod store;
pub mod telemetry;
