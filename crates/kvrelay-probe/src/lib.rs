//! # kvrelay Probe
//!
//! Load generator for exercising a [`ResourceFacade`](kvrelay_core::ResourceFacade)
//! against a live store or the in-memory backend.
//!
//! - Read-heavy command mix with a hot key set
//! - Concurrent workers sharing one facade
//! - Outcome summary alongside the facade's performance report

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod runner;
pub mod workload;

pub use runner::{ProbeOptions, ProbeSummary, run, seed};
pub use workload::WorkloadGenerator;
