//! # kvrelay Core
//!
//! The resource facade: one connection pool and one tiered cache per store
//! node, with command routing, write invalidation and performance reports.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvrelay_core::{RelayConfig, ResourceFacade};
//! use kvrelay_domain::Command;
//! use kvrelay_pool::RedisTransport;
//!
//! let relay = ResourceFacade::new(RelayConfig::from_env(), RedisTransport::new(url)?)?;
//! relay.start().await;
//!
//! let reply = relay.execute(&Command::new("GET").arg("user:1")).await?;
//! println!("{}", relay.get_performance_report().to_json()?);
//! relay.shutdown().await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod facade;
pub mod policy;
pub mod registry;
pub mod report;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use facade::ResourceFacade;
pub use policy::{CommandClass, CommandPolicy, affected_keys, cache_key, key_prefix};
pub use registry::{HashRouter, KeyRouter, ResourceRegistry};
pub use report::{
    PerformanceReport, Recommendation, RecommendationKind, RelayStats, Sample, Severity,
    StatsWindow,
};
