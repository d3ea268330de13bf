//! # kvrelay Cache
//!
//! Two-tier in-process cache used by the kvrelay facade to answer repeated
//! keyed reads without a round trip to the remote store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       TieredCache                         │
//! │   get / set / has / delete / delete_prefix / clear       │
//! └──────────────────────────────────────────────────────────┘
//!            │ one lock per instance          │ observers
//!            ▼                                ▼
//! ┌──────────────────────┐       ┌─────────────────────────┐
//! │ CacheTier L1 (hot)   │       │ cache:hit  cache:miss   │
//! │ CacheTier L2 (spill) │       │ cache:set  cache:evict  │
//! └──────────────────────┘       └─────────────────────────┘
//!            ▲
//!            │ periodic expiry sweep (single task)
//! ```
//!
//! Caching is purely an optimisation: serialization or compression failures
//! are logged and degrade to a miss, never to an error for the caller.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kvrelay_cache::{CacheConfig, TieredCache};
//!
//! let cache = TieredCache::new(CacheConfig::default())?;
//! cache.start_sweeper();
//! cache.set("user:1", &profile, Some(Duration::from_secs(30)));
//! let cached: Option<Profile> = cache.get("user:1");
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entry;
pub mod error;
pub mod events;
pub mod stats;
pub mod tier;
pub mod tiered;

pub use config::CacheConfig;
pub use entry::{CacheEntry, Tier};
pub use error::{CacheError, Result};
pub use events::{BroadcastObserver, CacheEvent, CacheObserver, ObserverId};
pub use stats::CacheStats;
pub use tier::CacheTier;
pub use tiered::TieredCache;
