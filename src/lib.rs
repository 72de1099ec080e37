//! # Sports Pool
//!
//! Friends draft real MLB and NFL players and teams into scoring categories;
//! the pool totals their season stats once a day.
//!
//! ## Architecture
//!
//! - **models**: Friends, players, years, categories, and score types
//! - **fetch**: Cached, timed HTTP GET shared by every provider
//! - **sources**: MLB and NFL provider adapters behind normalized traits
//! - **calculate**: Friend totals and display ordering
//! - **engine**: Concurrent per-category score fetching
//! - **etl**: Daily-reset stats cache with single-flight refresh
//! - **roster**: Diffing and transactional saving of rosters and years
//! - **storage**: Persistence traits and the SQLite store
//! - **pool**: Facade used by the API and the CLI
//! - **api**: REST API endpoints
//! - **config**: Configuration loading and validation

pub mod api;
pub mod calculate;
pub mod config;
pub mod engine;
pub mod etl;
pub mod fetch;
pub mod models;
pub mod pool;
pub mod roster;
pub mod sources;
pub mod storage;

pub use models::*;
