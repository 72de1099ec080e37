//! Core data models for the pool.

mod category;
mod ids;
mod roster;
mod score;

pub use category::*;
pub use ids::*;
pub use roster::*;
pub use score::*;
