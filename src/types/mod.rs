//! Common types and data structures.

pub mod engine;
pub mod member;
pub mod pool;

pub use engine::EngineType;
pub use member::{Member, Metrics, INITIAL_SCORE};
pub use pool::{Pool, PoolKey, ReconcileStats};
