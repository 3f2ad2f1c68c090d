//! Tiered Coordinator
//!
//! Orchestrates lookups and mutations across the volatile, cache and
//! relational tiers, with rollback and cache compensation on partial failure.

mod engine;

pub use engine::{CoordinatorConfig, StateSnapshot, TieredCoordinator, DEFAULT_REWARM_TOP_N};
