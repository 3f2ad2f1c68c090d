//! Volatile Tier (process-local)
//!
//! The fastest of the three tiers: an in-process table with optional per-key
//! expiration, sliding TTL on read, and an active-expiration sampler.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                VolatileStore                   │
//! │  RwLock ──► values:  key → value               │
//! │         └─► expires: key → deadline            │
//! │                                                │
//! │  get/update ─► expired? delete : renew         │
//! │  sweep      ─► sample ≤ N keys, drop expired   │
//! └───────────────────────────────────────────────┘
//! ```

mod store;

use std::time::Duration;

pub use store::{VolatileConfig, VolatileStats, VolatileStore};

/// Default deadline extension on read (1 hour)
pub const DEFAULT_RENEWAL_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Default number of expiring keys inspected per sweep
pub const DEFAULT_SWEEP_SAMPLE_SIZE: usize = 10;
