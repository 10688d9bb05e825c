//! Provider failover and credential rotation for relay agents.
//!
//! Resolves which provider/model pairs to try for an agent turn, which stored
//! auth profiles back each provider, when a cooling-down provider may be
//! probed, and how failures are classified and propagated across the chain.

mod auth_profiles;
mod config;
mod failover_error;
mod fallback_candidates;
mod fallback_events;
mod model_fallback;
mod model_selection;
mod probe_throttle;

pub use auth_profiles::*;
pub use config::*;
pub use failover_error::*;
pub use fallback_candidates::*;
pub use fallback_events::*;
pub use model_fallback::*;
pub use model_selection::*;
pub use probe_throttle::*;
