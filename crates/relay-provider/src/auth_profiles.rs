//! Stored auth profiles and the cooldown side-table read during failover.
//!
//! A profile is one credential for one provider, addressed by a store-unique
//! id such as `anthropic:work`. The store persists profiles together with
//! per-profile usage stats; ordering and cooldown predicates are pure
//! functions over a loaded store and an explicit `now`.

mod external;
mod order;
mod store;
mod usage;

pub use external::*;
pub use order::*;
pub use store::*;
pub use usage::*;
