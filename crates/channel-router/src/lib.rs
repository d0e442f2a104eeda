pub mod abilities;
pub mod cache;
pub mod error;
pub mod group;
pub mod router;
pub mod selector;
mod store;

pub use abilities::{regenerate_abilities, AbilityService, RepairReport};
pub use cache::{CacheSnapshot, CacheStats, CachedCandidate, RouteEntry, RoutingCache};
pub use error::RouterError;
pub use group::{AutoGroupResolver, GroupSelector, AUTO_GROUP};
pub use router::{ChannelRouter, ChannelSelection, RouterConfig};
pub use selector::{
    normalize_model, priority_tiers, target_priority, weighted_index, SelectionEngine,
    SMOOTHING_WEIGHT,
};
