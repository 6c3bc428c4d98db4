//! Configuration: a 4-tier hierarchical loader (System < Team < Project <
//! User, highest wins) plus a policy layer for locking settings at a level
//! below which they can't be loosened.

pub mod loader;
pub mod policy;

pub use loader::{
    build_roster, ArchiveUtilityWeightsSettings, ConfigLevel, ConfigLoader, NoeticConfig, PersonaSettings,
    PrarSettings, StoreSettings, WatchdogSettings,
};
pub use policy::{PolicyAction, PolicyBuilder, PolicyConfig, PolicyEnforcer};
