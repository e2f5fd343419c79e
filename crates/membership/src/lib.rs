//! Per-backend recipient registry with pluggable persistence.

pub mod registry;
pub mod store;

pub use {
    registry::MembershipRegistry,
    store::{JsonFileStore, MemoryStore, RegistryStore},
};
