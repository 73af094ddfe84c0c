//! Storage module
//!
//! Redundant identity persistence over the key-value substrate and the
//! mirror database.

pub mod identity_store;

pub use identity_store::{
    IdentityHit, IdentityRepository, IdentityStore, MirrorIdentityStore, PrimaryIdentityStore,
};
