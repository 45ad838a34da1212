//! Trait seams between the engine and its collaborators.

pub mod channel;
pub mod provider;
pub mod store;

pub use channel::Channel;
pub use provider::BenefitProvider;
pub use store::{AccountGuard, AccountStore, FireLedger, SweepLease};
