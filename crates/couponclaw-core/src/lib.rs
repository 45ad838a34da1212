//! # CouponClaw Core
//! Shared domain types, traits, configuration and error definitions.
//!
//! Every other crate in the workspace depends on this one; it carries no I/O
//! beyond reading and writing the config file.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CouponClawConfig;
pub use error::{ChannelError, CouponClawError, ProviderError, Result};
pub use types::*;
