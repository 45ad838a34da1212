//! # CouponClaw Providers
//!
//! Talks to the upstream benefit provider. The only implementation is the
//! MCP server exposed by the provider, reached over streamable HTTP.

pub mod client;
pub mod parse;
pub mod provider;

pub use client::McpClient;
pub use provider::McpProvider;
