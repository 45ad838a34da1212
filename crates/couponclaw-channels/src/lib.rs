//! # CouponClaw Channels
//! Outbound notification channels and the dispatcher that fans a message out
//! to every channel a user can be reached on.

pub mod bark;
pub mod discord;
pub mod dispatch;
pub mod feishu;
mod http;
pub mod serverchan;
pub mod telegram;
pub mod webhook;

pub use dispatch::{DispatchReport, Dispatcher};
