//! Response checks shared by the HTTP channels.

use couponclaw_core::error::ChannelError;
use couponclaw_core::types::ChannelKind;

pub(crate) fn delivery_error(kind: ChannelKind, reason: impl Into<String>) -> ChannelError {
    ChannelError::Delivery { channel: kind.to_string(), reason: reason.into() }
}

pub(crate) fn send_error(kind: ChannelKind, e: reqwest::Error) -> ChannelError {
    let what = if e.is_timeout() { "request timed out" } else { "send failed" };
    delivery_error(kind, format!("{what}: {e}"))
}

/// Fail on non-2xx; returns the body for channel-specific checks.
pub(crate) async fn success_body(kind: ChannelKind, resp: reqwest::Response) -> Result<String, ChannelError> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(delivery_error(kind, format!("API error {status}: {}", truncate(&body, 200))))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
