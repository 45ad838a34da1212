//! Notification channel trait.

use async_trait::async_trait;

use crate::error::ChannelError;
use crate::types::{ChannelKind, Message};

/// An outbound notification channel (Telegram, Bark, webhook, ...).
#[async_trait]
pub trait Channel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Destination used when a user's preference does not name one.
    fn default_destination(&self) -> Option<&str> {
        None
    }

    /// The user id doubles as a destination on this channel (a Telegram
    /// private chat id is the user id).
    fn addresses_by_user_id(&self) -> bool {
        false
    }

    async fn send(&self, destination: &str, message: &Message) -> Result<(), ChannelError>;
}
