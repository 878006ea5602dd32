//! Chat platform seam
//!
//! The engine talks to the chat service only through [`ChatPlatform`]; the
//! Discord adapter lives in the bot binary.

use crate::embed::EmbedSnapshot;
use crate::types::{ChannelId, MessageId, OptionToken, UserId};
use async_trait::async_trait;

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post a new message carrying `embed`
    async fn send_embed(
        &self,
        channel: ChannelId,
        embed: &EmbedSnapshot,
    ) -> Result<MessageId, PlatformError>;

    /// Replace the embed of an existing message
    async fn edit_embed(
        &self,
        channel: ChannelId,
        message: MessageId,
        embed: &EmbedSnapshot,
    ) -> Result<(), PlatformError>;

    /// Add the bot's own reaction
    async fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        token: &OptionToken,
    ) -> Result<(), PlatformError>;

    /// Retract `user`'s reaction
    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        token: &OptionToken,
    ) -> Result<(), PlatformError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Chat platform request failed: {0}")]
    Request(String),
    #[error("Message {0} not found")]
    MessageNotFound(MessageId),
    #[error("Unsupported reaction token: {0}")]
    UnsupportedToken(String),
}

/// Whether a reaction was added or removed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionKind {
    Added,
    Removed,
}

/// Reaction change on some message, as delivered by the platform
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionEvent {
    pub kind: ReactionKind,
    pub message: MessageId,
    pub user: UserId,
    pub token: OptionToken,
}

impl ReactionEvent {
    pub fn added(message: MessageId, user: UserId, token: impl Into<OptionToken>) -> Self {
        Self {
            kind: ReactionKind::Added,
            message,
            user,
            token: token.into(),
        }
    }

    pub fn removed(message: MessageId, user: UserId, token: impl Into<OptionToken>) -> Self {
        Self {
            kind: ReactionKind::Removed,
            message,
            user,
            token: token.into(),
        }
    }
}
