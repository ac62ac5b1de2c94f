//! Chat-platform collaborators.
//!
//! The engine never talks to the chat platform directly. It asks a
//! [`RoleOracle`] about infection markers and guild membership, reads
//! channel history through a [`HistorySource`], and publishes status lines
//! to a [`NotificationSink`]. A platform adapter implements all three; the
//! [`memory`](crate::memory) module provides in-process versions.

use async_trait::async_trait;
use futures::stream::BoxStream;
use patient_zero_types::{ChannelId, ChannelSelector, GuildId, HistoryMessage, MessageId, ParticipantId};

use crate::error::CollaboratorError;

/// Lazily produced, reverse-chronological channel history.
///
/// The stream is consumed once; each evaluation fetches a fresh one.
pub type HistoryStream = BoxStream<'static, Result<HistoryMessage, CollaboratorError>>;

/// Source of truth for the infected marker and guild membership.
#[async_trait]
pub trait RoleOracle: Send + Sync {
    /// Whether `participant` currently carries the infected marker in `guild`.
    async fn is_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<bool, CollaboratorError>;

    /// Apply the infected marker.
    async fn mark_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<(), CollaboratorError>;

    /// Remove the infected marker.
    async fn clear_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<(), CollaboratorError>;

    /// Whether `participant` is still a member of `guild`.
    async fn is_current_member(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<bool, CollaboratorError>;

    /// Every member of `guild` currently carrying the infected marker.
    async fn infected_members(&self, guild: GuildId)
    -> Result<Vec<ParticipantId>, CollaboratorError>;
}

/// Reader of recent channel history.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` messages posted in `channel` before `before`, nearest
    /// first.
    async fn fetch_recent_messages(
        &self,
        channel: ChannelId,
        before: MessageId,
        limit: usize,
    ) -> Result<HistoryStream, CollaboratorError>;
}

/// Destination for human-readable status lines.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publish `text` to `target`.
    ///
    /// Implementations with no channel configured for `target` return
    /// `Ok(())` without sending anything.
    async fn publish(&self, target: ChannelSelector, text: &str) -> Result<(), CollaboratorError>;
}
