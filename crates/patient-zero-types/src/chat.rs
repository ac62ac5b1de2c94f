//! Chat-side types seen by the contagion engine.
//!
//! The platform connection is outside this workspace. These types are the
//! narrow slice of a chat event the engine needs: who wrote what, where, and
//! when, plus whether the author is still a member of the guild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, GuildId, MessageId, ParticipantId};

/// The author of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Account name.
    pub name: String,
    /// Guild-specific nickname, if one is set.
    #[serde(default)]
    pub nickname: Option<String>,
}

impl Author {
    /// Create an author with no nickname.
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nickname: None,
        }
    }

    /// Attach a guild nickname.
    #[must_use]
    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }
}

/// An inbound message that may trigger a contagion evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The triggering message.
    pub message_id: MessageId,
    /// Guild the message was posted in.
    pub guild_id: GuildId,
    /// Human-readable guild name, used in status lines.
    pub guild_name: String,
    /// Channel the message was posted in.
    pub channel_id: ChannelId,
    /// Message author.
    pub author: Author,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

/// A message preceding a trigger, as yielded by a history source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// The historical message.
    pub id: MessageId,
    /// Message author.
    pub author: Author,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Whether the author is still a member of the guild.
    pub is_current_member: bool,
}

/// Where a notification should be published.
///
/// Both targets are best-effort: a sink with no channel configured for a
/// selector silently drops the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelSelector {
    /// The single, bot-wide status channel.
    GlobalStatus,
    /// The conventionally named log channel of one guild.
    GuildLog(GuildId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_defaults_to_none_when_absent() {
        let author: Result<Author, _> = serde_json::from_str(r#"{"id":5,"name":"dave"}"#);
        assert_eq!(author.ok(), Some(Author::new(ParticipantId::new(5), "dave")));
    }

    #[test]
    fn with_nickname_sets_nickname() {
        let author = Author::new(ParticipantId::new(5), "dave").with_nickname("D");
        assert_eq!(author.nickname.as_deref(), Some("D"));
    }
}
