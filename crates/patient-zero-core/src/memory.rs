//! In-memory collaborators.
//!
//! [`MemoryGuilds`] plays the chat platform: it tracks guild membership,
//! infected markers, and per-channel message logs, and implements both
//! [`RoleOracle`] and [`HistorySource`]. [`RecordingSink`] captures every
//! published notification. Both back the unit tests and the replay driver.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use patient_zero_types::{
    Author, ChannelId, ChannelSelector, GuildId, HistoryMessage, MessageId, ParticipantId,
};

use crate::collaborators::{HistorySource, HistoryStream, NotificationSink, RoleOracle};
use crate::error::CollaboratorError;

/// A message as stored in a channel log.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    author: Author,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GuildState {
    members: HashMap<GuildId, HashSet<ParticipantId>>,
    infected: HashMap<GuildId, HashSet<ParticipantId>>,
    channel_guild: HashMap<ChannelId, GuildId>,
    channels: HashMap<ChannelId, Vec<StoredMessage>>,
}

/// In-process stand-in for the chat platform.
#[derive(Debug, Default)]
pub struct MemoryGuilds {
    state: Mutex<GuildState>,
    marker_failures: AtomicU32,
    mark_calls: AtomicU32,
}

impl MemoryGuilds {
    /// Create an empty platform with no guilds.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `participant` to `guild`.
    pub fn join(&self, guild: GuildId, participant: ParticipantId) {
        self.state()
            .members
            .entry(guild)
            .or_default()
            .insert(participant);
    }

    /// Remove `participant` from `guild`, dropping any infected marker.
    pub fn leave(&self, guild: GuildId, participant: ParticipantId) {
        let mut state = self.state();
        if let Some(members) = state.members.get_mut(&guild) {
            members.remove(&participant);
        }
        if let Some(infected) = state.infected.get_mut(&guild) {
            infected.remove(&participant);
        }
    }

    /// Whether `participant` is a member of `guild`.
    pub fn is_member(&self, guild: GuildId, participant: ParticipantId) -> bool {
        self.state()
            .members
            .get(&guild)
            .is_some_and(|members| members.contains(&participant))
    }

    /// Whether `participant` carries the infected marker in `guild`.
    pub fn is_marked(&self, guild: GuildId, participant: ParticipantId) -> bool {
        self.state()
            .infected
            .get(&guild)
            .is_some_and(|infected| infected.contains(&participant))
    }

    /// Set or clear the infected marker directly.
    pub fn set_infected(&self, guild: GuildId, participant: ParticipantId, infected: bool) {
        let mut state = self.state();
        let set = state.infected.entry(guild).or_default();
        if infected {
            set.insert(participant);
        } else {
            set.remove(&participant);
        }
    }

    /// Append a message to a channel log.
    ///
    /// The author joins the guild if they are not yet a member.
    pub fn post(
        &self,
        guild: GuildId,
        channel: ChannelId,
        id: MessageId,
        author: Author,
        timestamp: DateTime<Utc>,
    ) {
        let mut state = self.state();
        state.channel_guild.insert(channel, guild);
        state.members.entry(guild).or_default().insert(author.id);
        state.channels.entry(channel).or_default().push(StoredMessage {
            id,
            author,
            timestamp,
        });
    }

    /// Make the next `count` calls to `mark_infected` fail.
    pub fn fail_next_markers(&self, count: u32) {
        self.marker_failures.store(count, Ordering::Release);
    }

    /// How many times `mark_infected` has been called.
    pub fn mark_calls(&self) -> u32 {
        self.mark_calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl RoleOracle for MemoryGuilds {
    async fn is_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.is_marked(guild, participant))
    }

    async fn mark_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<(), CollaboratorError> {
        self.mark_calls.fetch_add(1, Ordering::AcqRel);
        let pending_failure = self
            .marker_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if pending_failure {
            return Err(CollaboratorError::new(
                "mark_infected",
                "simulated role mutation failure",
            ));
        }
        self.set_infected(guild, participant, true);
        Ok(())
    }

    async fn clear_infected(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<(), CollaboratorError> {
        self.set_infected(guild, participant, false);
        Ok(())
    }

    async fn is_current_member(
        &self,
        participant: ParticipantId,
        guild: GuildId,
    ) -> Result<bool, CollaboratorError> {
        Ok(self.is_member(guild, participant))
    }

    async fn infected_members(
        &self,
        guild: GuildId,
    ) -> Result<Vec<ParticipantId>, CollaboratorError> {
        let mut ids: Vec<ParticipantId> = self
            .state()
            .infected
            .get(&guild)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl HistorySource for MemoryGuilds {
    async fn fetch_recent_messages(
        &self,
        channel: ChannelId,
        before: MessageId,
        limit: usize,
    ) -> Result<HistoryStream, CollaboratorError> {
        let state = self.state();
        let guild = state.channel_guild.get(&channel).copied();
        let members = guild.and_then(|g| state.members.get(&g));
        let recent: Vec<Result<HistoryMessage, CollaboratorError>> = state
            .channels
            .get(&channel)
            .map(|log| {
                log.iter()
                    .rev()
                    .filter(|m| m.id < before)
                    .take(limit)
                    .map(|m| {
                        Ok(HistoryMessage {
                            id: m.id,
                            author: m.author.clone(),
                            timestamp: m.timestamp,
                            is_current_member: members
                                .is_some_and(|set| set.contains(&m.author.id)),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(futures::stream::iter(recent).boxed())
    }
}

/// A notification sink that records what it was asked to publish.
///
/// Only targets that were configured with [`with_global`](Self::with_global)
/// or [`with_guild_log`](Self::with_guild_log) are recorded; anything else
/// is silently dropped, like a guild without a log channel.
#[derive(Debug, Default)]
pub struct RecordingSink {
    global: bool,
    guild_logs: HashSet<GuildId>,
    published: Mutex<Vec<(ChannelSelector, String)>>,
    failing: AtomicBool,
}

impl RecordingSink {
    /// Create a sink with no channels configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the global status channel.
    #[must_use]
    pub const fn with_global(mut self) -> Self {
        self.global = true;
        self
    }

    /// Enable the log channel of `guild`.
    #[must_use]
    pub fn with_guild_log(mut self, guild: GuildId) -> Self {
        self.guild_logs.insert(guild);
        self
    }

    /// Make every publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(ChannelSelector, String)> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Texts published to one target, in order.
    pub fn texts_for(&self, target: ChannelSelector) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, text)| text)
            .collect()
    }

    fn accepts(&self, target: ChannelSelector) -> bool {
        match target {
            ChannelSelector::GlobalStatus => self.global,
            ChannelSelector::GuildLog(guild) => self.guild_logs.contains(&guild),
        }
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn publish(&self, target: ChannelSelector, text: &str) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(CollaboratorError::new("publish", "simulated send failure"));
        }
        if !self.accepts(target) {
            return Ok(());
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((target, text.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(10);

    fn author(raw: u64) -> Author {
        Author::new(ParticipantId::new(raw), format!("user{raw}"))
    }

    #[tokio::test]
    async fn history_is_nearest_first_and_bounded() {
        let guilds = MemoryGuilds::new();
        let now = Utc::now();
        for raw in 1..=5_u64 {
            guilds.post(GUILD, CHANNEL, MessageId::new(raw), author(raw), now);
        }

        let stream = guilds
            .fetch_recent_messages(CHANNEL, MessageId::new(5), 3)
            .await
            .unwrap();
        let ids: Vec<u64> = stream
            .map(|m| m.unwrap().id.into_inner())
            .collect()
            .await;
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn departed_authors_are_flagged() {
        let guilds = MemoryGuilds::new();
        let now = Utc::now();
        guilds.post(GUILD, CHANNEL, MessageId::new(1), author(7), now);
        guilds.leave(GUILD, ParticipantId::new(7));

        let mut stream = guilds
            .fetch_recent_messages(CHANNEL, MessageId::new(2), 5)
            .await
            .unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert!(!first.is_current_member);
    }

    #[tokio::test]
    async fn marker_failures_are_consumed() {
        let guilds = MemoryGuilds::new();
        let p = ParticipantId::new(3);
        guilds.fail_next_markers(1);
        assert!(guilds.mark_infected(p, GUILD).await.is_err());
        assert!(guilds.mark_infected(p, GUILD).await.is_ok());
        assert!(guilds.is_marked(GUILD, p));
        assert_eq!(guilds.mark_calls(), 2);
    }

    #[tokio::test]
    async fn sink_drops_unconfigured_targets() {
        let sink = RecordingSink::new().with_guild_log(GUILD);
        sink.publish(ChannelSelector::GlobalStatus, "a").await.unwrap();
        sink.publish(ChannelSelector::GuildLog(GUILD), "b").await.unwrap();
        assert_eq!(
            sink.published(),
            vec![(ChannelSelector::GuildLog(GUILD), String::from("b"))]
        );
    }
}
