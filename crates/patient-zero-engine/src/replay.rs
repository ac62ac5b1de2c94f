//! NDJSON replay of chat events.
//!
//! Each input line is one JSON object tagged by `type`:
//!
//! ```text
//! {"type":"join","guild":1,"participant":7}
//! {"type":"message","id":12,"guild":1,"channel":10,"author":{"id":7,"name":"alice"}}
//! {"type":"infect","guild":1,"patients":[7]}
//! {"type":"cure","guild":1,"patients":[7]}
//! {"type":"reset","guild":1}
//! {"type":"leave","guild":1,"participant":7}
//! ```
//!
//! Messages are appended to the in-memory channel history and evaluated on
//! their own task, so evaluations overlap the way they would on a live
//! connection. Admin commands run inline. Blank lines and lines starting
//! with `#` are ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use patient_zero_core::memory::MemoryGuilds;
use patient_zero_core::{
    AdminAction, AdminOps, ContagionEngine, Dice, IncubationScheduler, InfectionOutcome,
    PatientReport, Verdict,
};
use patient_zero_types::{Author, ChannelId, GuildId, MessageId, ParticipantId, TriggerEvent};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// One replayed event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayEvent {
    /// A chat message.
    Message {
        /// Message id; must increase along the input.
        id: MessageId,
        /// Guild the channel belongs to.
        guild: GuildId,
        /// Guild display name for status lines.
        #[serde(default)]
        guild_name: Option<String>,
        /// Channel the message was posted in.
        channel: ChannelId,
        /// Who posted it.
        author: Author,
        /// When it was posted. Defaults to the time it is read.
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// A participant joined a guild.
    Join {
        /// The guild.
        guild: GuildId,
        /// The participant.
        participant: ParticipantId,
    },
    /// A participant left a guild.
    Leave {
        /// The guild.
        guild: GuildId,
        /// The participant.
        participant: ParticipantId,
    },
    /// Administrative infect.
    Infect {
        /// The guild.
        guild: GuildId,
        /// Who to infect.
        patients: Vec<ParticipantId>,
    },
    /// Administrative cure.
    Cure {
        /// The guild.
        guild: GuildId,
        /// Who to cure.
        patients: Vec<ParticipantId>,
    },
    /// Cure everyone in a guild.
    Reset {
        /// The guild.
        guild: GuildId,
    },
}

/// Parse one input line. Blank and `#` comment lines yield `None`.
///
/// # Errors
///
/// Returns [`EngineError::Parse`] if the line is not a valid event.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<ReplayEvent>, EngineError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| EngineError::Parse {
            line: line_no,
            source,
        })
}

/// Builds the dice for one evaluation.
pub type DiceFactory = Arc<dyn Fn(MessageId) -> Box<dyn Dice> + Send + Sync>;

/// Counters reported at the end of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Events applied.
    pub events: u64,
    /// Message events.
    pub messages: u64,
    /// Candidates rolled for.
    pub rolls: u64,
    /// Candidates infected.
    pub infections: u64,
    /// Candidates that resisted.
    pub resisted: u64,
    /// Successful rolls that lost the incubation claim.
    pub already_incubating: u64,
    /// Infections aborted by a store failure.
    pub aborted: u64,
    /// Infections whose target was cured before the marker was scheduled.
    pub cancelled: u64,
    /// Evaluations that failed before rolling.
    pub failed_evaluations: u64,
    /// Patients handled by admin commands.
    pub admin_patients: u64,
    /// Admin actions that failed.
    pub admin_failures: u64,
    /// Participants still incubating at the end.
    pub still_incubating: usize,
}

impl ReplaySummary {
    fn tally(&mut self, outcomes: &[InfectionOutcome]) {
        for outcome in outcomes {
            if outcome.roll.is_some() {
                self.rolls = self.rolls.saturating_add(1);
            }
            let counter = match outcome.verdict {
                Verdict::Infected { .. } => &mut self.infections,
                Verdict::Resisted => &mut self.resisted,
                Verdict::AlreadyIncubating => &mut self.already_incubating,
                Verdict::Aborted(_) => &mut self.aborted,
                Verdict::Cancelled => &mut self.cancelled,
                Verdict::Unchecked(_) => continue,
            };
            *counter = counter.saturating_add(1);
        }
    }

    fn tally_admin(&mut self, reports: &[PatientReport]) {
        for report in reports {
            self.admin_patients = self.admin_patients.saturating_add(1);
            if matches!(report.action, AdminAction::Failed(_)) {
                self.admin_failures = self.admin_failures.saturating_add(1);
            }
        }
    }
}

/// Drives events through the engine.
pub struct Replay {
    guilds: Arc<MemoryGuilds>,
    engine: Arc<ContagionEngine>,
    admin: AdminOps,
    scheduler: Arc<IncubationScheduler>,
    dice: DiceFactory,
    evaluations: JoinSet<Option<Vec<InfectionOutcome>>>,
    summary: ReplaySummary,
}

impl Replay {
    /// Create a replay over the given platform and engine.
    pub fn new(
        guilds: Arc<MemoryGuilds>,
        engine: Arc<ContagionEngine>,
        admin: AdminOps,
        scheduler: Arc<IncubationScheduler>,
        dice: DiceFactory,
    ) -> Self {
        Self {
            guilds,
            engine,
            admin,
            scheduler,
            dice,
            evaluations: JoinSet::new(),
            summary: ReplaySummary::default(),
        }
    }

    /// Apply one event.
    pub async fn apply(&mut self, event: ReplayEvent) {
        self.summary.events = self.summary.events.saturating_add(1);
        match event {
            ReplayEvent::Message {
                id,
                guild,
                guild_name,
                channel,
                author,
                timestamp,
            } => {
                self.summary.messages = self.summary.messages.saturating_add(1);
                let timestamp = timestamp.unwrap_or_else(Utc::now);
                self.guilds
                    .post(guild, channel, id, author.clone(), timestamp);
                let trigger = TriggerEvent {
                    message_id: id,
                    guild_id: guild,
                    guild_name: guild_name.unwrap_or_else(|| guild.to_string()),
                    channel_id: channel,
                    author,
                    timestamp,
                };
                self.spawn_evaluation(trigger);
            }
            ReplayEvent::Join { guild, participant } => {
                debug!(guild = %guild, participant = %participant, "join");
                self.guilds.join(guild, participant);
            }
            ReplayEvent::Leave { guild, participant } => {
                debug!(guild = %guild, participant = %participant, "leave");
                self.guilds.leave(guild, participant);
            }
            ReplayEvent::Infect { guild, patients } => {
                let reports = self.admin.infect(guild, &patients).await;
                self.summary.tally_admin(&reports);
            }
            ReplayEvent::Cure { guild, patients } => {
                let reports = self.admin.cure(guild, &patients).await;
                self.summary.tally_admin(&reports);
            }
            ReplayEvent::Reset { guild } => match self.admin.reset(guild).await {
                Ok(reports) => self.summary.tally_admin(&reports),
                Err(e) => {
                    warn!(guild = %guild, error = %e, "reset failed");
                    self.summary.admin_failures = self.summary.admin_failures.saturating_add(1);
                }
            },
        }
    }

    fn spawn_evaluation(&mut self, trigger: TriggerEvent) {
        let engine = Arc::clone(&self.engine);
        let mut dice = (self.dice)(trigger.message_id);
        self.evaluations.spawn(async move {
            match engine.evaluate(&trigger, dice.as_mut()).await {
                Ok(outcomes) => Some(outcomes),
                Err(e) => {
                    warn!(message = %trigger.message_id, error = %e, "evaluation failed");
                    None
                }
            }
        });
    }

    /// Wait for every evaluation, then either drain or abort the pending
    /// incubations, and return the summary.
    pub async fn finish(mut self, drain_incubation: bool) -> ReplaySummary {
        while let Some(joined) = self.evaluations.join_next().await {
            match joined {
                Ok(Some(outcomes)) => self.summary.tally(&outcomes),
                Ok(None) => {
                    self.summary.failed_evaluations =
                        self.summary.failed_evaluations.saturating_add(1);
                }
                Err(e) => {
                    warn!(error = %e, "evaluation task failed");
                    self.summary.failed_evaluations =
                        self.summary.failed_evaluations.saturating_add(1);
                }
            }
        }

        if drain_incubation {
            info!(pending = self.scheduler.pending(), "draining incubations");
            self.scheduler.wait_idle().await;
        }
        self.summary.still_incubating = self.engine.tracker().len();
        self.scheduler.shutdown();
        self.summary
    }
}

impl core::fmt::Debug for Replay {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Replay")
            .field("engine", &self.engine)
            .field("in_flight", &self.evaluations.len())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use patient_zero_core::memory::RecordingSink;
    use patient_zero_core::{ContagionConfig, IncubationTracker, ScriptedDice};
    use patient_zero_db::{MemoryBackend, UserStore};

    use super::*;

    const GUILD: GuildId = GuildId::new(1);

    struct Fixture {
        guilds: Arc<MemoryGuilds>,
        store: Arc<UserStore>,
        replay: Replay,
    }

    fn fixture() -> Fixture {
        let guilds = Arc::new(MemoryGuilds::new());
        let store = Arc::new(UserStore::new(Arc::new(MemoryBackend::new())));
        let scheduler = Arc::new(IncubationScheduler::new(
            Arc::clone(&guilds) as _,
            Arc::new(IncubationTracker::new()),
        ));
        let engine = Arc::new(ContagionEngine::new(
            Arc::clone(&guilds) as _,
            Arc::clone(&guilds) as _,
            Arc::new(RecordingSink::new()),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            ContagionConfig {
                infection_chance: 100,
                incubation_time_seconds: 0,
                ..ContagionConfig::default()
            },
        ));
        let admin = AdminOps::new(Arc::clone(&guilds) as _, Arc::clone(&scheduler));
        let dice: DiceFactory =
            Arc::new(|_: MessageId| -> Box<dyn Dice> { Box::new(ScriptedDice::new([1])) });
        let replay = Replay::new(Arc::clone(&guilds), engine, admin, scheduler, dice);
        Fixture {
            guilds,
            store,
            replay,
        }
    }

    fn events(input: &str) -> Vec<ReplayEvent> {
        input
            .lines()
            .enumerate()
            .filter_map(|(i, line)| parse_line(i, line).unwrap())
            .collect()
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(parse_line(1, "").unwrap(), None);
        assert_eq!(parse_line(2, "   # note").unwrap(), None);
        assert_eq!(
            parse_line(3, r#"{"type":"reset","guild":4}"#).unwrap(),
            Some(ReplayEvent::Reset {
                guild: GuildId::new(4)
            })
        );
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_line(7, r#"{"type":"sneeze"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Parse { line: 7, .. }));
    }

    #[test]
    fn message_defaults_are_optional() {
        let parsed = parse_line(
            1,
            r#"{"type":"message","id":5,"guild":1,"channel":10,"author":{"id":7,"name":"alice"}}"#,
        )
        .unwrap();
        let Some(ReplayEvent::Message {
            guild_name,
            timestamp,
            author,
            ..
        }) = parsed
        else {
            unreachable!("expected a message event");
        };
        assert_eq!(guild_name, None);
        assert_eq!(timestamp, None);
        assert_eq!(author.nickname, None);
    }

    #[tokio::test(start_paused = true)]
    async fn infection_spreads_through_a_replayed_conversation() {
        let Fixture {
            guilds,
            store,
            mut replay,
        } = fixture();
        let input = r#"
{"type":"message","id":1,"guild":1,"channel":10,"author":{"id":2,"name":"bob"}}
{"type":"infect","guild":1,"patients":[1]}
{"type":"message","id":2,"guild":1,"guild_name":"Lobby","channel":10,"author":{"id":1,"name":"alice"}}
"#;
        for event in events(input) {
            replay.apply(event).await;
        }
        let summary = replay.finish(true).await;

        assert_eq!(summary.events, 3);
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.infections, 1);
        assert_eq!(summary.admin_patients, 1);
        assert_eq!(summary.still_incubating, 0);
        assert!(guilds.is_marked(GUILD, ParticipantId::new(2)));

        let bob = store.get(ParticipantId::new(2)).await.unwrap().unwrap();
        assert_eq!(bob.infected_by_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cures_the_guild() {
        let Fixture {
            guilds,
            mut replay,
            ..
        } = fixture();
        let input = r#"
{"type":"join","guild":1,"participant":1}
{"type":"join","guild":1,"participant":2}
{"type":"infect","guild":1,"patients":[1,2]}
{"type":"reset","guild":1}
"#;
        for event in events(input) {
            replay.apply(event).await;
        }
        let summary = replay.finish(false).await;

        assert_eq!(summary.admin_patients, 4);
        assert_eq!(summary.admin_failures, 0);
        assert!(!guilds.is_marked(GUILD, ParticipantId::new(1)));
        assert!(!guilds.is_marked(GUILD, ParticipantId::new(2)));
    }
}
