//! The contagion evaluation loop.
//!
//! Each inbound message from an infected participant triggers one
//! evaluation. The engine walks the channel history backwards from the
//! trigger, nearest message first, and rolls once for every eligible
//! author it meets:
//!
//! 1. The walk covers at most `nearby_messages` messages and stops at the
//!    first one that is too old or whose author has left the guild.
//! 2. Each author is considered at most once per evaluation. The trigger's
//!    own author, the bot, incubating participants, and participants who
//!    are already infected are never candidates.
//! 3. A successful roll claims the target's incubation, commits stats for
//!    both sides, schedules the delayed marker, and publishes the status
//!    line plus any level-up lines.
//!
//! Candidates are processed strictly in walk order. A failure on one
//! candidate is recorded on its outcome and never stops the walk.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt as _;
use patient_zero_db::UserStore;
use patient_zero_types::{Author, ParticipantId, TriggerEvent};
use tracing::{debug, error, info, warn};

use crate::collaborators::{HistorySource, NotificationSink, RoleOracle};
use crate::config::ContagionConfig;
use crate::dice::Dice;
use crate::error::{CollaboratorError, ContagionError};
use crate::incubation::IncubationTracker;
use crate::notify::{level_up_line, publish_everywhere, status_line};
use crate::scheduler::IncubationScheduler;
use crate::spread::{infection_probability, infection_threshold, roll_infects};
use crate::stats::{LevelUp, Role, record_infection};

/// The commit step at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    /// Updating the infector's record.
    InfectorStats,
    /// Updating the infectee's record.
    InfecteeStats,
    /// Publishing a status or level-up line.
    Notify,
}

/// A failure recorded while committing an infection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    /// Where the commit failed.
    pub stage: CommitStage,
    /// Description of the failure.
    pub message: String,
}

impl CommitFailure {
    fn new(stage: CommitStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The roll succeeded and the infection was committed.
    Infected {
        /// Level-ups produced by the stat commits, infector first.
        level_ups: Vec<LevelUp>,
        /// Notification failures. The infection itself stands.
        failures: Vec<CommitFailure>,
    },
    /// The roll failed.
    Resisted,
    /// The roll succeeded but another evaluation claimed the target first.
    AlreadyIncubating,
    /// The roll succeeded but a stat commit failed; the incubation claim
    /// was released and no marker was scheduled.
    Aborted(CommitFailure),
    /// The stats were committed, but the target was cured before the
    /// marker was scheduled. No marker is applied and nothing is announced.
    Cancelled,
    /// The infected check for the candidate failed, so no roll was made.
    Unchecked(CollaboratorError),
}

/// The result of considering one history author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfectionOutcome {
    /// The candidate.
    pub target: Author,
    /// Position in the walk, 1 being the message right before the trigger.
    pub distance: u32,
    /// Highest roll that would have infected.
    pub threshold: u32,
    /// The roll, if one was made.
    pub roll: Option<u32>,
    /// What happened.
    pub verdict: Verdict,
}

impl InfectionOutcome {
    /// Whether this candidate was infected.
    pub const fn is_infected(&self) -> bool {
        matches!(self.verdict, Verdict::Infected { .. })
    }
}

/// Evaluates trigger messages and commits the resulting infections.
pub struct ContagionEngine {
    roles: Arc<dyn RoleOracle>,
    history: Arc<dyn HistorySource>,
    notifier: Arc<dyn NotificationSink>,
    store: Arc<UserStore>,
    scheduler: Arc<IncubationScheduler>,
    config: ContagionConfig,
    bot_id: Option<ParticipantId>,
}

impl ContagionEngine {
    /// Assemble an engine from its collaborators.
    ///
    /// The incubation tracker is the one owned by `scheduler`, so claims
    /// taken here are released by the scheduled tasks.
    pub const fn new(
        roles: Arc<dyn RoleOracle>,
        history: Arc<dyn HistorySource>,
        notifier: Arc<dyn NotificationSink>,
        store: Arc<UserStore>,
        scheduler: Arc<IncubationScheduler>,
        config: ContagionConfig,
    ) -> Self {
        Self {
            roles,
            history,
            notifier,
            store,
            scheduler,
            config,
            bot_id: None,
        }
    }

    /// Exclude the bot's own messages from every evaluation.
    #[must_use]
    pub const fn with_bot_id(mut self, bot_id: Option<ParticipantId>) -> Self {
        self.bot_id = bot_id;
        self
    }

    /// The contagion tuning in use.
    pub const fn config(&self) -> &ContagionConfig {
        &self.config
    }

    /// The shared incubation tracker.
    pub fn tracker(&self) -> &Arc<IncubationTracker> {
        self.scheduler.tracker()
    }

    /// Evaluate one trigger message.
    ///
    /// Returns an outcome per candidate that reached the infected check,
    /// in walk order. The list is empty when the trigger's author is not
    /// an infected current member.
    ///
    /// # Errors
    ///
    /// Returns [`ContagionError::Collaborator`] if the precondition checks
    /// on the trigger's author or the history fetch fail. Nothing has been
    /// changed at that point.
    pub async fn evaluate<D>(
        &self,
        trigger: &TriggerEvent,
        dice: &mut D,
    ) -> Result<Vec<InfectionOutcome>, ContagionError>
    where
        D: Dice + ?Sized,
    {
        let author = trigger.author.id;
        let guild = trigger.guild_id;

        if Some(author) == self.bot_id {
            return Ok(Vec::new());
        }
        if !self.roles.is_infected(author, guild).await? {
            return Ok(Vec::new());
        }
        if !self.roles.is_current_member(author, guild).await? {
            debug!(participant = %author, guild = %guild, "infected author is no longer a member");
            return Ok(Vec::new());
        }

        let window = self.config.nearby_messages;
        let cutoff = self.cutoff(trigger.timestamp);
        let limit = usize::try_from(window).unwrap_or(usize::MAX);
        let mut history = self
            .history
            .fetch_recent_messages(trigger.channel_id, trigger.message_id, limit)
            .await?;

        let mut seen: HashSet<ParticipantId> = HashSet::from([author]);
        seen.extend(self.bot_id);

        let mut outcomes = Vec::new();
        let mut distance: u32 = 0;
        while distance < window {
            let Some(item) = history.next().await else {
                break;
            };
            distance = distance.saturating_add(1);

            let message = match item {
                Ok(message) => message,
                Err(e) => {
                    warn!(channel = %trigger.channel_id, error = %e, "history stream failed, ending walk");
                    break;
                }
            };
            if message.timestamp <= cutoff {
                debug!(distance, "reached the time cutoff");
                break;
            }
            if !message.is_current_member {
                debug!(distance, participant = %message.author.id, "reached a departed author");
                break;
            }

            let candidate = message.author;
            if seen.contains(&candidate.id) || self.tracker().is_incubating(candidate.id) {
                continue;
            }
            seen.insert(candidate.id);

            let threshold = infection_threshold(infection_probability(
                distance,
                window,
                self.config.infection_chance,
            ));

            match self.roles.is_infected(candidate.id, guild).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(participant = %candidate.id, error = %e, "infected check failed, skipping candidate");
                    outcomes.push(InfectionOutcome {
                        target: candidate,
                        distance,
                        threshold,
                        roll: None,
                        verdict: Verdict::Unchecked(e),
                    });
                    continue;
                }
            }

            let roll = dice.roll_percent();
            let verdict = if roll_infects(roll, threshold) {
                self.commit(trigger, &candidate).await
            } else {
                Verdict::Resisted
            };
            debug!(
                participant = %candidate.id,
                distance,
                threshold,
                roll,
                verdict = ?verdict,
                "candidate rolled"
            );
            outcomes.push(InfectionOutcome {
                target: candidate,
                distance,
                threshold,
                roll: Some(roll),
                verdict,
            });
        }

        let infected = outcomes.iter().filter(|o| o.is_infected()).count();
        info!(
            message = %trigger.message_id,
            author = %author,
            guild = %guild,
            walked = distance,
            candidates = outcomes.len(),
            infected,
            "evaluation finished"
        );
        Ok(outcomes)
    }

    /// Messages at or before this instant are too old to spread anything.
    fn cutoff(&self, trigger_time: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.config.max_time_difference_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|window| trigger_time.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Commit one successful roll.
    async fn commit(&self, trigger: &TriggerEvent, infectee: &Author) -> Verdict {
        let tracker = self.tracker();
        let Some(claim) = tracker.try_claim(infectee.id, trigger.guild_id) else {
            debug!(participant = %infectee.id, "lost the incubation claim");
            return Verdict::AlreadyIncubating;
        };

        let points = self.config.infection_points;
        let mut level_ups = Vec::new();
        let sides = [
            (&trigger.author, Role::Infector, CommitStage::InfectorStats),
            (infectee, Role::Infectee, CommitStage::InfecteeStats),
        ];
        for (participant, role, stage) in sides {
            match record_infection(&self.store, participant, role, points).await {
                Ok(level_up) => level_ups.extend(level_up),
                Err(e) => {
                    tracker.release(infectee.id, claim);
                    error!(
                        infector = %trigger.author.id,
                        infectee = %infectee.id,
                        stage = ?stage,
                        error = %e,
                        "stat commit failed, infection aborted"
                    );
                    return Verdict::Aborted(CommitFailure::new(stage, e.to_string()));
                }
            }
        }

        let scheduled = self.scheduler.schedule(
            infectee.id,
            trigger.guild_id,
            self.config.incubation_time(),
            claim,
        );
        if !scheduled {
            info!(
                infector = %trigger.author.id,
                infectee = %infectee.id,
                guild = %trigger.guild_id,
                "target cured mid-commit, no marker scheduled"
            );
            return Verdict::Cancelled;
        }
        info!(
            infector = %trigger.author.id,
            infectee = %infectee.id,
            guild = %trigger.guild_id,
            "infection committed"
        );

        let mut failures = Vec::new();
        let status = status_line(&trigger.author, infectee, &trigger.guild_name);
        let lines = core::iter::once(status)
            .chain(level_ups.iter().map(|l| level_up_line(&l.name, l.level)));
        for line in lines {
            for message in publish_everywhere(self.notifier.as_ref(), trigger.guild_id, &line).await
            {
                failures.push(CommitFailure::new(CommitStage::Notify, message));
            }
        }

        Verdict::Infected {
            level_ups,
            failures,
        }
    }
}

impl core::fmt::Debug for ContagionEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContagionEngine")
            .field("config", &self.config)
            .field("bot_id", &self.bot_id)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use patient_zero_db::{MemoryBackend, RecordBackend, StoreError};
    use patient_zero_types::{ChannelId, ChannelSelector, GuildId, MessageId};
    use tokio::sync::Barrier;

    use super::*;
    use crate::admin::{AdminAction, AdminOps};
    use crate::dice::ScriptedDice;
    use crate::memory::{MemoryGuilds, RecordingSink};

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(10);
    const BOT: ParticipantId = ParticipantId::new(999);

    struct Harness {
        guilds: Arc<MemoryGuilds>,
        sink: Arc<RecordingSink>,
        backend: Arc<MemoryBackend>,
        store: Arc<UserStore>,
        scheduler: Arc<IncubationScheduler>,
        engine: ContagionEngine,
        now: DateTime<Utc>,
        next_message: u64,
    }

    impl Harness {
        fn new(config: ContagionConfig) -> Self {
            let guilds = Arc::new(MemoryGuilds::new());
            let sink = Arc::new(RecordingSink::new().with_global().with_guild_log(GUILD));
            let backend = Arc::new(MemoryBackend::new());
            let store = Arc::new(UserStore::new(Arc::clone(&backend) as _));
            let tracker = Arc::new(IncubationTracker::new());
            let scheduler = Arc::new(IncubationScheduler::new(
                Arc::clone(&guilds) as _,
                tracker,
            ));
            let engine = ContagionEngine::new(
                Arc::clone(&guilds) as _,
                Arc::clone(&guilds) as _,
                Arc::clone(&sink) as _,
                Arc::clone(&store),
                Arc::clone(&scheduler),
                config,
            )
            .with_bot_id(Some(BOT));
            Self {
                guilds,
                sink,
                backend,
                store,
                scheduler,
                engine,
                now: Utc::now(),
                next_message: 1,
            }
        }

        fn certain() -> Self {
            Self::new(ContagionConfig {
                infection_chance: 100,
                ..ContagionConfig::default()
            })
        }

        /// Post a message `age_secs` seconds before `now`.
        fn post(&mut self, raw: u64, age_secs: i64) -> MessageId {
            let id = MessageId::new(self.next_message);
            self.next_message += 1;
            self.guilds.post(
                GUILD,
                CHANNEL,
                id,
                author(raw),
                self.now - TimeDelta::seconds(age_secs),
            );
            id
        }

        /// Post the trigger from `raw`, who is infected, right at `now`.
        fn trigger(&mut self, raw: u64) -> TriggerEvent {
            self.guilds.set_infected(GUILD, ParticipantId::new(raw), true);
            let id = self.post(raw, 0);
            TriggerEvent {
                message_id: id,
                guild_id: GUILD,
                guild_name: String::from("Lobby"),
                channel_id: CHANNEL,
                author: author(raw),
                timestamp: self.now,
            }
        }
    }

    fn author(raw: u64) -> Author {
        Author::new(ParticipantId::new(raw), format!("user{raw}"))
    }

    fn targets(outcomes: &[InfectionOutcome]) -> Vec<u64> {
        outcomes.iter().map(|o| o.target.id.into_inner()).collect()
    }

    #[tokio::test]
    async fn nearest_neighbour_roll_four_infects() {
        let mut h = Harness::new(ContagionConfig::default());
        h.post(2, 5);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([4]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].distance, 1);
        assert_eq!(outcomes[0].threshold, 4);
        assert!(outcomes[0].is_infected());
        assert!(h.engine.tracker().is_incubating(ParticipantId::new(2)));
        assert_eq!(h.scheduler.pending(), 1);

        let infector = h.store.get(ParticipantId::new(1)).await.unwrap().unwrap();
        let infectee = h.store.get(ParticipantId::new(2)).await.unwrap().unwrap();
        assert_eq!(infector.infected_count, 1);
        assert_eq!(infectee.infected_by_count, 1);

        let global = h.sink.texts_for(ChannelSelector::GlobalStatus);
        assert_eq!(global[0], "user1 infected user2 in 'Lobby'.");
        assert_eq!(h.sink.texts_for(ChannelSelector::GuildLog(GUILD)), global);
    }

    #[tokio::test]
    async fn nearest_neighbour_roll_five_resists() {
        let mut h = Harness::new(ContagionConfig::default());
        h.post(2, 5);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([5]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        assert_eq!(outcomes[0].verdict, Verdict::Resisted);
        assert!(h.engine.tracker().is_empty());
        assert_eq!(h.scheduler.pending(), 0);
        assert!(h.backend.is_empty());
        assert!(h.sink.published().is_empty());
    }

    #[tokio::test]
    async fn uninfected_author_is_a_no_op() {
        let mut h = Harness::certain();
        h.post(2, 5);
        h.post(1, 0);
        let trigger = TriggerEvent {
            message_id: MessageId::new(2),
            guild_id: GUILD,
            guild_name: String::from("Lobby"),
            channel_id: CHANNEL,
            author: author(1),
            timestamp: h.now,
        };

        let mut dice = ScriptedDice::new([1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert!(outcomes.is_empty());
        assert_eq!(dice.consumed(), 0);
    }

    #[tokio::test]
    async fn departed_infected_author_is_a_no_op() {
        let mut h = Harness::certain();
        h.post(2, 5);
        let trigger = h.trigger(1);
        h.guilds.leave(GUILD, ParticipantId::new(1));
        h.guilds.set_infected(GUILD, ParticipantId::new(1), true);

        let mut dice = ScriptedDice::new([1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn message_exactly_at_cutoff_is_excluded() {
        let mut h = Harness::certain();
        h.post(3, 60);
        h.post(2, 59);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([1, 1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert_eq!(targets(&outcomes), vec![2]);
        assert_eq!(dice.consumed(), 1);
    }

    #[tokio::test]
    async fn departed_author_ends_the_walk() {
        let mut h = Harness::certain();
        h.post(4, 10);
        h.post(3, 8);
        h.post(2, 5);
        h.guilds.leave(GUILD, ParticipantId::new(3));
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([1, 1, 1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert_eq!(targets(&outcomes), vec![2]);
    }

    #[tokio::test]
    async fn repeated_authors_roll_once_and_distance_counts_every_message() {
        let mut h = Harness::certain();
        h.post(3, 9);
        h.post(2, 8);
        h.post(1, 7);
        h.post(2, 6);
        h.post(BOT.into_inner(), 5);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([100, 100]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        assert_eq!(targets(&outcomes), vec![2, 3]);
        assert_eq!(outcomes[0].distance, 2);
        assert_eq!(outcomes[1].distance, 5);
        // p(5) with N = 5 is zero.
        assert_eq!(outcomes[1].threshold, 0);
        assert_eq!(dice.consumed(), 2);
    }

    #[tokio::test]
    async fn walk_is_bounded_by_the_window() {
        let mut h = Harness::new(ContagionConfig {
            infection_chance: 100,
            nearby_messages: 2,
            ..ContagionConfig::default()
        });
        h.post(4, 9);
        h.post(3, 8);
        h.post(2, 7);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert_eq!(targets(&outcomes), vec![2, 3]);
    }

    #[tokio::test]
    async fn infected_and_incubating_authors_are_skipped() {
        let mut h = Harness::certain();
        h.post(4, 9);
        h.post(3, 8);
        h.post(2, 7);
        h.guilds.set_infected(GUILD, ParticipantId::new(2), true);
        assert!(h.engine.tracker().try_begin_incubation(ParticipantId::new(3)));
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert_eq!(targets(&outcomes), vec![4]);
        assert_eq!(outcomes[0].distance, 3);
        assert!(outcomes[0].is_infected());
    }

    /// Holds every infected check on `gate` until two evaluations have
    /// reached it, so both pass the walk before either claims.
    struct GatedRoles {
        inner: Arc<MemoryGuilds>,
        gate: ParticipantId,
        barrier: Barrier,
    }

    #[async_trait]
    impl RoleOracle for GatedRoles {
        async fn is_infected(
            &self,
            participant: ParticipantId,
            guild: GuildId,
        ) -> Result<bool, CollaboratorError> {
            if participant == self.gate {
                self.barrier.wait().await;
            }
            self.inner.is_infected(participant, guild).await
        }

        async fn mark_infected(
            &self,
            participant: ParticipantId,
            guild: GuildId,
        ) -> Result<(), CollaboratorError> {
            self.inner.mark_infected(participant, guild).await
        }

        async fn clear_infected(
            &self,
            participant: ParticipantId,
            guild: GuildId,
        ) -> Result<(), CollaboratorError> {
            self.inner.clear_infected(participant, guild).await
        }

        async fn is_current_member(
            &self,
            participant: ParticipantId,
            guild: GuildId,
        ) -> Result<bool, CollaboratorError> {
            self.inner.is_current_member(participant, guild).await
        }

        async fn infected_members(
            &self,
            guild: GuildId,
        ) -> Result<Vec<ParticipantId>, CollaboratorError> {
            self.inner.infected_members(guild).await
        }
    }

    /// A backend whose reads take `delay`.
    struct SlowBackend {
        inner: MemoryBackend,
        delay: Duration,
    }

    #[async_trait]
    impl RecordBackend for SlowBackend {
        async fn fetch(&self, key: &str) -> Result<Option<String>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(key).await
        }

        async fn store(&self, key: &str, value: &str) -> Result<(), StoreError> {
            self.inner.store(key, value).await
        }
    }

    #[tokio::test]
    async fn concurrent_evaluations_infect_a_target_once() {
        let mut h = Harness::certain();
        h.post(3, 5);
        let first = h.trigger(1);
        let second = h.trigger(2);

        let roles = Arc::new(GatedRoles {
            inner: Arc::clone(&h.guilds),
            gate: ParticipantId::new(3),
            barrier: Barrier::new(2),
        });
        let engine = ContagionEngine::new(
            roles,
            Arc::clone(&h.guilds) as _,
            Arc::clone(&h.sink) as _,
            Arc::clone(&h.store),
            Arc::clone(&h.scheduler),
            ContagionConfig {
                infection_chance: 100,
                ..ContagionConfig::default()
            },
        );

        let mut dice_a = ScriptedDice::new([1, 1]);
        let mut dice_b = ScriptedDice::new([1, 1]);
        let (a, b) = tokio::join!(
            engine.evaluate(&first, &mut dice_a),
            engine.evaluate(&second, &mut dice_b),
        );
        let verdicts: Vec<Verdict> = a
            .unwrap()
            .into_iter()
            .chain(b.unwrap())
            .filter(|o| o.target.id == ParticipantId::new(3))
            .map(|o| o.verdict)
            .collect();
        assert_eq!(verdicts.len(), 2);
        assert_eq!(
            verdicts.iter().filter(|v| matches!(v, Verdict::Infected { .. })).count(),
            1
        );
        assert_eq!(
            verdicts.iter().filter(|v| **v == Verdict::AlreadyIncubating).count(),
            1
        );

        let record = h.store.get(ParticipantId::new(3)).await.unwrap().unwrap();
        assert_eq!(record.infected_by_count, 1);
        assert_eq!(h.scheduler.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cure_during_commit_is_not_overridden() {
        let mut h = Harness::certain();
        h.post(2, 5);
        let trigger = h.trigger(1);

        let store = Arc::new(UserStore::new(Arc::new(SlowBackend {
            inner: MemoryBackend::new(),
            delay: Duration::from_millis(100),
        })));
        let engine = ContagionEngine::new(
            Arc::clone(&h.guilds) as _,
            Arc::clone(&h.guilds) as _,
            Arc::clone(&h.sink) as _,
            store,
            Arc::clone(&h.scheduler),
            ContagionConfig {
                infection_chance: 100,
                ..ContagionConfig::default()
            },
        );
        let admin = AdminOps::new(Arc::clone(&h.guilds) as _, Arc::clone(&h.scheduler));
        let target = ParticipantId::new(2);

        let mut dice = ScriptedDice::new([1]);
        let (outcomes, reports) = tokio::join!(engine.evaluate(&trigger, &mut dice), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert!(h.scheduler.tracker().is_incubating(target));
            admin.cure(GUILD, &[target]).await
        });

        assert_eq!(
            reports[0].action,
            AdminAction::Cured {
                cancelled_incubation: false
            }
        );
        let outcomes = outcomes.unwrap();
        assert_eq!(outcomes[0].verdict, Verdict::Cancelled);
        assert_eq!(h.scheduler.pending(), 0);
        assert!(!h.scheduler.tracker().is_incubating(target));
        assert!(h.sink.published().is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!h.guilds.is_marked(GUILD, target));
        assert_eq!(h.guilds.mark_calls(), 0);
    }

    #[tokio::test]
    async fn store_failure_releases_claim_and_keeps_walking() {
        let mut h = Harness::certain();
        h.post(3, 8);
        h.post(2, 7);
        let trigger = h.trigger(1);
        h.backend.set_unavailable(true);

        let mut dice = ScriptedDice::new([1, 1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        assert_eq!(targets(&outcomes), vec![2, 3]);
        for outcome in &outcomes {
            assert!(matches!(
                &outcome.verdict,
                Verdict::Aborted(CommitFailure {
                    stage: CommitStage::InfectorStats,
                    ..
                })
            ));
        }
        assert!(h.engine.tracker().is_empty());
        assert_eq!(h.scheduler.pending(), 0);
        assert!(h.sink.published().is_empty());
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_infection() {
        let mut h = Harness::certain();
        h.post(2, 5);
        let trigger = h.trigger(1);
        h.sink.set_failing(true);

        let mut dice = ScriptedDice::new([1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        let Verdict::Infected { failures, .. } = &outcomes[0].verdict else {
            panic!("expected an infection, got {:?}", outcomes[0].verdict);
        };
        assert!(!failures.is_empty());
        assert!(failures.iter().all(|f| f.stage == CommitStage::Notify));
        assert!(h.engine.tracker().is_incubating(ParticipantId::new(2)));
    }

    #[tokio::test]
    async fn level_up_lines_follow_the_status_line() {
        let mut h = Harness::certain();
        h.post(2, 5);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([1]);
        let outcomes = h.engine.evaluate(&trigger, &mut dice).await.unwrap();

        // The infectee's first passive points take them to level 2.
        let Verdict::Infected { level_ups, .. } = &outcomes[0].verdict else {
            panic!("expected an infection");
        };
        assert_eq!(level_ups.len(), 1);
        assert_eq!(level_ups[0].participant, ParticipantId::new(2));

        let global = h.sink.texts_for(ChannelSelector::GlobalStatus);
        assert_eq!(
            global,
            vec![
                String::from("user1 infected user2 in 'Lobby'."),
                String::from("user2 is now level 2\u{fe0f}\u{20e3}!"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn marker_lands_after_incubation() {
        let mut h = Harness::certain();
        h.post(2, 5);
        let trigger = h.trigger(1);

        let mut dice = ScriptedDice::new([1]);
        h.engine.evaluate(&trigger, &mut dice).await.unwrap();
        assert!(!h.guilds.is_marked(GUILD, ParticipantId::new(2)));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(h.guilds.is_marked(GUILD, ParticipantId::new(2)));
        assert!(h.engine.tracker().is_empty());
    }
}
