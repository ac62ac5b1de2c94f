//! Delayed application of the infected marker.
//!
//! A successful infection does not mark the target right away. The
//! scheduler owns one Tokio task per incubating participant; the task
//! sleeps out the incubation period, applies the marker through the
//! [`RoleOracle`], and then releases the participant from the
//! [`IncubationTracker`]. Tasks are keyed by participant so an
//! administrative cure can abort one before it fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use patient_zero_types::{GuildId, ParticipantId};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::collaborators::RoleOracle;
use crate::incubation::{IncubationClaim, IncubationTracker};

/// Back-off before the single marker retry.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct PendingTask {
    generation: u64,
    guild: GuildId,
    handle: AbortHandle,
}

#[derive(Debug, Default)]
struct Shared {
    tasks: Mutex<HashMap<ParticipantId, PendingTask>>,
    idle: Notify,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<ParticipantId, PendingTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry for `target` if it still belongs to `generation`.
    fn finish(&self, target: ParticipantId, generation: u64) {
        let mut tasks = self.tasks();
        if tasks
            .get(&target)
            .is_some_and(|task| task.generation == generation)
        {
            tasks.remove(&target);
        }
        if tasks.is_empty() {
            self.idle.notify_waiters();
        }
    }
}

/// Owner of the pending incubation tasks.
pub struct IncubationScheduler {
    roles: Arc<dyn RoleOracle>,
    tracker: Arc<IncubationTracker>,
    retry_backoff: Duration,
    shared: Arc<Shared>,
    next_generation: AtomicU64,
}

impl IncubationScheduler {
    /// Create a scheduler that marks through `roles` and releases claims
    /// on `tracker`.
    pub fn new(roles: Arc<dyn RoleOracle>, tracker: Arc<IncubationTracker>) -> Self {
        Self {
            roles,
            tracker,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            shared: Arc::new(Shared::default()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Override the back-off before the marker retry.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Apply the infected marker to `target` in `guild` after `delay`.
    ///
    /// `claim` must be the caller's incubation claim on `target`; the task
    /// releases it once the marker is applied, or once the marker is given
    /// up on after the retry. Returns `false` without scheduling anything if
    /// the claim was released in the meantime, e.g. by a cure. Must be
    /// called from within a Tokio runtime.
    pub fn schedule(
        &self,
        target: ParticipantId,
        guild: GuildId,
        delay: Duration,
        claim: IncubationClaim,
    ) -> bool {
        // The claim check and the insert happen under the map lock, and
        // `cancel` releases claims under the same lock, so a cure either
        // sees this task or makes the check fail.
        let mut tasks = self.shared.tasks();
        if !self.tracker.holds(target, claim) {
            drop(tasks);
            info!(participant = %target, guild = %guild, "incubation claim released before scheduling");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let roles = Arc::clone(&self.roles);
        let tracker = Arc::clone(&self.tracker);
        let shared = Arc::clone(&self.shared);
        let backoff = self.retry_backoff;

        // Spawned under the map lock so a task that finishes immediately
        // cannot look for its entry before it is inserted.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let applied = apply_marker(roles.as_ref(), target, guild, backoff).await;
            shared.finish(target, generation);
            tracker.release(target, claim);
            debug!(participant = %target, applied, "incubation finished");
        });
        let previous = tasks.insert(
            target,
            PendingTask {
                generation,
                guild,
                handle: handle.abort_handle(),
            },
        );
        drop(tasks);

        if let Some(previous) = previous {
            warn!(
                participant = %target,
                guild = %previous.guild,
                "replacing an already pending incubation"
            );
            previous.handle.abort();
        }
        debug!(participant = %target, guild = %guild, delay_ms = delay.as_millis(), "incubation scheduled");
        true
    }

    /// Abort the pending task for `target` and end its incubation.
    ///
    /// Returns whether a task was pending. The incubation claim is released
    /// either way, so a commit that has claimed `target` but not scheduled
    /// yet will find its claim gone.
    pub fn cancel(&self, target: ParticipantId) -> bool {
        let removed = {
            let mut tasks = self.shared.tasks();
            let removed = tasks.remove(&target);
            self.tracker.end_incubation(target);
            if tasks.is_empty() {
                self.shared.idle.notify_waiters();
            }
            removed
        };
        match removed {
            Some(task) => {
                task.handle.abort();
                info!(participant = %target, guild = %task.guild, "pending incubation cancelled");
                true
            }
            None => false,
        }
    }

    /// The tracker whose claims this scheduler releases.
    pub const fn tracker(&self) -> &Arc<IncubationTracker> {
        &self.tracker
    }

    /// Whether a task is pending for `target`.
    pub fn is_pending(&self, target: ParticipantId) -> bool {
        self.shared.tasks().contains_key(&target)
    }

    /// Participants with a pending task in `guild`, sorted.
    pub fn pending_in(&self, guild: GuildId) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .shared
            .tasks()
            .iter()
            .filter(|(_, task)| task.guild == guild)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of pending tasks.
    pub fn pending(&self) -> usize {
        self.shared.tasks().len()
    }

    /// Wait until every pending task has finished or been cancelled.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Abort every pending task and release their claims.
    pub fn shutdown(&self) {
        let drained: Vec<(ParticipantId, PendingTask)> = {
            let mut tasks = self.shared.tasks();
            let drained: Vec<(ParticipantId, PendingTask)> = tasks.drain().collect();
            for (target, _) in &drained {
                self.tracker.end_incubation(*target);
            }
            self.shared.idle.notify_waiters();
            drained
        };
        let count = drained.len();
        for (_, task) in drained {
            task.handle.abort();
        }
        info!(aborted = count, "incubation scheduler shut down");
    }
}

impl core::fmt::Debug for IncubationScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IncubationScheduler")
            .field("pending", &self.pending())
            .field("retry_backoff", &self.retry_backoff)
            .finish_non_exhaustive()
    }
}

/// Apply the marker, retrying once after `backoff`. Returns whether the
/// marker was applied.
async fn apply_marker(
    roles: &dyn RoleOracle,
    target: ParticipantId,
    guild: GuildId,
    backoff: Duration,
) -> bool {
    match roles.mark_infected(target, guild).await {
        Ok(()) => {
            info!(participant = %target, guild = %guild, "infected marker applied");
            return true;
        }
        Err(e) => {
            warn!(participant = %target, guild = %guild, error = %e, "marker failed, retrying");
        }
    }
    tokio::time::sleep(backoff).await;
    match roles.mark_infected(target, guild).await {
        Ok(()) => {
            info!(participant = %target, guild = %guild, "infected marker applied on retry");
            true
        }
        Err(e) => {
            error!(participant = %target, guild = %guild, error = %e, "infected marker lost");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryGuilds;

    const GUILD: GuildId = GuildId::new(1);
    const TARGET: ParticipantId = ParticipantId::new(7);

    fn setup() -> (Arc<MemoryGuilds>, Arc<IncubationTracker>, IncubationScheduler) {
        let guilds = Arc::new(MemoryGuilds::new());
        let tracker = Arc::new(IncubationTracker::new());
        let scheduler = IncubationScheduler::new(
            Arc::clone(&guilds) as Arc<dyn RoleOracle>,
            Arc::clone(&tracker),
        );
        (guilds, tracker, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn marker_is_applied_after_delay() {
        let (guilds, tracker, scheduler) = setup();
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();
        assert!(scheduler.schedule(TARGET, GUILD, Duration::from_secs(60), claim));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(!guilds.is_marked(GUILD, TARGET));
        assert!(tracker.is_incubating(TARGET));
        assert_eq!(scheduler.pending(), 1);

        scheduler.wait_idle().await;
        assert!(guilds.is_marked(GUILD, TARGET));
        assert!(!tracker.is_incubating(TARGET));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_applies_promptly() {
        let (guilds, tracker, scheduler) = setup();
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();
        assert!(scheduler.schedule(TARGET, GUILD, Duration::ZERO, claim));
        scheduler.wait_idle().await;
        assert!(guilds.is_marked(GUILD, TARGET));
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_is_retried() {
        let (guilds, tracker, scheduler) = setup();
        guilds.fail_next_markers(1);
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();
        assert!(scheduler.schedule(TARGET, GUILD, Duration::from_secs(1), claim));
        scheduler.wait_idle().await;
        assert!(guilds.is_marked(GUILD, TARGET));
        assert_eq!(guilds.mark_calls(), 2);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_marker_still_releases_incubation() {
        let (guilds, tracker, scheduler) = setup();
        guilds.fail_next_markers(2);
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();
        assert!(scheduler.schedule(TARGET, GUILD, Duration::from_secs(1), claim));
        scheduler.wait_idle().await;
        assert!(!guilds.is_marked(GUILD, TARGET));
        assert_eq!(guilds.mark_calls(), 2);
        assert!(!tracker.is_incubating(TARGET));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_the_marker() {
        let (guilds, tracker, scheduler) = setup();
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();
        assert!(scheduler.schedule(TARGET, GUILD, Duration::from_secs(60), claim));

        assert!(scheduler.cancel(TARGET));
        assert!(!tracker.is_incubating(TARGET));
        assert!(!scheduler.cancel(TARGET));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!guilds.is_marked(GUILD, TARGET));
        assert_eq!(guilds.mark_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_everything() {
        let (guilds, tracker, scheduler) = setup();
        for raw in 1..=3 {
            let p = ParticipantId::new(raw);
            let claim = tracker.try_claim(p, GUILD).unwrap();
            assert!(scheduler.schedule(p, GUILD, Duration::from_secs(30), claim));
        }
        assert_eq!(scheduler.pending(), 3);

        scheduler.shutdown();
        assert_eq!(scheduler.pending(), 0);
        assert!(tracker.is_empty());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(guilds.mark_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_schedule_wins() {
        let (guilds, tracker, scheduler) = setup();
        let claim = tracker.try_claim(TARGET, GUILD).unwrap();

        assert!(!scheduler.cancel(TARGET));
        assert!(!scheduler.schedule(TARGET, GUILD, Duration::from_secs(60), claim));
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!guilds.is_marked(GUILD, TARGET));
        assert_eq!(guilds.mark_calls(), 0);
    }
}
