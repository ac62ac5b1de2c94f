//! The set of participants currently incubating.
//!
//! A participant enters the set the moment an infection roll succeeds and
//! leaves it once the infected marker has been applied (or an administrator
//! cures them first). While in the set the participant is not a valid
//! infection target for any evaluation, which is what stops two overlapping
//! evaluations from infecting the same person twice.
//!
//! Each claim carries a token. Whoever took the claim can check that it
//! still holds it with [`IncubationTracker::holds`]; a cure releases the
//! claim, so a commit that is still in flight notices and stands down.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use patient_zero_types::{GuildId, ParticipantId};

/// Token for one incubation claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IncubationClaim(u64);

#[derive(Debug, Clone, Copy)]
struct ClaimEntry {
    claim: IncubationClaim,
    guild: Option<GuildId>,
}

#[derive(Debug, Default)]
struct Claims {
    entries: HashMap<ParticipantId, ClaimEntry>,
    next: u64,
}

/// Process-wide record of incubating participants.
///
/// Shared between concurrent evaluations via `Arc<IncubationTracker>`.
/// Every operation takes the inner lock for a single map operation, so
/// the claim in [`try_claim`](Self::try_claim) is atomic with respect to
/// every other caller.
#[derive(Debug, Default)]
pub struct IncubationTracker {
    claims: Mutex<Claims>,
}

impl IncubationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn claims(&self) -> MutexGuard<'_, Claims> {
        self.claims.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim `id` for incubation.
    ///
    /// Returns `false` if the participant was already incubating, in which
    /// case the caller must not schedule another infection for them.
    pub fn try_begin_incubation(&self, id: ParticipantId) -> bool {
        self.claim(id, None).is_some()
    }

    /// Claim `id` for incubation in `guild`, returning the claim token.
    ///
    /// Returns `None` if the participant was already incubating.
    pub fn try_claim(&self, id: ParticipantId, guild: GuildId) -> Option<IncubationClaim> {
        self.claim(id, Some(guild))
    }

    fn claim(&self, id: ParticipantId, guild: Option<GuildId>) -> Option<IncubationClaim> {
        let mut claims = self.claims();
        if claims.entries.contains_key(&id) {
            return None;
        }
        let claim = IncubationClaim(claims.next);
        claims.next = claims.next.wrapping_add(1);
        claims.entries.insert(id, ClaimEntry { claim, guild });
        Some(claim)
    }

    /// Whether `claim` is still the live claim on `id`.
    pub fn holds(&self, id: ParticipantId, claim: IncubationClaim) -> bool {
        self.claims()
            .entries
            .get(&id)
            .is_some_and(|entry| entry.claim == claim)
    }

    /// Release `claim` on `id`, leaving any newer claim alone. Returns
    /// whether the claim was still held.
    pub fn release(&self, id: ParticipantId, claim: IncubationClaim) -> bool {
        let mut claims = self.claims();
        if claims
            .entries
            .get(&id)
            .is_some_and(|entry| entry.claim == claim)
        {
            claims.entries.remove(&id);
            true
        } else {
            false
        }
    }

    /// Release `id`. Releasing a participant that is not incubating is a
    /// no-op.
    pub fn end_incubation(&self, id: ParticipantId) {
        self.claims().entries.remove(&id);
    }

    /// Whether `id` is currently incubating.
    pub fn is_incubating(&self, id: ParticipantId) -> bool {
        self.claims().entries.contains_key(&id)
    }

    /// Participants claimed for incubation in `guild`, sorted.
    pub fn claimed_in(&self, guild: GuildId) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self
            .claims()
            .entries
            .iter()
            .filter(|(_, entry)| entry.guild == Some(guild))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of incubating participants.
    pub fn len(&self) -> usize {
        self.claims().entries.len()
    }

    /// Whether nobody is incubating.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of every incubating participant.
    pub fn snapshot(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<ParticipantId> = self.claims().entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
