//! Administrative infect / cure / reset operations.
//!
//! These bypass the dice entirely. Each operation works through its list
//! of patients independently and reports what happened to every one of
//! them; a failure on one patient never stops the rest.

use std::collections::BTreeSet;
use std::sync::Arc;

use patient_zero_types::{GuildId, ParticipantId};
use tracing::{info, warn};

use crate::collaborators::RoleOracle;
use crate::error::{CollaboratorError, ContagionError};
use crate::scheduler::IncubationScheduler;

/// What an administrative operation did to one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    /// The infected marker was applied.
    Infected {
        /// Whether a pending incubation was cut short.
        skipped_incubation: bool,
    },
    /// The patient already carried the marker.
    AlreadyInfected,
    /// The marker was removed.
    Cured {
        /// Whether a pending incubation was cancelled.
        cancelled_incubation: bool,
    },
    /// The collaborator call failed.
    Failed(CollaboratorError),
}

/// The result for one patient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientReport {
    /// The patient.
    pub participant: ParticipantId,
    /// What happened to them.
    pub action: AdminAction,
}

impl PatientReport {
    const fn new(participant: ParticipantId, action: AdminAction) -> Self {
        Self {
            participant,
            action,
        }
    }
}

/// Administrative operations over the infected marker.
pub struct AdminOps {
    roles: Arc<dyn RoleOracle>,
    scheduler: Arc<IncubationScheduler>,
}

impl AdminOps {
    /// Create the operations over `roles`, cancelling incubations through
    /// `scheduler`.
    pub const fn new(roles: Arc<dyn RoleOracle>, scheduler: Arc<IncubationScheduler>) -> Self {
        Self { roles, scheduler }
    }

    /// Mark every patient infected immediately.
    ///
    /// A patient who is still incubating has the pending task cancelled so
    /// the marker is not applied twice.
    pub async fn infect(&self, guild: GuildId, patients: &[ParticipantId]) -> Vec<PatientReport> {
        let mut reports = Vec::with_capacity(patients.len());
        for &patient in patients {
            let action = self.infect_one(guild, patient).await;
            info!(participant = %patient, guild = %guild, action = ?action, "admin infect");
            reports.push(PatientReport::new(patient, action));
        }
        reports
    }

    async fn infect_one(&self, guild: GuildId, patient: ParticipantId) -> AdminAction {
        match self.roles.is_infected(patient, guild).await {
            Ok(true) => return AdminAction::AlreadyInfected,
            Ok(false) => {}
            Err(e) => return failed(patient, e),
        }
        let skipped_incubation = self.scheduler.cancel(patient);
        match self.roles.mark_infected(patient, guild).await {
            Ok(()) => AdminAction::Infected { skipped_incubation },
            Err(e) => failed(patient, e),
        }
    }

    /// Cure every patient: cancel any pending incubation and remove the
    /// marker.
    pub async fn cure(&self, guild: GuildId, patients: &[ParticipantId]) -> Vec<PatientReport> {
        let mut reports = Vec::with_capacity(patients.len());
        for &patient in patients {
            let cancelled_incubation = self.scheduler.cancel(patient);
            let action = match self.roles.clear_infected(patient, guild).await {
                Ok(()) => AdminAction::Cured {
                    cancelled_incubation,
                },
                Err(e) => failed(patient, e),
            };
            info!(participant = %patient, guild = %guild, action = ?action, "admin cure");
            reports.push(PatientReport::new(patient, action));
        }
        reports
    }

    /// Cure everyone in `guild` who is infected or incubating, including
    /// targets whose infection is still being committed.
    ///
    /// # Errors
    ///
    /// Returns [`ContagionError::Collaborator`] if the infected members of
    /// the guild cannot be listed. Nobody has been cured at that point.
    pub async fn reset(&self, guild: GuildId) -> Result<Vec<PatientReport>, ContagionError> {
        let mut patients: BTreeSet<ParticipantId> =
            self.roles.infected_members(guild).await?.into_iter().collect();
        patients.extend(self.scheduler.pending_in(guild));
        patients.extend(self.scheduler.tracker().claimed_in(guild));
        let patients: Vec<ParticipantId> = patients.into_iter().collect();
        info!(guild = %guild, patients = patients.len(), "resetting guild");
        Ok(self.cure(guild, &patients).await)
    }
}

impl core::fmt::Debug for AdminOps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdminOps")
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

fn failed(patient: ParticipantId, error: CollaboratorError) -> AdminAction {
    warn!(participant = %patient, error = %error, "admin operation failed");
    AdminAction::Failed(error)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::incubation::IncubationTracker;
    use crate::memory::MemoryGuilds;

    const GUILD: GuildId = GuildId::new(1);

    fn setup() -> (Arc<MemoryGuilds>, Arc<IncubationScheduler>, AdminOps) {
        let guilds = Arc::new(MemoryGuilds::new());
        let scheduler = Arc::new(IncubationScheduler::new(
            Arc::clone(&guilds) as _,
            Arc::new(IncubationTracker::new()),
        ));
        let admin = AdminOps::new(Arc::clone(&guilds) as _, Arc::clone(&scheduler));
        (guilds, scheduler, admin)
    }

    fn ids(raw: &[u64]) -> Vec<ParticipantId> {
        raw.iter().copied().map(ParticipantId::new).collect()
    }

    #[tokio::test]
    async fn infect_marks_and_reports_each_patient() {
        let (guilds, _, admin) = setup();
        guilds.set_infected(GUILD, ParticipantId::new(2), true);

        let reports = admin.infect(GUILD, &ids(&[1, 2])).await;
        assert_eq!(
            reports[0].action,
            AdminAction::Infected {
                skipped_incubation: false
            }
        );
        assert_eq!(reports[1].action, AdminAction::AlreadyInfected);
        assert!(guilds.is_marked(GUILD, ParticipantId::new(1)));
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let (guilds, _, admin) = setup();
        guilds.fail_next_markers(1);

        let reports = admin.infect(GUILD, &ids(&[1, 2])).await;
        assert!(matches!(reports[0].action, AdminAction::Failed(_)));
        assert!(matches!(reports[1].action, AdminAction::Infected { .. }));
        assert!(guilds.is_marked(GUILD, ParticipantId::new(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn cure_cancels_pending_incubation() {
        let (guilds, scheduler, admin) = setup();
        let patient = ParticipantId::new(5);
        let claim = scheduler.tracker().try_claim(patient, GUILD).unwrap();
        assert!(scheduler.schedule(patient, GUILD, Duration::from_secs(60), claim));

        let reports = admin.cure(GUILD, &[patient]).await;
        assert_eq!(
            reports[0].action,
            AdminAction::Cured {
                cancelled_incubation: true
            }
        );
        assert!(!scheduler.tracker().is_incubating(patient));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!guilds.is_marked(GUILD, patient));
    }

    #[tokio::test(start_paused = true)]
    async fn infect_cuts_incubation_short() {
        let (guilds, scheduler, admin) = setup();
        let patient = ParticipantId::new(5);
        let claim = scheduler.tracker().try_claim(patient, GUILD).unwrap();
        assert!(scheduler.schedule(patient, GUILD, Duration::from_secs(60), claim));

        let reports = admin.infect(GUILD, &[patient]).await;
        assert_eq!(
            reports[0].action,
            AdminAction::Infected {
                skipped_incubation: true
            }
        );
        assert_eq!(scheduler.pending(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(guilds.mark_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cures_infected_and_incubating_members() {
        let (guilds, scheduler, admin) = setup();
        guilds.set_infected(GUILD, ParticipantId::new(1), true);
        guilds.set_infected(GUILD, ParticipantId::new(2), true);
        guilds.set_infected(GuildId::new(2), ParticipantId::new(9), true);
        let incubating = ParticipantId::new(3);
        let claim = scheduler.tracker().try_claim(incubating, GUILD).unwrap();
        assert!(scheduler.schedule(incubating, GUILD, Duration::from_secs(60), claim));

        let reports = admin.reset(GUILD).await.unwrap();
        let cured: Vec<ParticipantId> = reports.iter().map(|r| r.participant).collect();
        assert_eq!(cured, ids(&[1, 2, 3]));
        assert!(guilds.infected_members(GUILD).await.unwrap().is_empty());
        assert!(guilds.is_marked(GuildId::new(2), ParticipantId::new(9)));
        assert!(scheduler.tracker().is_empty());
    }

    #[tokio::test]
    async fn reset_reaches_claims_not_yet_scheduled() {
        let (_, scheduler, admin) = setup();
        let in_flight = ParticipantId::new(4);
        let claim = scheduler.tracker().try_claim(in_flight, GUILD).unwrap();

        let reports = admin.reset(GUILD).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].participant, in_flight);
        assert!(!scheduler.tracker().holds(in_flight, claim));
        assert!(!scheduler.schedule(in_flight, GUILD, Duration::from_secs(60), claim));
    }
}
