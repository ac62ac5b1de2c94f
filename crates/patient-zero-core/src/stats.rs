//! Stat commits for the two sides of an infection.
//!
//! Each commit is a single locked read-modify-write on one participant's
//! record: bump the relevant counter, recompute experience and level, and
//! persist. A level-up is reported when the new level exceeds the old one;
//! a brand-new record counts as sitting at [`MIN_LEVEL`] already, so the
//! first commit does not announce "level 1".

use patient_zero_db::{StoreError, UserStore};
use patient_zero_types::{Author, ParticipantId, UserRecord};
use tracing::debug;

use crate::level::{MIN_LEVEL, apply_progress};

/// A participant crossed into a higher level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelUp {
    /// Who leveled up.
    pub participant: ParticipantId,
    /// Their display name at the time.
    pub name: String,
    /// The level they reached.
    pub level: u32,
}

/// Which side of an infection a participant was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The contagious participant who passed the infection on.
    Infector,
    /// The participant who caught it.
    Infectee,
}

/// Record one infection for `author` on the given side.
///
/// Returns the level-up, if the commit produced one.
pub async fn record_infection(
    store: &UserStore,
    author: &Author,
    role: Role,
    points: u32,
) -> Result<Option<LevelUp>, StoreError> {
    let (before, after) = store
        .update(author.id, &author.name, |record| {
            bump(record, role);
            apply_progress(record, points);
        })
        .await?;

    debug!(
        participant = %author.id,
        role = ?role,
        infected = after.infected_count,
        infected_by = after.infected_by_count,
        xp = after.experience,
        level = after.level,
        "stats committed"
    );

    Ok((after.level > before.level.max(MIN_LEVEL)).then(|| LevelUp {
        participant: after.id,
        name: after.display_name,
        level: after.level,
    }))
}

fn bump(record: &mut UserRecord, role: Role) {
    match role {
        Role::Infector => record.infected_count = record.infected_count.saturating_add(1),
        Role::Infectee => record.infected_by_count = record.infected_by_count.saturating_add(1),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::Arc;

    use patient_zero_db::MemoryBackend;

    use super::*;
    use crate::level::derive_level;

    fn store() -> UserStore {
        UserStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn infector_side_bumps_infected_count() {
        let store = store();
        let author = Author::new(ParticipantId::new(1), "alice");
        let level_up = record_infection(&store, &author, Role::Infector, 5)
            .await
            .unwrap();
        assert_eq!(level_up, None);

        let record = store.get(author.id).await.unwrap().unwrap();
        assert_eq!(record.infected_count, 1);
        assert_eq!(record.infected_by_count, 0);
        assert_eq!(record.experience, 5);
        assert_eq!(record.level, derive_level(1, 0, 5).level);
    }

    #[tokio::test]
    async fn infectee_side_reports_level_up() {
        let store = store();
        let author = Author::new(ParticipantId::new(2), "bob");

        // passive = 5: sqrt(22/7 * 5 + 1) - 2 = 2.08... -> 2
        let level_up = record_infection(&store, &author, Role::Infectee, 5)
            .await
            .unwrap();
        assert_eq!(
            level_up,
            Some(LevelUp {
                participant: author.id,
                name: String::from("bob"),
                level: 2,
            })
        );

        let record = store.get(author.id).await.unwrap().unwrap();
        assert_eq!(record.infected_by_count, 1);
        assert_eq!(record.level, 2);
    }

    #[tokio::test]
    async fn level_invariant_holds_after_every_commit() {
        let store = store();
        let author = Author::new(ParticipantId::new(3), "carol");
        for i in 0..20 {
            let role = if i % 3 == 0 { Role::Infectee } else { Role::Infector };
            record_infection(&store, &author, role, 5).await.unwrap();
            let record = store.get(author.id).await.unwrap().unwrap();
            let expected = derive_level(record.infected_count, record.infected_by_count, 5);
            assert_eq!(record.level, expected.level);
            assert_eq!(record.experience, expected.experience);
        }
    }
}
