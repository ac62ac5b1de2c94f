//! Participant stat repository.
//!
//! [`UserStore`] maps a participant identity to its [`UserRecord`]. Records
//! are created lazily on first lookup and never deleted. Every operation on
//! a given participant runs under that participant's key lock, so two
//! concurrent counter updates for the same identity cannot lose an
//! increment, while updates for different identities never wait on each
//! other.

use std::sync::Arc;

use patient_zero_types::{ParticipantId, UserRecord};
use tracing::debug;

use crate::backend::RecordBackend;
use crate::error::StoreError;
use crate::locks::KeyedLocks;

/// Repository of persistent per-participant statistics.
pub struct UserStore {
    backend: Arc<dyn RecordBackend>,
    locks: KeyedLocks<ParticipantId>,
}

impl UserStore {
    /// Create a store on top of the given backend.
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    /// Look up a participant's record, creating it if it does not exist.
    ///
    /// A new record starts with every counter at zero and is persisted
    /// immediately. If the stored display name differs from
    /// `display_name`, the name is updated and persisted (last writer
    /// wins).
    pub async fn get_or_create(
        &self,
        id: ParticipantId,
        display_name: &str,
    ) -> Result<UserRecord, StoreError> {
        let _guard = self.locks.lock(id).await;
        self.load_or_create(id, display_name).await
    }

    /// Read a participant's record without creating it.
    pub async fn get(&self, id: ParticipantId) -> Result<Option<UserRecord>, StoreError> {
        let raw = self.backend.fetch(&id.to_string()).await?;
        raw.map(|s| serde_json::from_str(&s).map_err(StoreError::from))
            .transpose()
    }

    /// Serialize the full record and overwrite the stored value.
    ///
    /// Saving the same record twice leaves the store exactly as saving it
    /// once.
    pub async fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        let _guard = self.locks.lock(record.id).await;
        self.write(record).await
    }

    /// Read-modify-write a participant's record under its key lock.
    ///
    /// The record is created if absent and its display name refreshed,
    /// then `mutate` is applied and the result persisted. Returns the
    /// record as it was before the mutation alongside the saved record.
    pub async fn update<F>(
        &self,
        id: ParticipantId,
        display_name: &str,
        mutate: F,
    ) -> Result<(UserRecord, UserRecord), StoreError>
    where
        F: FnOnce(&mut UserRecord) + Send,
    {
        let _guard = self.locks.lock(id).await;
        let before = self.load_or_create(id, display_name).await?;
        let mut after = before.clone();
        mutate(&mut after);
        if after != before {
            self.write(&after).await?;
        }
        Ok((before, after))
    }

    async fn load_or_create(
        &self,
        id: ParticipantId,
        display_name: &str,
    ) -> Result<UserRecord, StoreError> {
        match self.get(id).await? {
            None => {
                let record = UserRecord::new(id, display_name);
                self.write(&record).await?;
                debug!(participant = %id, name = display_name, "created user record");
                Ok(record)
            }
            Some(mut record) => {
                if record.display_name != display_name {
                    debug!(
                        participant = %id,
                        old = record.display_name,
                        new = display_name,
                        "refreshing display name"
                    );
                    display_name.clone_into(&mut record.display_name);
                    self.write(&record).await?;
                }
                Ok(record)
            }
        }
    }

    async fn write(&self, record: &UserRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.backend.store(&record.store_key(), &json).await
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("active_locks", &self.locks.active())
            .finish_non_exhaustive()
    }
}
