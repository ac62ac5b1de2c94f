//! Persistent per-participant stat record.
//!
//! One [`UserRecord`] exists per participant identity. It is stored as a
//! flat JSON object inside the `PZ:Users` hash with the field names
//! `id`, `name`, `xp`, `lvl`, `infected`, and `infectedByCount`. The field
//! names are part of the wire format and must not change.

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// Cumulative infection statistics for one participant.
///
/// `level` is never mutated on its own: it is always recomputed from the
/// two counters whenever they change. A freshly created record starts with
/// every counter at zero, including `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable participant identifier.
    pub id: ParticipantId,
    /// Last observed human-readable name.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Accumulated experience, derived from the counters.
    #[serde(rename = "xp")]
    pub experience: u32,
    /// Level derived from the counters.
    #[serde(rename = "lvl")]
    pub level: u32,
    /// Number of participants this owner has infected.
    #[serde(rename = "infected")]
    pub infected_count: u32,
    /// Number of times this owner has been infected by others.
    #[serde(rename = "infectedByCount")]
    pub infected_by_count: u32,
}

impl UserRecord {
    /// Create a fresh record with every counter at zero.
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            experience: 0,
            level: 0,
            infected_count: 0,
            infected_by_count: 0,
        }
    }

    /// Return the key this record is stored under (the stringified ID).
    pub fn store_key(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_is_zeroed() {
        let record = UserRecord::new(ParticipantId::new(1), "alice");
        assert_eq!(record.experience, 0);
        assert_eq!(record.level, 0);
        assert_eq!(record.infected_count, 0);
        assert_eq!(record.infected_by_count, 0);
        assert_eq!(record.store_key(), "1");
    }

    #[test]
    fn wire_format_uses_flat_field_names() {
        let record = UserRecord {
            id: ParticipantId::new(9),
            display_name: String::from("bob"),
            experience: 15,
            level: 2,
            infected_count: 2,
            infected_by_count: 1,
        };
        let value = serde_json::to_value(&record).unwrap_or_default();
        assert_eq!(
            value,
            serde_json::json!({
                "id": 9,
                "name": "bob",
                "xp": 15,
                "lvl": 2,
                "infected": 2,
                "infectedByCount": 1,
            })
        );
    }

    #[test]
    fn wire_format_round_trips() {
        let json = r#"{"id":3,"name":"carol","xp":10,"lvl":1,"infected":1,"infectedByCount":1}"#;
        let record: Result<UserRecord, _> = serde_json::from_str(json);
        assert!(record.is_ok());
        let record = record.unwrap_or_else(|_| UserRecord::new(ParticipantId::new(0), ""));
        assert_eq!(record.display_name, "carol");
        assert_eq!(serde_json::to_string(&record).unwrap_or_default(), json);
    }
}
