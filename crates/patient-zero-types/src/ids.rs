//! Type-safe identifier wrappers around platform snowflakes.
//!
//! Every entity the bot touches (participants, guilds, channels, messages)
//! is addressed by a 64-bit snowflake issued by the chat platform. Each kind
//! gets its own newtype so a guild ID can never be passed where a
//! participant ID is expected.
//!
//! IDs serialize as bare JSON numbers and render as decimal strings, which
//! is also the form used for store keys.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a `u64` snowflake with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw snowflake.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the inner snowflake value.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = core::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse::<u64>().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Identifier of a chat participant (a guild member or the bot itself).
    ParticipantId
}

define_id! {
    /// Identifier of a guild (the group a set of channels belongs to).
    GuildId
}

define_id! {
    /// Identifier of a text channel.
    ChannelId
}

define_id! {
    /// Identifier of a single chat message.
    MessageId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_decimal() {
        let id = ParticipantId::new(132_185_638_983_303_168);
        assert_eq!(id.to_string(), "132185638983303168");
    }

    #[test]
    fn parses_store_key() {
        let parsed: Result<ParticipantId, _> = "42".parse();
        assert_eq!(parsed.ok(), Some(ParticipantId::new(42)));

        let bad: Result<ParticipantId, _> = "not-a-number".parse();
        assert!(bad.is_err());
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&GuildId::new(7)).unwrap_or_default();
        assert_eq!(json, "7");

        let restored: Result<GuildId, _> = serde_json::from_str("7");
        assert_eq!(restored.ok(), Some(GuildId::new(7)));
    }
}
