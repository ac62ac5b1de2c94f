//! Shared type definitions for the Patient Zero contagion bot.
//!
//! This crate is the single source of truth for the data that flows between
//! the store, the contagion engine, and the replay driver. It performs no
//! I/O.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe wrappers around platform snowflake identifiers
//! - [`chat`] -- Message, author, and channel-selector types seen by the engine
//! - [`record`] -- Persistent per-participant stat record and its wire format

pub mod chat;
pub mod ids;
pub mod record;

// Re-export all public types at crate root for convenience.
pub use chat::{Author, ChannelSelector, HistoryMessage, TriggerEvent};
pub use ids::{ChannelId, GuildId, MessageId, ParticipantId};
pub use record::UserRecord;
