//! Data layer for the Patient Zero contagion bot.
//!
//! Participant statistics live in a single Redis hash (`PZ:Users`), one
//! JSON-encoded [`UserRecord`] per field, keyed by the stringified
//! participant ID. This crate provides the [`UserStore`] repository on top
//! of a pluggable [`RecordBackend`].
//!
//! # Architecture
//!
//! ```text
//! ContagionEngine
//!     |
//!     +-- UserStore (get-or-create, save, per-identity locked updates)
//!             |
//!             +-- RecordBackend
//!                   |-- RedisBackend   (fred, HGET/HSET on PZ:Users)
//!                   +-- MemoryBackend  (in-process map, tests and replays)
//! ```
//!
//! # Modules
//!
//! - [`backend`] -- [`RecordBackend`] trait and the in-memory backend
//! - [`redis`] -- Redis hash backend built on `fred`
//! - [`locks`] -- Per-key async lock map
//! - [`user_store`] -- The [`UserStore`] repository
//! - [`error`] -- Shared error types
//!
//! [`UserRecord`]: patient_zero_types::UserRecord

pub mod backend;
pub mod error;
pub mod locks;
pub mod redis;
pub mod user_store;

// Re-export primary types for convenience.
pub use backend::{MemoryBackend, RecordBackend};
pub use error::StoreError;
pub use locks::{KeyGuard, KeyedLocks};
pub use redis::{RedisBackend, USERS_HASH};
pub use user_store::UserStore;
