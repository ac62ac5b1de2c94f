//! Contagion engine, incubation scheduling, and leveling for Patient Zero.
//!
//! An infected participant who posts a message may pass the infection to
//! the people who spoke just before them. Risk falls off steeply with
//! conversational distance, and a newly infected participant incubates for
//! a while before the infected marker is applied. Every infection also
//! feeds a small stat system: experience and levels derived from how many
//! people a participant has infected and been infected by.
//!
//! # Modules
//!
//! - [`admin`] -- Administrative infect / cure / reset operations
//! - [`collaborators`] -- Traits for the chat platform: roles, history, notifications
//! - [`config`] -- Configuration loading from `patient-zero.yaml`
//! - [`dice`] -- Percentile dice used for infection rolls
//! - [`engine`] -- The [`ContagionEngine`] evaluation loop
//! - [`error`] -- Error types
//! - [`incubation`] -- [`IncubationTracker`], the set of incubating participants
//! - [`level`] -- Experience and level derivation
//! - [`memory`] -- In-memory collaborators for tests and replays
//! - [`notify`] -- Status and level-up line formatting
//! - [`scheduler`] -- [`IncubationScheduler`], delayed marker application
//! - [`spread`] -- Distance-weighted infection probability
//! - [`stats`] -- Stat commits for infector and infectee
//!
//! [`ContagionEngine`]: engine::ContagionEngine
//! [`IncubationTracker`]: incubation::IncubationTracker
//! [`IncubationScheduler`]: scheduler::IncubationScheduler

pub mod admin;
pub mod collaborators;
pub mod config;
pub mod dice;
pub mod engine;
pub mod error;
pub mod incubation;
pub mod level;
pub mod memory;
pub mod notify;
pub mod scheduler;
pub mod spread;
pub mod stats;

pub use admin::{AdminAction, AdminOps, PatientReport};
pub use collaborators::{HistorySource, HistoryStream, NotificationSink, RoleOracle};
pub use config::{ConfigError, ContagionConfig, PatientZeroConfig};
pub use dice::{Dice, RandomDice, ScriptedDice};
pub use engine::{CommitFailure, CommitStage, ContagionEngine, InfectionOutcome, Verdict};
pub use error::{CollaboratorError, ContagionError};
pub use incubation::{IncubationClaim, IncubationTracker};
pub use level::{Progress, derive_level};
pub use scheduler::IncubationScheduler;
