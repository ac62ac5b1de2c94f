//! Replay driver for the Patient Zero contagion bot.
//!
//! Wires the contagion engine to an in-memory chat platform and feeds it
//! NDJSON chat events, one per line, from stdin or from the file named by
//! `PZ_REPLAY_FILE`. User records go to Redis when a URL is configured and
//! to an in-process map otherwise.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `patient-zero.yaml` (or `PZ_CONFIG`)
//! 3. Open the user store (Redis or memory)
//! 4. Build the platform, scheduler, engine, and admin operations
//! 5. Replay every input event
//! 6. Wait for evaluations, optionally drain incubations
//!    (`PZ_DRAIN_INCUBATION=true`), and print the summary as JSON

mod error;
mod replay;
mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use patient_zero_core::memory::MemoryGuilds;
use patient_zero_core::{
    AdminOps, ContagionEngine, Dice, IncubationScheduler, IncubationTracker, PatientZeroConfig,
    RandomDice,
};
use patient_zero_db::{MemoryBackend, RecordBackend, RedisBackend, UserStore};
use patient_zero_types::MessageId;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::replay::{DiceFactory, Replay, parse_line};
use crate::sink::TracingSink;

/// Default configuration file, relative to the working directory.
const CONFIG_FILE: &str = "patient-zero.yaml";

/// Application entry point for the replay driver.
///
/// # Errors
///
/// Returns an error if configuration, the store connection, or reading the
/// input fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("patient-zero-engine starting");

    // 2. Load configuration.
    let config = load_config()?;
    info!(
        infection_chance = config.contagion.infection_chance,
        nearby_messages = config.contagion.nearby_messages,
        max_time_difference_seconds = config.contagion.max_time_difference_seconds,
        incubation_time_seconds = config.contagion.incubation_time_seconds,
        infection_points = config.contagion.infection_points,
        "Configuration loaded"
    );

    // 3. Open the user store.
    let backend = open_backend(&config).await?;
    let store = Arc::new(UserStore::new(backend));

    // 4. Build the engine.
    let guilds = Arc::new(MemoryGuilds::new());
    let tracker = Arc::new(IncubationTracker::new());
    let scheduler = Arc::new(IncubationScheduler::new(
        Arc::clone(&guilds) as _,
        Arc::clone(&tracker),
    ));
    let sink = Arc::new(TracingSink::new(
        config.bot.global_status_channel_id,
        config.bot.log_channel_name.clone(),
    ));
    let engine = Arc::new(
        ContagionEngine::new(
            Arc::clone(&guilds) as _,
            Arc::clone(&guilds) as _,
            sink,
            store,
            Arc::clone(&scheduler),
            config.contagion.clone(),
        )
        .with_bot_id(config.bot.bot_id),
    );
    let admin = AdminOps::new(Arc::clone(&guilds) as _, Arc::clone(&scheduler));
    let mut replay = Replay::new(guilds, engine, admin, scheduler, dice_factory());

    // 5. Replay the input.
    let input: Box<dyn AsyncBufRead + Unpin + Send> = match std::env::var("PZ_REPLAY_FILE") {
        Ok(path) => {
            info!(path = %path, "Replaying from file");
            Box::new(BufReader::new(tokio::fs::File::open(path).await?))
        }
        Err(_) => {
            info!("Replaying from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
    };
    let mut lines = input.lines();
    let mut line_no: usize = 0;
    while let Some(line) = lines.next_line().await.map_err(EngineError::from)? {
        line_no = line_no.saturating_add(1);
        if let Some(event) = parse_line(line_no, &line)? {
            replay.apply(event).await;
        }
    }

    // 6. Finish up.
    let drain = std::env::var("PZ_DRAIN_INCUBATION").is_ok_and(|v| v == "true" || v == "1");
    let summary = replay.finish(drain).await;
    info!(
        events = summary.events,
        messages = summary.messages,
        rolls = summary.rolls,
        infections = summary.infections,
        aborted = summary.aborted,
        still_incubating = summary.still_incubating,
        "Replay finished"
    );
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}

/// Load configuration from `PZ_CONFIG` or `patient-zero.yaml`.
///
/// A missing file is not an error: defaults (plus environment overrides)
/// are used instead.
fn load_config() -> Result<PatientZeroConfig, EngineError> {
    let path = std::env::var("PZ_CONFIG").map_or_else(|_| PathBuf::from(CONFIG_FILE), PathBuf::from);
    if !path.exists() {
        info!(path = %path.display(), "Config file not found, using defaults");
    }
    Ok(PatientZeroConfig::load_or_default(&path)?)
}

/// Connect to Redis when configured, otherwise keep records in memory.
async fn open_backend(config: &PatientZeroConfig) -> Result<Arc<dyn RecordBackend>, EngineError> {
    match &config.infrastructure.redis_url {
        Some(url) => Ok(Arc::new(RedisBackend::connect(url).await?)),
        None => {
            info!("No Redis URL configured, keeping user records in memory");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

/// Dice for each evaluation: seeded per message from `PZ_REPLAY_SEED` for
/// reproducible replays, or from the OS otherwise.
fn dice_factory() -> DiceFactory {
    match std::env::var("PZ_REPLAY_SEED")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
    {
        Some(seed) => {
            info!(seed, "Using seeded dice");
            Arc::new(move |message: MessageId| -> Box<dyn Dice> {
                Box::new(RandomDice::new(StdRng::seed_from_u64(
                    seed ^ message.into_inner(),
                )))
            })
        }
        None => Arc::new(|_: MessageId| -> Box<dyn Dice> {
            Box::new(RandomDice::new(StdRng::from_os_rng()))
        }),
    }
}
