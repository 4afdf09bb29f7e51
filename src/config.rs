use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// Runtime settings for worlds and their actors.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding one sub-directory per world.
    pub world_root: PathBuf,
    /// World opened by the server binary.
    pub default_world: String,
    /// How long a chunk without watchers waits between idle checks.
    pub chunk_idle: Duration,
    pub chunk_tick: Duration,
    /// World clock ticks between two full saves.
    pub autosave_ticks: u64,
    /// World clock ticks between two time broadcasts to players.
    pub time_broadcast_ticks: u64,
    pub mailbox_size: usize,
    pub region_ext: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world_root: PathBuf::from("worlds"),
            default_world: "world".into(),
            chunk_idle: Duration::from_secs(30),
            chunk_tick: Duration::from_millis(50),
            autosave_ticks: 6000,
            time_broadcast_ticks: 20,
            mailbox_size: 64,
            region_ext: "mca".into(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value {value:?} for {key}");
            default
        }),
        Err(_) => default,
    }
}

impl Config {
    /// Reads the configuration from the environment (and a `.env` file if there is one).
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let default = Self::default();
        Self {
            world_root: env::var("WORLD_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.world_root),
            default_world: env::var("WORLD_NAME").unwrap_or(default.default_world),
            chunk_idle: Duration::from_secs(env_or(
                "CHUNK_IDLE_SECS",
                default.chunk_idle.as_secs(),
            )),
            chunk_tick: Duration::from_millis(env_or(
                "CHUNK_TICK_MILLIS",
                default.chunk_tick.as_millis() as u64,
            )),
            autosave_ticks: env_or("AUTOSAVE_TICKS", default.autosave_ticks).max(1),
            time_broadcast_ticks: env_or("TIME_BROADCAST_TICKS", default.time_broadcast_ticks)
                .max(1),
            mailbox_size: env_or("MAILBOX_SIZE", default.mailbox_size).max(1),
            region_ext: env::var("REGION_EXT").unwrap_or(default.region_ext),
        }
    }
}
