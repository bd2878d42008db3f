//! Environment-driven configuration.
//!
//! Every knob has a default; unset or unparseable variables fall back to it.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PERSIST_IDLE_MS: u64 = 500;
const DEFAULT_PERSIST_MAX_WAIT_MS: u64 = 2000;
const DEFAULT_LOCK_TTL_SECS: u64 = 30;
const DEFAULT_LOCK_SWEEP_MS: u64 = 1000;
const DEFAULT_ROOM_IDLE_EVICT_SECS: u64 = 60;
const DEFAULT_HISTORY_RETENTION: usize = 200;
const DEFAULT_COMMAND_CACHE_CAPACITY: usize = 256;
const DEFAULT_AI_MAX_PROMPT_CHARS: usize = 1000;
const DEFAULT_AI_COMMAND_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AI_MAX_TOKENS: u32 = 2048;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

// =============================================================================
// PERSISTENCE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    /// Quiet period after the last mutation before a commit fires.
    pub idle: Duration,
    /// Upper bound between commits under continuous mutation.
    pub max_wait: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_millis(DEFAULT_PERSIST_IDLE_MS),
            max_wait: Duration::from_millis(DEFAULT_PERSIST_MAX_WAIT_MS),
        }
    }
}

impl PersistConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            idle: Duration::from_millis(env_parse("PERSIST_IDLE_MS", DEFAULT_PERSIST_IDLE_MS)),
            max_wait: Duration::from_millis(env_parse("PERSIST_MAX_WAIT_MS", DEFAULT_PERSIST_MAX_WAIT_MS)),
        }
    }
}

// =============================================================================
// AI
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AiConfig {
    pub max_prompt_chars: usize,
    /// Hard limit on one translator call.
    pub command_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: DEFAULT_AI_MAX_PROMPT_CHARS,
            command_timeout: Duration::from_secs(DEFAULT_AI_COMMAND_TIMEOUT_SECS),
            max_tokens: DEFAULT_AI_MAX_TOKENS,
        }
    }
}

impl AiConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_prompt_chars: env_parse("AI_MAX_PROMPT_CHARS", DEFAULT_AI_MAX_PROMPT_CHARS),
            command_timeout: Duration::from_secs(env_parse("AI_COMMAND_TIMEOUT_SECS", DEFAULT_AI_COMMAND_TIMEOUT_SECS)),
            max_tokens: env_parse("AI_MAX_TOKENS", DEFAULT_AI_MAX_TOKENS),
        }
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// Settings shared by every room actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomConfig {
    pub persist: PersistConfig,
    pub lock_ttl: Duration,
    pub lock_sweep: Duration,
    /// How long a room with no sessions stays resident.
    pub idle_evict: Duration,
    pub history_retention: usize,
    pub command_cache_capacity: usize,
    pub ai: AiConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            persist: PersistConfig::default(),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
            lock_sweep: Duration::from_millis(DEFAULT_LOCK_SWEEP_MS),
            idle_evict: Duration::from_secs(DEFAULT_ROOM_IDLE_EVICT_SECS),
            history_retention: DEFAULT_HISTORY_RETENTION,
            command_cache_capacity: DEFAULT_COMMAND_CACHE_CAPACITY,
            ai: AiConfig::default(),
        }
    }
}

impl RoomConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            persist: PersistConfig::from_env(),
            lock_ttl: Duration::from_secs(env_parse("LOCK_TTL_SECS", DEFAULT_LOCK_TTL_SECS)),
            lock_sweep: Duration::from_millis(env_parse("LOCK_SWEEP_MS", DEFAULT_LOCK_SWEEP_MS).max(1)),
            idle_evict: Duration::from_secs(env_parse("ROOM_IDLE_EVICT_SECS", DEFAULT_ROOM_IDLE_EVICT_SECS)),
            history_retention: env_parse("HISTORY_RETENTION", DEFAULT_HISTORY_RETENTION).max(1),
            command_cache_capacity: env_parse("COMMAND_CACHE_CAPACITY", DEFAULT_COMMAND_CACHE_CAPACITY).max(1),
            ai: AiConfig::from_env(),
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub dev_identity: bool,
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            dev_identity: std::env::var("DEV_IDENTITY").is_ok_and(|v| v == "1"),
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
