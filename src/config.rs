//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for step-replay, supporting:
//! - Environment variables for all configurable values
//! - Defaults tuned for AI-planned browser steps
//! - Per-section constructors so tests can build configs without touching the environment
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STEP_REPLAY_CONCURRENCY` | Cases run in parallel per batch | `5` |
//! | `STEP_REPLAY_SETTLE_TIMEOUT_MS` | Network-quiescence wait after a step | `3000` |
//! | `STEP_REPLAY_NAV_TIMEOUT_MS` | Initial navigation timeout | `30000` |
//! | `STEP_REPLAY_CAPTURE_POLL_MS` | Capture queue drain interval | `300` |
//! | `STEP_REPLAY_CAPTURE_DEBOUNCE_MS` | Text-input inactivity before commit | `600` |
//! | `STEP_REPLAY_CAPTURE_DEDUP_MS` | Near-duplicate event window | `500` |
//! | `STEP_REPLAY_CAPTURE_QUEUE_CAP` | Page-side capture queue bound | `256` |
//! | `STEP_REPLAY_PLANNER_ENDPOINT` | Chat-completions endpoint | `https://api.openai.com/v1/chat/completions` |
//! | `STEP_REPLAY_PLANNER_MODEL` | Planner model name | `gpt-4o-mini` |
//! | `STEP_REPLAY_PLANNER_API_KEY` | Planner API key (falls back to `OPENAI_API_KEY`) | unset |
//! | `STEP_REPLAY_PLANNER_MAX_RETRIES` | Retries for retryable planner failures | `2` |
//! | `STEP_REPLAY_PLANNER_TIMEOUT_SECS` | Per-request planner timeout | `60` |
//! | `STEP_REPLAY_STORE_DIR` | Directory of persisted case documents | `./cases` |
//! | `STEP_REPLAY_SESSION_DIR` | Base directory for run artifacts | `/tmp/step-replay` |
//! | `STEP_REPLAY_TRACE` | Record a trace artifact per case (`0` disables) | `1` |
//!
//! # Example
//!
//! ```bash
//! export STEP_REPLAY_PLANNER_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export STEP_REPLAY_PLANNER_MODEL="qwen3"
//! export STEP_REPLAY_CONCURRENCY=2
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

// ============================================================================
// Default Values
// ============================================================================

/// Default number of cases per batch
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Default settle wait after each step (milliseconds)
pub const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 3_000;

/// Default initial navigation timeout (milliseconds)
pub const DEFAULT_NAV_TIMEOUT_MS: u64 = 30_000;

/// Default capture drain interval (milliseconds)
pub const DEFAULT_CAPTURE_POLL_MS: u64 = 300;

/// Default text-input debounce (milliseconds)
pub const DEFAULT_CAPTURE_DEBOUNCE_MS: u64 = 600;

/// Default near-duplicate window (milliseconds)
pub const DEFAULT_CAPTURE_DEDUP_MS: u64 = 500;

/// Default page-side queue bound
pub const DEFAULT_CAPTURE_QUEUE_CAP: usize = 256;

/// Default planner endpoint
pub const DEFAULT_PLANNER_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default planner model
pub const DEFAULT_PLANNER_MODEL: &str = "gpt-4o-mini";

/// Default planner retry count
pub const DEFAULT_PLANNER_MAX_RETRIES: usize = 2;

/// Default planner request timeout (seconds)
pub const DEFAULT_PLANNER_TIMEOUT_SECS: u64 = 60;

/// Default store directory
pub const DEFAULT_STORE_DIR: &str = "./cases";

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/step-replay";

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_CONCURRENCY: &str = "STEP_REPLAY_CONCURRENCY";
pub const ENV_SETTLE_TIMEOUT_MS: &str = "STEP_REPLAY_SETTLE_TIMEOUT_MS";
pub const ENV_NAV_TIMEOUT_MS: &str = "STEP_REPLAY_NAV_TIMEOUT_MS";
pub const ENV_CAPTURE_POLL_MS: &str = "STEP_REPLAY_CAPTURE_POLL_MS";
pub const ENV_CAPTURE_DEBOUNCE_MS: &str = "STEP_REPLAY_CAPTURE_DEBOUNCE_MS";
pub const ENV_CAPTURE_DEDUP_MS: &str = "STEP_REPLAY_CAPTURE_DEDUP_MS";
pub const ENV_CAPTURE_QUEUE_CAP: &str = "STEP_REPLAY_CAPTURE_QUEUE_CAP";
pub const ENV_PLANNER_ENDPOINT: &str = "STEP_REPLAY_PLANNER_ENDPOINT";
pub const ENV_PLANNER_MODEL: &str = "STEP_REPLAY_PLANNER_MODEL";
pub const ENV_PLANNER_API_KEY: &str = "STEP_REPLAY_PLANNER_API_KEY";
pub const ENV_PLANNER_MAX_RETRIES: &str = "STEP_REPLAY_PLANNER_MAX_RETRIES";
pub const ENV_PLANNER_TIMEOUT_SECS: &str = "STEP_REPLAY_PLANNER_TIMEOUT_SECS";
pub const ENV_STORE_DIR: &str = "STEP_REPLAY_STORE_DIR";
pub const ENV_SESSION_DIR: &str = "STEP_REPLAY_SESSION_DIR";
pub const ENV_TRACE: &str = "STEP_REPLAY_TRACE";

/// Fallback API key variable shared with other OpenAI-compatible tools
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for step-replay
#[derive(Debug, Clone)]
pub struct Config {
    pub run: RunSettings,
    pub capture: CaptureSettings,
    pub planner: PlannerSettings,
    pub paths: PathSettings,
}

/// Execution settings for the engine and scheduler
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Cases per batch
    pub concurrency: usize,
    /// Settle wait after each executed step
    pub settle_timeout: Duration,
    /// Timeout for the initial navigation to the case URL
    pub navigation_timeout: Duration,
    /// Whether each case records a trace artifact
    pub trace: bool,
}

/// Action capture timings
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub dedup_window: Duration,
    pub queue_cap: usize,
}

/// Chat planner settings
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_retries: usize,
    pub request_timeout: Duration,
}

/// Filesystem locations
#[derive(Debug, Clone)]
pub struct PathSettings {
    pub store_dir: String,
    pub session_dir: String,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            run: RunSettings::from_env(),
            capture: CaptureSettings::from_env(),
            planner: PlannerSettings::from_env(),
            paths: PathSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            run: RunSettings::defaults(),
            capture: CaptureSettings::defaults(),
            planner: PlannerSettings::defaults(),
            paths: PathSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl RunSettings {
    pub fn from_env() -> Self {
        Self {
            concurrency: env_parse(ENV_CONCURRENCY)
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_CONCURRENCY),
            settle_timeout: Duration::from_millis(
                env_parse(ENV_SETTLE_TIMEOUT_MS).unwrap_or(DEFAULT_SETTLE_TIMEOUT_MS),
            ),
            navigation_timeout: Duration::from_millis(
                env_parse(ENV_NAV_TIMEOUT_MS).unwrap_or(DEFAULT_NAV_TIMEOUT_MS),
            ),
            trace: env::var(ENV_TRACE)
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
        }
    }

    pub fn defaults() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            settle_timeout: Duration::from_millis(DEFAULT_SETTLE_TIMEOUT_MS),
            navigation_timeout: Duration::from_millis(DEFAULT_NAV_TIMEOUT_MS),
            trace: true,
        }
    }
}

impl CaptureSettings {
    pub fn from_env() -> Self {
        Self {
            poll_interval: Duration::from_millis(
                env_parse(ENV_CAPTURE_POLL_MS).unwrap_or(DEFAULT_CAPTURE_POLL_MS),
            ),
            debounce: Duration::from_millis(
                env_parse(ENV_CAPTURE_DEBOUNCE_MS).unwrap_or(DEFAULT_CAPTURE_DEBOUNCE_MS),
            ),
            dedup_window: Duration::from_millis(
                env_parse(ENV_CAPTURE_DEDUP_MS).unwrap_or(DEFAULT_CAPTURE_DEDUP_MS),
            ),
            queue_cap: env_parse(ENV_CAPTURE_QUEUE_CAP).unwrap_or(DEFAULT_CAPTURE_QUEUE_CAP),
        }
    }

    pub fn defaults() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_CAPTURE_POLL_MS),
            debounce: Duration::from_millis(DEFAULT_CAPTURE_DEBOUNCE_MS),
            dedup_window: Duration::from_millis(DEFAULT_CAPTURE_DEDUP_MS),
            queue_cap: DEFAULT_CAPTURE_QUEUE_CAP,
        }
    }
}

impl PlannerSettings {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_PLANNER_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_PLANNER_ENDPOINT.to_string()),
            model: env::var(ENV_PLANNER_MODEL).unwrap_or_else(|_| DEFAULT_PLANNER_MODEL.to_string()),
            api_key: env::var(ENV_PLANNER_API_KEY)
                .or_else(|_| env::var(ENV_OPENAI_API_KEY))
                .ok()
                .filter(|k| !k.trim().is_empty()),
            max_retries: env_parse(ENV_PLANNER_MAX_RETRIES).unwrap_or(DEFAULT_PLANNER_MAX_RETRIES),
            request_timeout: Duration::from_secs(
                env_parse(ENV_PLANNER_TIMEOUT_SECS).unwrap_or(DEFAULT_PLANNER_TIMEOUT_SECS),
            ),
        }
    }

    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_PLANNER_ENDPOINT.to_string(),
            model: DEFAULT_PLANNER_MODEL.to_string(),
            api_key: None,
            max_retries: DEFAULT_PLANNER_MAX_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_PLANNER_TIMEOUT_SECS),
        }
    }
}

impl PathSettings {
    pub fn from_env() -> Self {
        Self {
            store_dir: env::var(ENV_STORE_DIR).unwrap_or_else(|_| DEFAULT_STORE_DIR.to_string()),
            session_dir: env::var(ENV_SESSION_DIR)
                .unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    pub fn defaults() -> Self {
        Self {
            store_dir: DEFAULT_STORE_DIR.to_string(),
            session_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Parse a boolean-ish flag value ("0", "false", "off", "no" are false)
fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}

/// Get the session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().paths.session_dir.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(" Off "));
        assert!(!parse_flag("false"));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.run.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.run.settle_timeout, Duration::from_millis(3_000));
        assert_eq!(config.capture.poll_interval, Duration::from_millis(300));
        assert_eq!(config.capture.debounce, Duration::from_millis(600));
        assert_eq!(config.capture.dedup_window, Duration::from_millis(500));
        assert_eq!(config.planner.model, DEFAULT_PLANNER_MODEL);
        assert!(config.planner.api_key.is_none());
        assert_eq!(config.paths.session_dir, DEFAULT_SESSION_DIR);
    }
}
