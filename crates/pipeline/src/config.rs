use std::time::Duration;

/// Default worker streaming endpoint.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8188";
/// Default worker HTTP endpoint.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";

/// A configuration variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
#[error("{var} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Orchestrator configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// worker on the same machine.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker WebSocket base URL (default: `ws://127.0.0.1:8188`).
    pub ws_url: String,
    /// Worker HTTP base URL (default: `http://127.0.0.1:8188`).
    pub api_url: String,
    /// Bearer token sent to the worker, if any.
    pub auth_token: Option<String>,
    /// Fixed delay between reconnection attempts (default: 5 s).
    pub reconnect_delay: Duration,
    /// Upper bound on concurrently running completion tasks (default: `8`).
    pub max_concurrent_completions: usize,
    /// Evict pending jobs older than this. `None` disables eviction.
    pub pending_job_ttl: Option<Duration>,
    /// How long `stop()` waits for background tasks (default: 5 s).
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            api_url: DEFAULT_API_URL.into(),
            auth_token: None,
            reconnect_delay: Duration::from_secs(5),
            max_concurrent_completions: 8,
            pending_job_ttl: None,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                 |
    /// |------------------------------|-------------------------|
    /// | `COMFYUI_WS_URL`             | `ws://127.0.0.1:8188`   |
    /// | `COMFYUI_API_URL`            | `http://127.0.0.1:8188` |
    /// | `COMFYUI_AUTH_TOKEN`         | unset                   |
    /// | `RECONNECT_DELAY_SECS`       | `5`                     |
    /// | `MAX_CONCURRENT_COMPLETIONS` | `8`                     |
    /// | `PENDING_JOB_TTL_SECS`       | unset (no eviction)     |
    /// | `SHUTDOWN_TIMEOUT_SECS`      | `5`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let ws_url = var("COMFYUI_WS_URL").unwrap_or(defaults.ws_url);
        let api_url = var("COMFYUI_API_URL").unwrap_or(defaults.api_url);
        let auth_token = var("COMFYUI_AUTH_TOKEN");

        let reconnect_delay = match var("RECONNECT_DELAY_SECS") {
            Some(raw) => Duration::from_secs(parse_u64("RECONNECT_DELAY_SECS", &raw)?),
            None => defaults.reconnect_delay,
        };

        let max_concurrent_completions = match var("MAX_CONCURRENT_COMPLETIONS") {
            Some(raw) => parse_positive("MAX_CONCURRENT_COMPLETIONS", &raw)? as usize,
            None => defaults.max_concurrent_completions,
        };

        let pending_job_ttl = var("PENDING_JOB_TTL_SECS")
            .map(|raw| parse_positive("PENDING_JOB_TTL_SECS", &raw).map(Duration::from_secs))
            .transpose()?;

        let shutdown_timeout = match var("SHUTDOWN_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_u64("SHUTDOWN_TIMEOUT_SECS", &raw)?),
            None => defaults.shutdown_timeout,
        };

        Ok(Self {
            ws_url,
            api_url,
            auth_token,
            reconnect_delay,
            max_concurrent_completions,
            pending_job_ttl,
            shutdown_timeout,
        })
    }
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse_u64(var, raw)? {
        0 => Err(ConfigError {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".into(),
        }),
        n => Ok(n),
    }
}
