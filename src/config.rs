use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::errors::AppError;

const DEFAULT_API_URL: &str = "http://localhost:8888/api/";

/// Reconnect behaviour of a single event stream.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Retries after the first attempt.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Budget for receiving response headers.
    pub connect_timeout: Duration,
    /// Longest allowed server silence between body chunks.
    pub idle_timeout: Option<Duration>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(120)),
        }
    }
}

impl ReconnectPolicy {
    /// `attempt` is 1-based (attempt=1 => base_delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        self.base_delay.mul_f64(1.5f64.powi(exp))
    }
}

/// Whole-turn retry, layered above the reader's reconnects.
#[derive(Debug, Clone, Copy)]
pub struct TurnRetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for TurnRetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_millis(1000) }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub reconnect: ReconnectPolicy,
    pub turn_retry: TurnRetryPolicy,
    pub document_timeout: Duration,
    pub download_dir: PathBuf,
    pub settings_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(api_url: &str) -> Result<Self, AppError> {
        Ok(Self {
            api_url: normalize_base_url(api_url)?,
            reconnect: ReconnectPolicy::default(),
            turn_retry: TurnRetryPolicy::default(),
            document_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("."),
            settings_path: None,
        })
    }

    pub fn from_env() -> Result<Self, AppError> {
        let api_url =
            std::env::var("RESEARCH_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&api_url)?;

        let reconnect = &mut config.reconnect;
        reconnect.max_attempts = env_u64("RESEARCH_MAX_RECONNECTS", 3).clamp(0, 20) as u32;
        reconnect.base_delay = env_millis("RESEARCH_RECONNECT_DELAY_MS", 1000);
        reconnect.connect_timeout = env_millis("RESEARCH_CONNECT_TIMEOUT_MS", 30_000);
        reconnect.idle_timeout = match env_u64("RESEARCH_IDLE_TIMEOUT_MS", 120_000) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        config.turn_retry.max_attempts = env_u64("RESEARCH_TURN_ATTEMPTS", 3).clamp(1, 10) as u32;
        config.turn_retry.delay = env_millis("RESEARCH_TURN_RETRY_DELAY_MS", 1000);
        config.document_timeout = env_millis("RESEARCH_DOCUMENT_TIMEOUT_MS", 30_000);

        if let Ok(dir) = std::env::var("RESEARCH_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        config.settings_path = std::env::var("RESEARCH_SETTINGS_PATH").ok().map(PathBuf::from);

        Ok(config)
    }

    /// Resolves a backend path such as `chat/stream` against the API base.
    pub fn service_url(&self, path: &str) -> Result<Url, AppError> {
        self.api_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Unexpected(format!("Invalid service path '{path}': {e}")))
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, AppError> {
    let mut base = raw.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base).map_err(|e| AppError::Unexpected(format!("Invalid API url '{raw}': {e}")))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(key, default_ms))
}
