use anyhow::{Context, Result};
use std::env;
use url::Url;

const DEFAULT_API_BASE: &str = "https://api.mail.tm";

/// Application-wide defaults. These can be overridden by env vars but do not
/// require any user-authored config files.
#[derive(Debug, Clone)]
pub struct AppDefaults {
    pub api_base: Url,
    pub min_request_delay_ms: u64,
    pub max_retries: u32,
    pub poll_interval_secs: u64,
}

impl AppDefaults {
    pub fn load() -> Result<Self> {
        let api_base = env::var("BURNER_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_base = Url::parse(&api_base)
            .with_context(|| format!("invalid BURNER_API_BASE: {api_base}"))?;

        let min_request_delay_ms = env::var("BURNER_MIN_REQUEST_DELAY_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1000);
        let max_retries = env::var("BURNER_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(3);
        let poll_interval_secs = env::var("BURNER_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(5);

        Ok(Self {
            api_base,
            min_request_delay_ms,
            max_retries,
            poll_interval_secs,
        })
    }
}
