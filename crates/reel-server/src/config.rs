use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use anyhow::{Result, bail};
use tracing::info;

/// Secrets that must never ship as real values.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Process-wide configuration, read from the environment once at startup
/// and passed explicitly into every component that needs it.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub access_token_secret: String,
    pub refresh_token_secret: String,
    pub access_ttl_mins: i64,
    pub refresh_ttl_days: i64,
    pub media_base_url: String,
    pub media_api_key: String,
    pub staging_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            host: try_load("REEL_HOST", "0.0.0.0")?,
            port: try_load("REEL_PORT", "3000")?,
            db_path: env::var("REEL_DB_PATH")
                .unwrap_or_else(|_| "reel.db".into())
                .into(),
            access_token_secret: require_secret("REEL_ACCESS_TOKEN_SECRET")?,
            refresh_token_secret: require_secret("REEL_REFRESH_TOKEN_SECRET")?,
            access_ttl_mins: try_load("REEL_ACCESS_TTL_MINS", "15")?,
            refresh_ttl_days: try_load("REEL_REFRESH_TTL_DAYS", "7")?,
            media_base_url: env::var("REEL_MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".into()),
            media_api_key: require_secret("REEL_MEDIA_API_KEY")?,
            staging_dir: env::var("REEL_STAGING_DIR")
                .unwrap_or_else(|_| "./media-staging".into())
                .into(),
        })
    }
}

fn require_secret(key: &str) -> Result<String> {
    let value = env::var(key).unwrap_or_default();
    if value.is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        bail!("{key} is unset or still a placeholder; set it in your .env and restart");
    }
    Ok(value)
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid {key} value '{raw}': {e}"))
}
