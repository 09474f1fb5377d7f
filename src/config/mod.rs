pub mod feeds;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::DEFAULT_FIRST_SIGHT_ITEMS;
use crate::errors::{FeedbagError, FeedbagResult};
use crate::services::{RetryPolicy, DEFAULT_CONCURRENCY};

pub use feeds::{load_feeds, parse_feeds};

const DEFAULT_WALLABAG_URL: &str = "http://wallabag";
const DEFAULT_INTERVAL_MINUTES: u64 = 30;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

const CREDENTIAL_VARS: [&str; 4] = [
    "WALLABAG_CLIENT_ID",
    "WALLABAG_CLIENT_SECRET",
    "WALLABAG_USERNAME",
    "WALLABAG_PASSWORD",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub wallabag_url: String,
    pub wallabag_client_id: Option<String>,
    pub wallabag_client_secret: Option<String>,
    pub wallabag_username: Option<String>,
    pub wallabag_password: Option<String>,
    pub feeds_file: PathBuf,
    pub seen_file: PathBuf,
    pub interval: Duration,
    pub default_fetch_count: usize,
    pub delivery_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub feed_concurrency: usize,
    pub http_timeout: Duration,
    pub medium_mirror_url: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Get the directory where the executable is located
    fn exe_dir() -> Option<PathBuf> {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    pub fn from_env() -> FeedbagResult<Self> {
        let exe_dir = Self::exe_dir();

        // Try to load .env from executable's directory first
        if let Some(ref dir) = exe_dir {
            let env_path = dir.join(".env");
            if env_path.exists() {
                dotenvy::from_path(&env_path).ok();
            }
        }
        // Fall back to current directory
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok(), exe_dir)
    }

    /// Build the configuration from an arbitrary variable source.
    /// Relative default file locations resolve against `base_dir`.
    pub fn from_lookup<F>(lookup: F, base_dir: Option<PathBuf>) -> FeedbagResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let default_path = |file: &str| {
            base_dir
                .as_ref()
                .map(|d| d.join(file))
                .unwrap_or_else(|| PathBuf::from(file))
        };

        let interval_minutes: u64 = parse_var(&get, "INTERVAL_MINUTES", DEFAULT_INTERVAL_MINUTES)?;
        if interval_minutes == 0 {
            return Err(FeedbagError::Config(
                "INTERVAL_MINUTES must be at least 1".to_string(),
            ));
        }

        let retry_defaults = RetryPolicy::default();
        let delivery_max_attempts: u32 =
            parse_var(&get, "DELIVERY_MAX_ATTEMPTS", retry_defaults.max_attempts)?;
        if delivery_max_attempts == 0 {
            return Err(FeedbagError::Config(
                "DELIVERY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let feed_concurrency: usize =
            parse_var(&get, "FEED_CONCURRENCY", DEFAULT_CONCURRENCY)?;
        if feed_concurrency == 0 {
            return Err(FeedbagError::Config(
                "FEED_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            wallabag_url: get("WALLABAG_URL").unwrap_or_else(|| DEFAULT_WALLABAG_URL.to_string()),
            wallabag_client_id: get("WALLABAG_CLIENT_ID"),
            wallabag_client_secret: get("WALLABAG_CLIENT_SECRET"),
            wallabag_username: get("WALLABAG_USERNAME"),
            wallabag_password: get("WALLABAG_PASSWORD"),
            feeds_file: get("FEEDS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_path("feeds.json")),
            seen_file: get("SEEN_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| default_path("seen_items.json")),
            interval: Duration::from_secs(interval_minutes * 60),
            default_fetch_count: parse_var(&get, "DEFAULT_FETCH_COUNT", DEFAULT_FIRST_SIGHT_ITEMS)?,
            delivery_max_attempts,
            retry_base_delay: Duration::from_millis(parse_var(
                &get,
                "DELIVERY_RETRY_BASE_MS",
                retry_defaults.base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_secs(parse_var(
                &get,
                "DELIVERY_RETRY_MAX_SECS",
                retry_defaults.max_delay.as_secs(),
            )?),
            feed_concurrency,
            http_timeout: Duration::from_secs(parse_var(
                &get,
                "HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )?),
            medium_mirror_url: get("MEDIUM_MIRROR_URL"),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Credentials for the Wallabag API; every missing variable is named.
    pub fn wallabag_credentials(&self) -> FeedbagResult<wallabag::Credentials> {
        let values = [
            &self.wallabag_client_id,
            &self.wallabag_client_secret,
            &self.wallabag_username,
            &self.wallabag_password,
        ];

        let missing: Vec<&str> = CREDENTIAL_VARS
            .iter()
            .zip(values.iter())
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(FeedbagError::MissingEnvVar(missing.join(", ")));
        }

        Ok(wallabag::Credentials {
            base_url: self.wallabag_url.clone(),
            client_id: self.wallabag_client_id.clone().unwrap_or_default(),
            client_secret: self.wallabag_client_secret.clone().unwrap_or_default(),
            username: self.wallabag_username.clone().unwrap_or_default(),
            password: self.wallabag_password.clone().unwrap_or_default(),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery_max_attempts,
            self.retry_base_delay,
            self.retry_max_delay,
        )
    }
}

fn parse_var<T, G>(get: &G, key: &str, default: T) -> FeedbagResult<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| {
            FeedbagError::Config(format!("{} must be a non-negative number, got '{}'", key, raw))
        }),
        None => Ok(default),
    }
}
