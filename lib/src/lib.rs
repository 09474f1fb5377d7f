//! Wallabag API bindings for Rust
//! Provides OAuth2 password-grant token management and entry creation

use std::fmt;
use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

/// Tokens are refreshed this long before the server says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Error, Debug)]
pub enum WallabagError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Token request rejected ({status}): {body}")]
    Token { status: u16, body: String },
    #[error("Access token rejected")]
    Unauthorized,
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Server error: {status}")]
    Server { status: u16 },
    #[error("Entry rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

impl WallabagError {
    /// Whether repeating the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WallabagError::Request(e) => !e.is_decode() && !e.is_builder(),
            WallabagError::Token { status, .. } => *status >= 500,
            WallabagError::Unauthorized
            | WallabagError::RateLimited { .. }
            | WallabagError::Server { .. } => true,
            WallabagError::Rejected { .. } => false,
        }
    }
}

/// OAuth2 client and user credentials for the password grant.
#[derive(Clone)]
pub struct Credentials {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An article to save.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub url: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

/// An entry as returned by the API after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CreateEntryPayload<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<String>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

pub struct WallabagClient {
    url: String,
    credentials: Credentials,
    client: Client,
    token: Mutex<Option<CachedToken>>,
}

impl WallabagClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, WallabagError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("feedbag/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            url: credentials.base_url.trim_end_matches('/').to_string(),
            credentials,
            client,
            token: Mutex::new(None),
        })
    }

    /// Return a valid access token, requesting a new one when the cached
    /// token is missing or about to expire
    pub async fn access_token(&self) -> Result<String, WallabagError> {
        // Held across the request so concurrent callers share one refresh.
        let mut cached = self.token.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Forget the cached token so the next call requests a fresh one
    pub async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    async fn request_token(&self) -> Result<CachedToken, WallabagError> {
        let form = TokenRequest {
            grant_type: "password",
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
            username: &self.credentials.username,
            password: &self.credentials.password,
        };

        let response = self
            .client
            .post(format!("{}/oauth/v2/token", self.url))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WallabagError::Token {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS));

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        })
    }

    /// Save a new entry
    pub async fn create_entry(&self, entry: &NewEntry) -> Result<Entry, WallabagError> {
        let token = self.access_token().await?;

        let payload = CreateEntryPayload {
            url: &entry.url,
            title: entry.title.as_deref().filter(|t| !t.is_empty()),
            tags: (!entry.tags.is_empty()).then(|| entry.tags.join(",")),
        };

        let response = self
            .client
            .post(format!("{}/api/entries.json", self.url))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(WallabagError::Unauthorized);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(WallabagError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Err(WallabagError::Server {
                status: status.as_u16(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WallabagError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}
