//! OAuth access tokens for Google APIs.
//!
//! Two sources are supported: a static token from configuration, or a service account key.
//! For service accounts we sign a short-lived RS256 assertion and exchange it at the key's
//! `token_uri` (the OAuth 2.0 JWT bearer grant), caching the resulting token until shortly
//! before it expires.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Result, StorageError};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Lifetime requested for each assertion. Google rejects anything above one hour.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Tokens are refreshed this long before Google says they expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// The subset of a Google service account JSON key we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("cannot read service account key {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| StorageError::Config(format!("invalid service account key {}: {e}", path.display())))
    }
}

/// Claims of the signed assertion sent to the token endpoint
#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: DateTime<Utc>,
}

/// Where bearer tokens for Drive calls come from
pub enum AccessTokenSource {
    Static(String),
    ServiceAccount(ServiceAccountTokenSource),
}

impl AccessTokenSource {
    pub async fn token(&self) -> Result<String> {
        match self {
            AccessTokenSource::Static(token) => Ok(token.clone()),
            AccessTokenSource::ServiceAccount(source) => source.token().await,
        }
    }
}

/// Mints access tokens from a service account key.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    scope: String,
    http: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, scopes: &[String], http: reqwest::Client) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| StorageError::Config(format!("service account private key is not a valid RSA key: {e}")))?;

        Ok(Self {
            key,
            encoding_key,
            scope: scopes.join(" "),
            http,
            cached: Mutex::new(None),
        })
    }

    /// Return a valid access token, exchanging a fresh assertion if the cached one is stale.
    ///
    /// The lock is held across the exchange so concurrent uploads trigger a single refresh.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && Utc::now() < token.refresh_at
        {
            return Ok(token.value.clone());
        }

        let fresh = self.exchange().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.key.client_email.clone(),
            scope: self.scope.clone(),
            aud: self.key.token_uri.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        encode(&header, &claims, &self.encoding_key).map_err(|e| StorageError::Auth(format!("sign assertion: {e}")))
    }

    async fn exchange(&self) -> Result<CachedToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &assertion)
            .finish();

        tracing::debug!(client_email = %self.key.client_email, "Exchanging service account assertion for access token");

        let response = self
            .http
            .post(&self.key.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&text) {
                Ok(err) => err.error_description.unwrap_or(err.error),
                Err(_) => text,
            };
            return Err(StorageError::Auth(format!("token endpoint returned {status}: {reason}")));
        }

        let token: TokenResponse =
            serde_json::from_str(&text).map_err(|e| StorageError::Auth(format!("unreadable token response: {e}")))?;

        let lifetime = (token.expires_in - EXPIRY_MARGIN_SECS).max(0);

        Ok(CachedToken {
            value: token.access_token,
            refresh_at: now + Duration::seconds(lifetime),
        })
    }
}
