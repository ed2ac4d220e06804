use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

const EXPIRY_MARGIN_SECS: i64 = 300; // refresh when within 5 minutes of expiry

/// Wire shape of a `/oauth2/token` response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

/// A bearer token for the Netatmo API, stamped with its absolute expiry.
///
/// Tokens are immutable values; a refresh replaces the whole token rather
/// than mutating it in place. The `Default` token is the "not authenticated"
/// sentinel: empty credentials with an expiry in the past, so it always
/// reports itself expired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

impl Default for AccessToken {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            refresh_token: String::new(),
            expires_in: 0,
            expires_at: DateTime::UNIX_EPOCH,
        }
    }
}

impl AccessToken {
    /// Build a token expiring `expires_in` seconds from now. A zero or
    /// negative lifetime produces an already-expired token.
    pub fn new(access_token: &str, refresh_token: &str, expires_in: i64) -> Self {
        // Lifetimes beyond the calendar range saturate in the right direction.
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(if expires_in < 0 {
                DateTime::UNIX_EPOCH
            } else {
                DateTime::<Utc>::MAX_UTC
            });

        Self {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the token is within five minutes of its expiry (or past it).
    pub fn expires_soon(&self) -> bool {
        self.expires_soon_at(Utc::now())
    }

    pub fn expires_soon_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

impl From<TokenResponse> for AccessToken {
    fn from(response: TokenResponse) -> Self {
        Self::new(
            &response.access_token,
            &response.refresh_token,
            response.expires_in,
        )
    }
}

/// Shared slot holding the current [`AccessToken`].
///
/// Clones share the same slot, so a refresh performed through one handle is
/// visible through all of them. The slot is replaced wholesale on `set`;
/// there is no notification and no locking beyond the replace itself.
#[derive(Clone, Default)]
pub struct TokenStore {
    slot: Arc<RwLock<AccessToken>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> AccessToken {
        // A write can only replace the token wholesale, so recovering from a
        // poisoned lock still yields a well-formed token.
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, token: AccessToken) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// POST a form-encoded grant request to the token endpoint and turn the
/// response into an [`AccessToken`] stamped with the current time.
pub(crate) async fn request_token(
    http: &reqwest::Client,
    base_url: &str,
    form: &[(&str, &str)],
) -> Result<AccessToken> {
    let response = http
        .post(format!("{}/oauth2/token", base_url))
        .form(form)
        .send()
        .await?;

    let status = response.status();
    let response_text = response.text().await?;

    if status.is_success() {
        let parsed: TokenResponse = serde_json::from_str(&response_text)?;
        debug!("Token endpoint issued a token valid for {}s", parsed.expires_in);
        Ok(AccessToken::from(parsed))
    } else {
        debug!("Token request failed with status: {}", status);
        Err(Error::Auth(format!(
            "token request failed with status {}: {}",
            status, response_text
        )))
    }
}
