use log::{debug, error, warn};
use serde_json::Value;
use std::collections::HashMap;

use crate::auth::{self, AccessToken, TokenStore};
use crate::error::{Error, Result};
use crate::models::{MeasurePoint, MeasureRequest, MeasureResponse, MeasureType};

const DEFAULT_BASE_URL: &str = "https://api.netatmo.com";

/// Async client for the Netatmo weather-station API.
///
/// The client is cheap to clone: clones share the underlying HTTP connection
/// pool and the token slot, so a token obtained through one handle is used
/// by all of them. Every call issues at most one HTTP request; there are no
/// retries and no client-side timeouts.
#[derive(Clone)]
pub struct NetatmoClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    tokens: TokenStore,
}

impl NetatmoClient {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::new_with_base_url(client_id, client_secret, DEFAULT_BASE_URL.to_string())
    }

    // Test-specific constructor for custom base URLs
    pub fn new_with_base_url(client_id: &str, client_secret: &str, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            tokens: TokenStore::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The currently stored token. Before authentication this is the
    /// expired sentinel.
    pub fn access_token(&self) -> AccessToken {
        self.tokens.get()
    }

    /// Replace the stored token, e.g. with one restored from disk.
    pub fn set_access_token(&self, token: AccessToken) {
        self.tokens.set(token);
    }

    /// Perform a password-grant login and store the resulting token.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AccessToken> {
        debug!("Authenticating user: {}", username);

        let form = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", username),
            ("password", password),
            ("scope", "read_station"),
        ];

        let token = auth::request_token(&self.http, &self.base_url, &form).await?;
        self.tokens.set(token.clone());

        debug!("Authentication successful");
        Ok(token)
    }

    /// Trade the stored refresh token for a fresh access token and store it.
    pub async fn refresh_token(&self) -> Result<AccessToken> {
        let current = self.tokens.get();
        if current.refresh_token.is_empty() {
            return Err(Error::Auth(
                "no refresh token available; call authenticate() first".to_string(),
            ));
        }

        debug!("Refreshing access token");

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let token = auth::request_token(&self.http, &self.base_url, &form).await?;
        self.tokens.set(token.clone());

        debug!("Token refresh successful");
        Ok(token)
    }

    /// Fetch station metadata for the account.
    ///
    /// The payload is returned as parsed JSON without any typed mapping;
    /// the interesting parts live under `body.devices`.
    ///
    /// If the stored token expires within five minutes a refresh is started
    /// in the background and this request proceeds with the current token,
    /// so the request may still be answered under the old token. Callers
    /// that need a guaranteed-fresh token should await [`refresh_token`]
    /// themselves first.
    ///
    /// [`refresh_token`]: NetatmoClient::refresh_token
    pub async fn get_stations_data(&self) -> Result<Value> {
        let token = self.token_for_request()?;

        debug!("Fetching station data");

        let url = format!("{}/api/getstationsdata", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if status.is_success() {
            match serde_json::from_str::<Value>(&response_text) {
                Ok(stations) => Ok(stations),
                Err(e) => {
                    error!("Failed to parse station data response: {}", e);
                    Err(Error::Json(e))
                }
            }
        } else {
            error!("Failed to fetch station data: {}", response_text);
            Err(Error::Api(format!(
                "getstationsdata failed with status {}: {}",
                status, response_text
            )))
        }
    }

    /// Fetch a measurement series for each requested type.
    ///
    /// The server returns one row of values per timestamp; the result is
    /// reshaped into one ascending-time series per type, aligned by index.
    /// The same proactive-refresh race described on [`get_stations_data`]
    /// applies here.
    ///
    /// [`get_stations_data`]: NetatmoClient::get_stations_data
    pub async fn get_measure(
        &self,
        request: &MeasureRequest,
    ) -> Result<HashMap<MeasureType, Vec<MeasurePoint>>> {
        let token = self.token_for_request()?;

        debug!(
            "Fetching {} measurements for device {}",
            request.scale, request.device_id
        );

        let mut query: Vec<(&str, String)> = vec![
            ("access_token", token.access_token.clone()),
            ("device_id", request.device_id.clone()),
            ("scale", request.scale.to_string()),
            ("type", request.types_param()),
            ("optimize", "false".to_string()),
            ("limit", request.limit.to_string()),
        ];
        if let Some(module_id) = &request.module_id {
            query.push(("module_id", module_id.clone()));
        }
        if let Some(begin) = request.date_begin {
            query.push(("date_begin", begin.timestamp().to_string()));
        }
        if let Some(end) = request.date_end {
            query.push(("date_end", end.timestamp().to_string()));
        }

        let url = format!("{}/api/getmeasure", self.base_url);
        let response = self.http.get(&url).query(&query).send().await?;

        let status = response.status();
        let response_text = response.text().await?;

        if status.is_success() {
            match serde_json::from_str::<MeasureResponse>(&response_text) {
                Ok(measures) => measures.into_series(&request.types),
                Err(e) => {
                    error!("Failed to parse measure response: {}", e);
                    Err(Error::Json(e))
                }
            }
        } else {
            error!("Failed to fetch measurements: {}", response_text);
            Err(Error::Api(format!(
                "getmeasure failed with status {}: {}",
                status, response_text
            )))
        }
    }

    /// Gate a data call on the stored token.
    ///
    /// An expired token fails the call outright, before any network I/O.
    /// A token inside the five-minute expiry margin triggers a
    /// fire-and-forget refresh while the call proceeds with the token it
    /// already has.
    fn token_for_request(&self) -> Result<AccessToken> {
        let token = self.tokens.get();

        if token.is_expired() {
            return Err(Error::TokenExpired);
        }

        if token.expires_soon() {
            debug!("Access token expires soon, starting background refresh");
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(e) = client.refresh_token().await {
                    warn!("Background token refresh failed: {}", e);
                }
            });
        }

        Ok(token)
    }
}
