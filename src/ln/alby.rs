//! Hosted Alby wallet backend, OAuth2-authenticated HTTPS.
//!
//! Every payment resolves the owning app and user from the store, refreshes
//! the user's access token when it is about to lapse, and persists the
//! refreshed triple so the next payment starts from current credentials.

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{error, info};

use super::{LnClient, PaymentError};
use crate::config::Config;
use crate::db::{self, Db, User};

const USER_AGENT: &str = "NWC";
/// Refresh slightly early so a token never expires mid-request.
const TOKEN_LEEWAY_SECONDS: i64 = 60;

pub struct AlbyClient {
    api_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
    db: Db,
}

#[derive(Serialize)]
struct PayRequest<'a> {
    invoice: &'a str,
}

#[derive(Deserialize)]
struct PayResponse {
    payment_preimage: String,
    #[allow(dead_code)]
    payment_hash: String,
}

#[derive(Deserialize)]
struct UpstreamError {
    #[allow(dead_code)]
    error: bool,
    #[allow(dead_code)]
    code: i32,
    message: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Account info from `GET /user/me`, consumed by the admin OAuth callback.
#[derive(Debug, Clone, Deserialize)]
pub struct AlbyMe {
    pub identifier: String,
    #[serde(default)]
    pub lightning_address: String,
    #[serde(default)]
    pub email: String,
}

impl AlbyClient {
    pub fn new(config: &Config, db: Db) -> Result<Self, PaymentError> {
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(15))
            .build()
            .map_err(|e| PaymentError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_url: config.alby_api_url.trim_end_matches('/').to_string(),
            token_url: config.oauth_token_url.clone(),
            client_id: config.alby_client_id.clone(),
            client_secret: config.alby_client_secret.clone(),
            http,
            db,
        })
    }

    /// Return a usable access token for the user, refreshing and persisting
    /// when the stored one is expired or about to be.
    async fn fresh_access_token(&self, user: &User) -> Result<String, PaymentError> {
        let still_valid = match user.expiry {
            Some(expiry) => expiry - Duration::seconds(TOKEN_LEEWAY_SECONDS) > db::now(),
            None => false,
        };
        if still_valid && !user.access_token.is_empty() {
            return Ok(user.access_token.clone());
        }

        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", user.refresh_token.as_str()),
        ];
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PaymentError::AuthFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::AuthFailed(format!("invalid token response: {e}")))?;

        let expiry = token.expires_in.map(|s| db::now() + Duration::seconds(s));
        self.db
            .update_oauth_tokens(user.id, &token.access_token, &token.refresh_token, expiry)
            .await
            .map_err(|e| {
                PaymentError::Transport(format!("failed to persist refreshed tokens: {e}"))
            })?;
        Ok(token.access_token)
    }

    pub async fn get_me(&self, access_token: &str) -> Result<AlbyMe, PaymentError> {
        let response = self
            .http
            .get(format!("{}/user/me", self.api_url))
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| PaymentError::Transport(format!("GET /user/me failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PaymentError::AuthFailed(format!(
                "GET /user/me returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| PaymentError::Transport(format!("invalid /user/me response: {e}")))
    }
}

#[async_trait]
impl LnClient for AlbyClient {
    async fn send_payment(
        &self,
        sender_pubkey: &str,
        invoice: &str,
    ) -> Result<String, PaymentError> {
        let Some((app, user)) = self
            .db
            .get_app_by_pubkey(sender_pubkey)
            .await
            .map_err(|e| PaymentError::Transport(format!("app lookup failed: {e}")))?
        else {
            return Err(PaymentError::AuthFailed(format!(
                "no app registered for pubkey {sender_pubkey}"
            )));
        };

        let access_token = self.fresh_access_token(&user).await?;

        let response = self
            .http
            .post(format!("{}/payments/bolt11", self.api_url))
            .bearer_auth(access_token)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .json(&PayRequest { invoice })
            .send()
            .await
            .map_err(|e| PaymentError::Transport(format!("payment request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() < 300 {
            let payload: PayResponse = response.json().await.map_err(|e| {
                PaymentError::Transport(format!("invalid payment response: {e}"))
            })?;
            info!(app_id = app.id, user_id = user.id, "Payment successful");
            Ok(payload.payment_preimage)
        } else {
            let message = match response.json::<UpstreamError>().await {
                Ok(upstream) => upstream.message,
                Err(_) => status.to_string(),
            };
            error!(app_id = app.id, user_id = user.id, status = status.as_u16(), %message, "Payment failed");
            Err(PaymentError::Upstream {
                status: status.as_u16(),
                message,
            })
        }
    }
}
