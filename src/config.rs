//! Daemon configuration - read from environment variables at startup.

use anyhow::bail;

pub const DEFAULT_RELAY: &str = "wss://relay.getalby.com/v1";
pub const DEFAULT_ALBY_API_URL: &str = "https://api.getalby.com";
pub const DEFAULT_OAUTH_AUTH_URL: &str = "https://getalby.com/oauth";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://api.getalby.com/oauth/token";
pub const DEFAULT_DATABASE_URI: &str = "nwcd.db";

/// Which Lightning backend pays invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted Alby wallet API, OAuth2-authenticated.
    Alby,
    /// Self-hosted LND node over gRPC.
    Lnd,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Alby => "ALBY",
            BackendKind::Lnd => "LND",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ALBY" => Some(BackendKind::Alby),
            "LND" => Some(BackendKind::Lnd),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Bridge signing key (hex). Generated and persisted when absent in LND mode.
    pub nostr_secret_key: Option<String>,
    /// Optional allow-listed client pubkey; restricts the subscription filter.
    pub client_pubkey: Option<String>,
    pub relay: String,
    pub backend: BackendKind,
    pub lnd_address: String,
    pub lnd_cert_file: String,
    pub lnd_macaroon_file: String,
    pub alby_api_url: String,
    pub alby_client_id: String,
    pub alby_client_secret: String,
    pub oauth_redirect_url: String,
    pub oauth_auth_url: String,
    pub oauth_token_url: String,
    pub database_uri: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend_raw = env_or_default("LN_BACKEND_TYPE", BackendKind::Alby.as_str());
        let Some(backend) = BackendKind::from_str(&backend_raw) else {
            bail!("LN_BACKEND_TYPE must be ALBY or LND, got {backend_raw}");
        };

        Ok(Self {
            nostr_secret_key: env_optional("NOSTR_PRIVKEY"),
            client_pubkey: env_optional("CLIENT_NOSTR_PUBKEY"),
            relay: env_or_default("RELAY", DEFAULT_RELAY),
            backend,
            lnd_address: env_or_default("LND_ADDRESS", ""),
            lnd_cert_file: env_or_default("LND_CERT_FILE", ""),
            lnd_macaroon_file: env_or_default("LND_MACAROON_FILE", ""),
            alby_api_url: env_or_default("ALBY_API_URL", DEFAULT_ALBY_API_URL),
            alby_client_id: env_or_default("ALBY_CLIENT_ID", ""),
            alby_client_secret: env_or_default("ALBY_CLIENT_SECRET", ""),
            oauth_redirect_url: env_or_default("OAUTH_REDIRECT_URL", ""),
            oauth_auth_url: env_or_default("OAUTH_AUTH_URL", DEFAULT_OAUTH_AUTH_URL),
            oauth_token_url: env_or_default("OAUTH_TOKEN_URL", DEFAULT_OAUTH_TOKEN_URL),
            database_uri: env_or_default("DATABASE_URI", DEFAULT_DATABASE_URI),
        })
    }
}

/// Load a .env file into the process environment. Existing variables win.
pub fn load_dotenv() {
    if let Ok(contents) = std::fs::read_to_string(".env") {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"');
                if !value.is_empty() && std::env::var(key.trim()).is_err() {
                    std::env::set_var(key.trim(), value);
                }
            }
        }
    }
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_roundtrip() {
        assert_eq!(BackendKind::from_str("lnd"), Some(BackendKind::Lnd));
        assert_eq!(BackendKind::from_str(" ALBY "), Some(BackendKind::Alby));
        assert_eq!(BackendKind::from_str("eclair"), None);
        assert_eq!(BackendKind::Lnd.as_str(), "LND");
    }
}
