//! NIP-47 "wallet connect" protocol types.
//!
//! Kind 13194 announces capabilities, 23194 carries encrypted requests,
//! 23195 carries encrypted responses. The JSON envelope inside the content
//! holds either a result or an error, never both.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INFO_EVENT_KIND: u16 = 13194;
pub const REQUEST_KIND: u16 = 23194;
pub const RESPONSE_KIND: u16 = 23195;

pub const PAY_INVOICE_METHOD: &str = "pay_invoice";
/// Comma-separated list of supported methods, published in the info event.
pub const CAPABILITIES: &str = "pay_invoice";

pub const ERROR_INTERNAL: &str = "INTERNAL";
pub const ERROR_NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";
pub const ERROR_QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
pub const ERROR_INSUFFICIENT_BALANCE: &str = "INSUFFICIENT_BALANCE";
pub const ERROR_UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const ERROR_EXPIRED: &str = "EXPIRED";
pub const ERROR_RESTRICTED: &str = "RESTRICTED";

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayParams {
    pub invoice: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayResult {
    pub preimage: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn result(result_type: &str, result: Value) -> Self {
        Self {
            result_type: Some(result_type.to_string()),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self {
            result_type: None,
            result: None,
            error: Some(ErrorBody {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

/// Pre-envelope clients sent the bare BOLT-11 string as content.
pub fn is_legacy_invoice(payload: &str) -> bool {
    payload.starts_with("ln")
}

/// The connection string handed to a client at pairing time. The secret is
/// the pairing private key; it is rendered once and never stored.
pub fn pairing_uri(
    bridge_pubkey_hex: &str,
    relay_url: &str,
    secret_hex: &str,
    lud16: Option<&str>,
) -> String {
    let mut uri =
        format!("nostr+walletconnect://{bridge_pubkey_hex}?relay={relay_url}&secret={secret_hex}");
    if let Some(address) = lud16 {
        uri.push_str("&lud16=");
        uri.push_str(address);
    }
    uri
}
