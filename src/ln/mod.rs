//! Lightning payment backends.
//!
//! Backends only pay; authorization happened before the call. The sender
//! pubkey travels along because the hosted backend resolves the paying
//! wallet account from the app that owns it.

use async_trait::async_trait;
use thiserror::Error;

mod alby;
mod lnd;

pub use alby::{AlbyClient, AlbyMe};
pub use lnd::LndClient;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("backend authentication failed: {0}")]
    AuthFailed(String),
    #[error("upstream rejected payment ({status}): {message}")]
    Upstream { status: u16, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid invoice: {0}")]
    BadInvoice(String),
}

#[async_trait]
pub trait LnClient: Send + Sync {
    /// Pay a BOLT-11 invoice, returning the lowercase hex preimage.
    async fn send_payment(
        &self,
        sender_pubkey: &str,
        invoice: &str,
    ) -> Result<String, PaymentError>;
}
