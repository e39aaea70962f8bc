//! Self-hosted LND backend over gRPC (TLS + macaroon).

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tonic_lnd::lnrpc::{GetInfoRequest, SendRequest};
use tracing::info;

use super::{LnClient, PaymentError};

pub struct LndClient {
    client: Mutex<tonic_lnd::Client>,
}

impl LndClient {
    /// Connect and probe the node with GetInfo so a misconfigured macaroon
    /// or cert fails at startup, not on the first payment.
    pub async fn connect(
        address: String,
        cert_file: String,
        macaroon_file: String,
    ) -> anyhow::Result<Self> {
        let mut client = tonic_lnd::connect(address, cert_file, macaroon_file)
            .await
            .context("Failed to connect to LND")?;
        let response = client
            .lightning()
            .get_info(GetInfoRequest {})
            .await
            .context("LND GetInfo failed")?;
        info!(alias = %response.get_ref().alias, "Connected to LND");
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl LnClient for LndClient {
    async fn send_payment(
        &self,
        _sender_pubkey: &str,
        invoice: &str,
    ) -> Result<String, PaymentError> {
        let mut client = self.client.lock().await;
        let response = client
            .lightning()
            .send_payment_sync(SendRequest {
                payment_request: invoice.to_string(),
                ..Default::default()
            })
            .await
            .map_err(|status| match status.code() {
                tonic_lnd::tonic::Code::Unauthenticated => {
                    PaymentError::AuthFailed(status.message().to_string())
                }
                _ => PaymentError::Transport(status.to_string()),
            })?
            .into_inner();

        // SendPaymentSync reports route failures in-band with an OK status.
        if !response.payment_error.is_empty() {
            return Err(PaymentError::Upstream {
                status: 0,
                message: response.payment_error,
            });
        }
        if response.payment_preimage.is_empty() {
            return Err(PaymentError::Upstream {
                status: 0,
                message: "payment returned no preimage".to_string(),
            });
        }
        Ok(hex::encode(response.payment_preimage))
    }
}
