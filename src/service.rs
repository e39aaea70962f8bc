//! The bridge service: one inbound event end-to-end, and the subscription
//! loop that feeds it.
//!
//! The loop multiplexes relay frames and dispatches each request event into
//! its own task, so a slow backend never blocks the socket. Replies are
//! published best-effort and recorded as `replied` once the publish call
//! returns.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use lightning_invoice::Bolt11Invoice;
use nostr::{Event, Tag};
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::crypto;
use crate::db::{Db, EventState};
use crate::identity::Identity;
use crate::ln::LnClient;
use crate::nip47;
use crate::policy::{self, BudgetRenewal};
use crate::relay::{RelayClient, RelayMessage, SubscriptionFilter};

const SUBSCRIPTION_ID: &str = "nwc";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Why the subscription loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Process shutdown was requested; do not reconnect.
    Shutdown,
    /// The relay transport died; reconnect and resume.
    Disconnected,
}

pub struct Service {
    pub config: Config,
    pub db: Db,
    pub identity: Identity,
    pub ln: Arc<dyn LnClient>,
    received_eos: AtomicBool,
}

impl Service {
    pub fn new(config: Config, db: Db, identity: Identity, ln: Arc<dyn LnClient>) -> Self {
        Self {
            config,
            db,
            identity,
            ln,
            received_eos: AtomicBool::new(false),
        }
    }

    pub fn received_eos(&self) -> bool {
        self.received_eos.load(Ordering::Relaxed)
    }

    pub fn set_received_eos(&self, value: bool) {
        self.received_eos.store(value, Ordering::Relaxed);
    }

    /// Sign and publish the NIP-47 info event announcing supported methods.
    pub async fn publish_info(&self, relay: &RelayClient) -> Result<()> {
        let event = crypto::sign_event(
            &self.identity.keys,
            nip47::INFO_EVENT_KIND,
            Vec::new(),
            nip47::CAPABILITIES.to_string(),
        )?;
        relay.publish(&event).await
    }

    pub fn subscription_filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            authors: self.config.client_pubkey.clone().map(|pk| vec![pk]),
            kinds: Some(vec![nip47::REQUEST_KIND]),
            p_tags: Some(vec![self.identity.pubkey_hex.clone()]),
        }
    }

    /// Handle one inbound request event. `Ok(Some(reply))` is published by
    /// the caller; `Err` means the event was dropped without a reply.
    pub async fn handle_event(&self, event: &Event) -> Result<Option<Event>> {
        // Drop the stored backlog: only events after EOS are live requests.
        if !self.received_eos() {
            return Ok(None);
        }

        let event_id = event.id.to_hex();
        let sender_pubkey = event.pubkey.to_hex();
        info!(%event_id, kind = event.kind.as_u16(), "Processing event");

        if self.db.has_processed(&event_id).await? {
            warn!(%event_id, "Event already processed");
            return Ok(None);
        }

        let Some((app, _user)) = self.db.get_app_by_pubkey(&sender_pubkey).await? else {
            // No pairing for this key. Reply over the sender-derived secret
            // but persist nothing.
            let ss = crypto::shared_secret(&sender_pubkey, self.identity.keys.secret_key())?;
            let reply = self.create_response(
                event,
                nip47::Response::error(
                    nip47::ERROR_UNAUTHORIZED,
                    "The public key does not have a wallet connected.",
                ),
                &ss,
            )?;
            return Ok(Some(reply));
        };

        info!(%event_id, app_id = app.id, "App found for nostr event");

        // Decrypt using the key stored with the app, not the envelope's.
        let ss = crypto::shared_secret(&app.nostr_pubkey, self.identity.keys.secret_key())?;
        let payload = match crypto::decrypt(&event.content, &ss) {
            Ok(payload) => payload,
            Err(e) => {
                error!(%event_id, app_id = app.id, "Failed to decrypt content: {e}");
                return Err(e.into());
            }
        };

        let processed = self
            .db
            .create_processed_event(app.id, &event_id, &event.content)
            .await?;

        let bolt11 = if nip47::is_legacy_invoice(&payload) {
            payload
        } else {
            let request: nip47::Request =
                serde_json::from_str(&payload).context("Failed to parse request envelope")?;
            if request.method != nip47::PAY_INVOICE_METHOD {
                let reply = self.create_response(
                    event,
                    nip47::Response::error(
                        nip47::ERROR_NOT_IMPLEMENTED,
                        format!("Unknown method: {}", request.method),
                    ),
                    &ss,
                )?;
                return Ok(Some(reply));
            }
            let params: nip47::PayParams = serde_json::from_value(request.params)
                .context("Failed to parse pay_invoice params")?;
            params.invoice
        };

        let invoice = Bolt11Invoice::from_str(&bolt11).map_err(|e| {
            error!(%event_id, app_id = app.id, %bolt11, "Failed to decode bolt11 invoice: {e}");
            anyhow::anyhow!("Failed to decode bolt11 invoice: {e}")
        })?;
        let amount_sats = (invoice.amount_milli_satoshis().unwrap_or(0) / 1000) as i64;

        let now = crate::db::now();
        let permissions = self.db.list_permissions(app.id).await?;
        match policy::select_permission(&permissions, nip47::PAY_INVOICE_METHOD, now) {
            Err(denial) => {
                info!(%event_id, app_id = app.id, code = denial.code, "Request denied");
                let reply = self.create_response(
                    event,
                    nip47::Response::error(denial.code, denial.message),
                    &ss,
                )?;
                return Ok(Some(reply));
            }
            Ok(None) => {} // no permission rows: legacy unrestricted app
            Ok(Some(permission)) => {
                let consumed = if permission.max_amount > 0 {
                    let renewal = BudgetRenewal::from_str(&permission.budget_renewal);
                    let since = policy::start_of_budget(renewal, app.created_at, now);
                    self.db.consumed_budget(app.id, since).await?
                } else {
                    0
                };
                if let Err(denial) = policy::check_amounts(permission, amount_sats, consumed) {
                    info!(%event_id, app_id = app.id, code = denial.code, "Request denied");
                    let reply = self.create_response(
                        event,
                        nip47::Response::error(denial.code, denial.message),
                        &ss,
                    )?;
                    return Ok(Some(reply));
                }
            }
        }

        let payment = self
            .db
            .create_payment(app.id, processed.id, &bolt11, amount_sats)
            .await?;

        info!(%event_id, app_id = app.id, amount_sats, "Sending payment");

        match self.ln.send_payment(&sender_pubkey, &bolt11).await {
            Err(e) => {
                info!(%event_id, app_id = app.id, "Failed to send payment: {e}");
                self.db
                    .mark_processed_state(processed.id, EventState::Error)
                    .await?;
                let reply = self.create_response(
                    event,
                    nip47::Response::error(
                        nip47::ERROR_INTERNAL,
                        format!("Something went wrong while paying invoice: {e}"),
                    ),
                    &ss,
                )?;
                Ok(Some(reply))
            }
            Ok(preimage) => {
                self.db.set_payment_preimage(payment.id, &preimage).await?;
                self.db
                    .mark_processed_state(processed.id, EventState::Executed)
                    .await?;
                let reply = self.create_response(
                    event,
                    nip47::Response::result(
                        nip47::PAY_INVOICE_METHOD,
                        json!(nip47::PayResult { preimage }),
                    ),
                    &ss,
                )?;
                Ok(Some(reply))
            }
        }
    }

    /// A fresh kind-23195 event: encrypted envelope, tagged back to the
    /// requesting pubkey and event, signed by the bridge identity.
    fn create_response(
        &self,
        request: &Event,
        response: nip47::Response,
        shared_secret: &[u8; 32],
    ) -> Result<Event> {
        let payload = serde_json::to_string(&response)?;
        let content = crypto::encrypt(&payload, shared_secret);
        let tags = vec![
            Tag::parse(&["p", &request.pubkey.to_hex()])?,
            Tag::parse(&["e", &request.id.to_hex()])?,
        ];
        let reply = crypto::sign_event(
            &self.identity.keys,
            nip47::RESPONSE_KIND,
            tags,
            content,
        )?;
        Ok(reply)
    }

    /// Drive one relay session until shutdown or transport failure. Every
    /// event gets its own task; in-flight handlers get a bounded grace
    /// period before the shared state is released.
    pub async fn run(
        self: Arc<Self>,
        relay: &RelayClient,
        events: &mut mpsc::Receiver<RelayMessage>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<LoopExit> {
        relay
            .subscribe(SUBSCRIPTION_ID, &self.subscription_filter())
            .await?;
        info!("Subscribing to events");

        let handle = relay.handle()?;
        let mut handlers: JoinSet<()> = JoinSet::new();

        let exit = loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Exiting subscription.");
                    break LoopExit::Shutdown;
                }
                msg = events.recv() => match msg {
                    None => break LoopExit::Disconnected,
                    Some(RelayMessage::Notice { message }) => {
                        info!(%message, "Received a notice");
                    }
                    Some(RelayMessage::Eose { .. }) => {
                        info!("Received EOS");
                        self.set_received_eos(true);
                    }
                    Some(RelayMessage::Ok { event_id, accepted, message }) => {
                        debug!(%event_id, accepted, ?message, "Publish acknowledged");
                    }
                    Some(RelayMessage::Event { event, .. }) => {
                        let svc = Arc::clone(&self);
                        let handle = handle.clone();
                        handlers.spawn(async move {
                            let event_id = event.id.to_hex();
                            match svc.handle_event(&event).await {
                                Err(e) => error!(%event_id, "Failed to handle event: {e:#}"),
                                Ok(None) => {}
                                Ok(Some(reply)) => {
                                    let reply_id = reply.id.to_hex();
                                    if let Err(e) = handle.publish(&reply).await {
                                        warn!(%event_id, "Failed to publish reply: {e}");
                                    }
                                    if let Err(e) = svc.db.mark_replied(&event_id, &reply_id).await {
                                        error!(%event_id, "Failed to record reply: {e}");
                                    }
                                    info!(%event_id, %reply_id, "Published reply");
                                }
                            }
                        });
                    }
                }
            }
        };

        let drain = async {
            while handlers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Handlers still in flight after grace period, aborting them");
            handlers.abort_all();
        }

        Ok(exit)
    }
}
