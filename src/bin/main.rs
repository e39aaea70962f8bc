//! nwcd daemon entry point.
//!
//! Resolves configuration and identity, opens the store, selects the
//! Lightning backend, then drives the relay subscription loop until a
//! shutdown signal arrives. A relay transport failure tears the session
//! down and reconnects; only startup failures are fatal.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use nostr::ToBech32;
use tokio::sync::mpsc;
use tracing::{error, info};

use nwcd::config::{self, BackendKind, Config};
use nwcd::db::Db;
use nwcd::identity::Identity;
use nwcd::ln::{AlbyClient, LnClient, LndClient};
use nwcd::logging::init_logging;
use nwcd::relay::{RelayClient, RelayMessage};
use nwcd::runtime::{install_signal_handlers, Shutdown};
use nwcd::service::{LoopExit, Service};

/// The synthetic single-operator account used in local-node mode.
const DEFAULT_USER_IDENTIFIER: &str = "lnd";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let _ = rustls::crypto::ring::default_provider().install_default();

    config::load_dotenv();
    let config = Config::from_env()?;

    let db = Db::open(&config.database_uri).context("Failed to open database")?;

    let identity = resolve_identity(&config, &db).await?;
    let npub = identity.keys.public_key().to_bech32()?;
    info!(%npub, hex = %identity.pubkey_hex, "Starting nwcd");

    let ln: Arc<dyn LnClient> = match config.backend {
        BackendKind::Lnd => {
            let client = LndClient::connect(
                config.lnd_address.clone(),
                config.lnd_cert_file.clone(),
                config.lnd_macaroon_file.clone(),
            )
            .await?;
            db.ensure_default_user(DEFAULT_USER_IDENTIFIER).await?;
            Arc::new(client)
        }
        BackendKind::Alby => {
            Arc::new(AlbyClient::new(&config, db.clone()).context("Failed to set up Alby backend")?)
        }
    };

    let shutdown = install_signal_handlers();
    let service = Arc::new(Service::new(config.clone(), db, identity, ln));

    info!(relay = %config.relay, "Connecting to the relay");
    let mut relay = RelayClient::new(&config.relay);
    let mut events = relay
        .connect()
        .await
        .context("Failed to connect to relay")?;

    // Announced once per process; reconnects only re-subscribe.
    if let Err(e) = service.publish_info(&relay).await {
        error!("Could not publish NIP47 info: {e}");
    }

    let mut shutdown_rx = shutdown.subscribe();
    loop {
        // A failed session (subscribe on a dead socket, handle gone) is a
        // transport failure like any other: reconnect, don't crash.
        let exit = match service
            .clone()
            .run(&relay, &mut events, &mut shutdown_rx)
            .await
        {
            Ok(exit) => exit,
            Err(e) => {
                error!("Relay session failed: {e:#}");
                LoopExit::Disconnected
            }
        };
        match exit {
            LoopExit::Shutdown => break,
            LoopExit::Disconnected => {
                if shutdown.is_triggered() {
                    break;
                }
                error!("Got an error from the relay. Reconnecting...");
                match reconnect(&config.relay, &shutdown).await {
                    Some((new_relay, new_events)) => {
                        relay = new_relay;
                        events = new_events;
                    }
                    None => break,
                }
            }
        }
    }

    relay.close().await;
    info!("Graceful shutdown completed. Goodbye.");
    Ok(())
}

/// Retry the relay connection until it succeeds or shutdown is requested.
/// Only the first connection at startup is allowed to be fatal; once the
/// daemon is running, a dead relay is ridden out here.
async fn reconnect(
    relay_url: &str,
    shutdown: &Shutdown,
) -> Option<(RelayClient, mpsc::Receiver<RelayMessage>)> {
    let mut backoff = Duration::from_secs(1);
    while !shutdown.is_triggered() {
        let mut relay = RelayClient::new(relay_url);
        match relay.connect().await {
            Ok(events) => return Some((relay, events)),
            Err(e) => {
                error!(
                    "Failed to reconnect to relay: {e}. Retrying in {}s",
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(60));
            }
        }
    }
    None
}

/// `NOSTR_PRIVKEY` wins; in local-node mode a missing key is generated once
/// and persisted. The hosted backend refuses to run on a throwaway key.
async fn resolve_identity(config: &Config, db: &Db) -> anyhow::Result<Identity> {
    if let Some(secret) = &config.nostr_secret_key {
        return Ok(Identity::from_hex(secret)?);
    }
    if config.backend == BackendKind::Alby {
        bail!("NOSTR_PRIVKEY is required with the ALBY backend");
    }
    match db.load_identity().await? {
        Some(secret) => Ok(Identity::from_hex(&secret)?),
        None => {
            info!("No private key found in database, generating & saving.");
            let identity = Identity::generate();
            db.store_identity(&identity.secret_hex()).await?;
            Ok(identity)
        }
    }
}
