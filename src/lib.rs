//! nwcd: a NIP-47 "wallet connect" bridge.
//!
//! Client apps hold a pairing secret, encrypt `pay_invoice` requests to the
//! bridge's pubkey and publish them as kind-23194 events on a relay. The
//! bridge decrypts, authorizes against per-app policy (quota window, per-tx
//! cap, expiry, method allow-list), pays through a Lightning backend and
//! publishes an encrypted kind-23195 reply referencing the request.
//!
//! # Architecture
//!
//! ```text
//! relay (WebSocket)
//!   │  kind 23194 events, EOSE, notices
//!   ▼
//! Service::run ── one tokio task per event ──► Service::handle_event
//!                                                │  dedup / decrypt / parse
//!                                                ├─► policy (quota, expiry)
//!                                                ├─► Db (diesel/sqlite)
//!                                                ├─► LnClient (LND gRPC or
//!                                                │   hosted OAuth wallet)
//!                                                └─► signed 23195 reply
//! ```
//!
//! Backends implement [`ln::LnClient`]; policy never lives in a backend and
//! a backend never touches policy.

pub mod config;
pub mod crypto;
pub mod db;
pub mod identity;
pub mod ln;
pub mod logging;
pub mod nip47;
pub mod policy;
pub mod relay;
pub mod runtime;
pub mod service;

pub use config::{BackendKind, Config};
pub use db::Db;
pub use identity::Identity;
pub use ln::{AlbyClient, LnClient, LndClient, PaymentError};
pub use relay::{RelayClient, RelayMessage, SubscriptionFilter};
pub use runtime::{install_signal_handlers, Shutdown};
pub use service::{LoopExit, Service};
