//! Typed sqlite store behind an r2d2 pool.
//!
//! Queries are synchronous diesel; the async wrappers push them onto the
//! blocking thread pool so handler tasks never stall the relay loop.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, PooledConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::task::spawn_blocking;

pub mod models;
pub mod schema;

pub use models::{App, AppPermission, EventState, IdentityRow, NostrEvent, Payment, User};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Timestamps are written in server-local time; budget windows are computed
/// in the same clock.
pub fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[derive(Debug, Clone, Copy)]
struct PragmaCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Cascading deletes (app -> permissions/events/payments) need FK
        // enforcement on every connection.
        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(10)
        .connection_timeout(std::time::Duration::from_secs(30))
        .connection_customizer(Box::new(PragmaCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")
}

/// Shared store handle. Cheap to clone; every handler task holds one.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
}

impl Db {
    pub fn open(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url)?;
        let mut conn = pool.get().context("Failed to get DB connection")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
        Ok(Self { pool })
    }

    pub fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>> {
        self.pool.get().context("Failed to get DB connection")
    }

    pub async fn get_app_by_pubkey(&self, pubkey: &str) -> Result<Option<(App, User)>> {
        let mut conn = self.conn()?;
        let pubkey = pubkey.to_string();
        spawn_blocking(move || App::find_by_pubkey(&mut conn, &pubkey)).await?
    }

    pub async fn has_processed(&self, nostr_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let nostr_id = nostr_id.to_string();
        spawn_blocking(move || NostrEvent::exists(&mut conn, &nostr_id)).await?
    }

    /// Fails when the relay event id was seen before, whatever became of the
    /// earlier attempt.
    pub async fn create_processed_event(
        &self,
        app_id: i32,
        nostr_id: &str,
        content: &str,
    ) -> Result<NostrEvent> {
        let mut conn = self.conn()?;
        let nostr_id = nostr_id.to_string();
        let content = content.to_string();
        spawn_blocking(move || NostrEvent::create(&mut conn, app_id, &nostr_id, &content)).await?
    }

    pub async fn mark_processed_state(&self, id: i32, state: EventState) -> Result<()> {
        let mut conn = self.conn()?;
        spawn_blocking(move || NostrEvent::mark_state(&mut conn, id, state)).await?
    }

    pub async fn mark_replied(&self, nostr_id: &str, reply_id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let nostr_id = nostr_id.to_string();
        let reply_id = reply_id.to_string();
        spawn_blocking(move || NostrEvent::mark_replied(&mut conn, &nostr_id, &reply_id)).await?
    }

    pub async fn create_payment(
        &self,
        app_id: i32,
        nostr_event_id: i32,
        payment_request: &str,
        amount: i64,
    ) -> Result<Payment> {
        let mut conn = self.conn()?;
        let payment_request = payment_request.to_string();
        spawn_blocking(move || {
            Payment::create(&mut conn, app_id, nostr_event_id, &payment_request, amount)
        })
        .await?
    }

    pub async fn set_payment_preimage(&self, id: i32, preimage: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let preimage = preimage.to_string();
        spawn_blocking(move || Payment::set_preimage(&mut conn, id, &preimage)).await?
    }

    pub async fn list_permissions(&self, app_id: i32) -> Result<Vec<AppPermission>> {
        let mut conn = self.conn()?;
        spawn_blocking(move || AppPermission::list_for_app(&mut conn, app_id)).await?
    }

    pub async fn consumed_budget(&self, app_id: i32, since: NaiveDateTime) -> Result<i64> {
        let mut conn = self.conn()?;
        spawn_blocking(move || Payment::consumed_budget(&mut conn, app_id, since)).await?
    }

    pub async fn update_oauth_tokens(
        &self,
        user_id: i32,
        access_token: &str,
        refresh_token: &str,
        expiry: Option<NaiveDateTime>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let access_token = access_token.to_string();
        let refresh_token = refresh_token.to_string();
        spawn_blocking(move || {
            User::update_tokens(&mut conn, user_id, &access_token, &refresh_token, expiry)
        })
        .await?
    }

    /// The synthetic single operator account for local-node deployments.
    pub async fn ensure_default_user(&self, identifier: &str) -> Result<User> {
        let mut conn = self.conn()?;
        let identifier = identifier.to_string();
        spawn_blocking(move || User::find_or_create(&mut conn, &identifier)).await?
    }

    pub async fn load_identity(&self) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        spawn_blocking(move || IdentityRow::load(&mut conn)).await?
    }

    pub async fn store_identity(&self, privkey: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let privkey = privkey.to_string();
        spawn_blocking(move || IdentityRow::store(&mut conn, &privkey)).await?
    }
}
