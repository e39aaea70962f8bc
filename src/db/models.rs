//! Model structs and their queries. Column order must match schema.rs.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Nullable};

use super::now;
use crate::db::schema::{app_permissions, apps, identities, nostr_events, payments, users};

/// Lifecycle of an inbound relay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Received,
    Executed,
    Error,
    Replied,
}

impl EventState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventState::Received => "received",
            EventState::Executed => "executed",
            EventState::Error => "error",
            EventState::Replied => "replied",
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: i32,
    pub alby_identifier: String,
    pub access_token: String,
    pub refresh_token: String,
    pub email: String,
    pub expiry: Option<NaiveDateTime>,
    pub lightning_address: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub alby_identifier: &'a str,
    pub access_token: &'a str,
    pub refresh_token: &'a str,
    pub email: &'a str,
    pub expiry: Option<NaiveDateTime>,
    pub lightning_address: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    /// Look up by the OAuth subject, creating an empty account on first sight.
    pub fn find_or_create(conn: &mut SqliteConnection, identifier: &str) -> Result<User> {
        if let Some(user) = users::table
            .filter(users::alby_identifier.eq(identifier))
            .first::<User>(conn)
            .optional()
            .context("Failed to query user")?
        {
            return Ok(user);
        }
        let ts = now();
        diesel::insert_into(users::table)
            .values(NewUser {
                alby_identifier: identifier,
                access_token: "",
                refresh_token: "",
                email: "",
                expiry: None,
                lightning_address: "",
                created_at: ts,
                updated_at: ts,
            })
            .get_result(conn)
            .context("Failed to create user")
    }

    pub fn update_tokens(
        conn: &mut SqliteConnection,
        user_id: i32,
        access_token: &str,
        refresh_token: &str,
        expiry: Option<NaiveDateTime>,
    ) -> Result<()> {
        diesel::update(users::table.find(user_id))
            .set((
                users::access_token.eq(access_token),
                users::refresh_token.eq(refresh_token),
                users::expiry.eq(expiry),
                users::updated_at.eq(now()),
            ))
            .execute(conn)
            .context("Failed to update user tokens")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = apps)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct App {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub description: String,
    pub nostr_pubkey: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = apps)]
pub struct NewApp<'a> {
    pub user_id: i32,
    pub name: &'a str,
    pub description: &'a str,
    pub nostr_pubkey: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl App {
    pub fn create(
        conn: &mut SqliteConnection,
        user_id: i32,
        name: &str,
        description: &str,
        nostr_pubkey: &str,
    ) -> Result<App> {
        let ts = now();
        diesel::insert_into(apps::table)
            .values(NewApp {
                user_id,
                name,
                description,
                nostr_pubkey,
                created_at: ts,
                updated_at: ts,
            })
            .get_result(conn)
            .context("Failed to create app")
    }

    /// The pairing pubkey identifies the sender of every request event.
    pub fn find_by_pubkey(
        conn: &mut SqliteConnection,
        pubkey: &str,
    ) -> Result<Option<(App, User)>> {
        apps::table
            .inner_join(users::table)
            .filter(apps::nostr_pubkey.eq(pubkey))
            .select((App::as_select(), User::as_select()))
            .first::<(App, User)>(conn)
            .optional()
            .context("Failed to query app by pubkey")
    }

    pub fn delete(conn: &mut SqliteConnection, app_id: i32) -> Result<()> {
        diesel::delete(apps::table.find(app_id))
            .execute(conn)
            .context("Failed to delete app")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = app_permissions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppPermission {
    pub id: i32,
    pub app_id: i32,
    pub request_method: String,
    pub max_amount: i64,
    pub max_amount_per_transaction: i64,
    pub budget_renewal: String,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = app_permissions)]
pub struct NewAppPermission<'a> {
    pub app_id: i32,
    pub request_method: &'a str,
    pub max_amount: i64,
    pub max_amount_per_transaction: i64,
    pub budget_renewal: &'a str,
    pub expires_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl AppPermission {
    pub fn create(conn: &mut SqliteConnection, new: NewAppPermission<'_>) -> Result<AppPermission> {
        diesel::insert_into(app_permissions::table)
            .values(&new)
            .get_result(conn)
            .context("Failed to create app permission")
    }

    pub fn list_for_app(conn: &mut SqliteConnection, app_id: i32) -> Result<Vec<AppPermission>> {
        app_permissions::table
            .filter(app_permissions::app_id.eq(app_id))
            .load(conn)
            .context("Failed to list app permissions")
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = nostr_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct NostrEvent {
    pub id: i32,
    pub app_id: i32,
    pub nostr_id: String,
    pub reply_id: Option<String>,
    pub content: String,
    pub state: String,
    pub replied_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = nostr_events)]
struct NewNostrEvent<'a> {
    app_id: i32,
    nostr_id: &'a str,
    content: &'a str,
    state: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl NostrEvent {
    /// Insert in state `received`. The unique index on `nostr_id` is the
    /// idempotency barrier: a second insert for the same relay event fails.
    pub fn create(
        conn: &mut SqliteConnection,
        app_id: i32,
        nostr_id: &str,
        content: &str,
    ) -> Result<NostrEvent> {
        let ts = now();
        diesel::insert_into(nostr_events::table)
            .values(NewNostrEvent {
                app_id,
                nostr_id,
                content,
                state: EventState::Received.as_str(),
                created_at: ts,
                updated_at: ts,
            })
            .get_result(conn)
            .context("Failed to create nostr event")
    }

    pub fn exists(conn: &mut SqliteConnection, nostr_id: &str) -> Result<bool> {
        let count: i64 = nostr_events::table
            .filter(nostr_events::nostr_id.eq(nostr_id))
            .count()
            .get_result(conn)
            .context("Failed to count nostr events")?;
        Ok(count > 0)
    }

    pub fn mark_state(conn: &mut SqliteConnection, id: i32, state: EventState) -> Result<()> {
        diesel::update(nostr_events::table.find(id))
            .set((
                nostr_events::state.eq(state.as_str()),
                nostr_events::updated_at.eq(now()),
            ))
            .execute(conn)
            .context("Failed to update nostr event state")?;
        Ok(())
    }

    /// Record that the reply was handed to the relay. A no-op when no row
    /// exists, which is the case for unauthorized-sender replies.
    pub fn mark_replied(
        conn: &mut SqliteConnection,
        nostr_id: &str,
        reply_id: &str,
    ) -> Result<()> {
        let ts = now();
        diesel::update(nostr_events::table.filter(nostr_events::nostr_id.eq(nostr_id)))
            .set((
                nostr_events::state.eq(EventState::Replied.as_str()),
                nostr_events::reply_id.eq(reply_id),
                nostr_events::replied_at.eq(ts),
                nostr_events::updated_at.eq(ts),
            ))
            .execute(conn)
            .context("Failed to mark nostr event replied")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Payment {
    pub id: i32,
    pub app_id: i32,
    pub nostr_event_id: i32,
    pub amount: i64,
    pub payment_request: String,
    pub preimage: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = payments)]
struct NewPayment<'a> {
    app_id: i32,
    nostr_event_id: i32,
    amount: i64,
    payment_request: &'a str,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

impl Payment {
    pub fn create(
        conn: &mut SqliteConnection,
        app_id: i32,
        nostr_event_id: i32,
        payment_request: &str,
        amount: i64,
    ) -> Result<Payment> {
        let ts = now();
        diesel::insert_into(payments::table)
            .values(NewPayment {
                app_id,
                nostr_event_id,
                amount,
                payment_request,
                created_at: ts,
                updated_at: ts,
            })
            .get_result(conn)
            .context("Failed to create payment")
    }

    pub fn set_preimage(conn: &mut SqliteConnection, id: i32, preimage: &str) -> Result<()> {
        diesel::update(payments::table.find(id))
            .set((
                payments::preimage.eq(preimage),
                payments::updated_at.eq(now()),
            ))
            .execute(conn)
            .context("Failed to set payment preimage")?;
        Ok(())
    }

    /// Satoshis spent by the app since `since`. Only settled payments count:
    /// the preimage is set exactly when the backend confirmed payment.
    pub fn consumed_budget(
        conn: &mut SqliteConnection,
        app_id: i32,
        since: NaiveDateTime,
    ) -> Result<i64> {
        let total: Option<i64> = payments::table
            .filter(payments::app_id.eq(app_id))
            .filter(payments::preimage.is_not_null())
            .filter(payments::created_at.gt(since))
            .select(sql::<Nullable<BigInt>>("SUM(amount)"))
            .first(conn)
            .context("Failed to sum payments")?;
        Ok(total.unwrap_or(0))
    }

    pub fn list_for_app(conn: &mut SqliteConnection, app_id: i32) -> Result<Vec<Payment>> {
        payments::table
            .filter(payments::app_id.eq(app_id))
            .order(payments::id.asc())
            .load(conn)
            .context("Failed to list payments")
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = identities)]
pub struct IdentityRow {
    pub id: i32,
    pub privkey: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = identities)]
struct NewIdentityRow<'a> {
    privkey: &'a str,
    created_at: NaiveDateTime,
}

impl IdentityRow {
    pub fn load(conn: &mut SqliteConnection) -> Result<Option<String>> {
        identities::table
            .select(identities::privkey)
            .order(identities::id.asc())
            .first::<String>(conn)
            .optional()
            .context("Failed to load identity")
    }

    pub fn store(conn: &mut SqliteConnection, privkey: &str) -> Result<()> {
        diesel::insert_into(identities::table)
            .values(NewIdentityRow {
                privkey,
                created_at: now(),
            })
            .execute(conn)
            .context("Failed to store identity")?;
        Ok(())
    }
}
