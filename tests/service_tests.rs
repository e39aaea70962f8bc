//! End-to-end handler scenarios against a scratch sqlite store and a mock
//! Lightning backend.

use std::sync::Arc;

use async_trait::async_trait;
use nwcd::config::{BackendKind, Config};
use nwcd::crypto;
use nwcd::db::models::NewAppPermission;
use nwcd::db::{App, AppPermission, Db, Payment, User};
use nwcd::identity::Identity;
use nwcd::ln::{LnClient, PaymentError};
use nwcd::nip47;
use nwcd::service::Service;
use tempfile::TempDir;

// 123-sat testnet invoice.
const TEST_INVOICE: &str = "lntb1230n1pjypux0pp5xgxzcks5jtx06k784f9dndjh664wc08ucrganpqn52d0ftrh9n8sdqyw3jscqzpgxqyz5vqsp5rkx7cq252p3frx8ytjpzc55rkgyx2mfkzzraa272dqvr2j6leurs9qyyssqhutxa24r5hqxstchz5fxlslawprqjnarjujp5sm3xj7ex73s32sn54fthv2aqlhp76qmvrlvxppx9skd3r5ut5xutgrup8zuc6ay73gqmra29m";

const MOCK_PREIMAGE: &str = "123preimage";

struct MockLn;

#[async_trait]
impl LnClient for MockLn {
    async fn send_payment(
        &self,
        _sender_pubkey: &str,
        _invoice: &str,
    ) -> Result<String, PaymentError> {
        Ok(MOCK_PREIMAGE.to_string())
    }
}

struct FailingLn;

#[async_trait]
impl LnClient for FailingLn {
    async fn send_payment(
        &self,
        _sender_pubkey: &str,
        _invoice: &str,
    ) -> Result<String, PaymentError> {
        Err(PaymentError::Upstream {
            status: 500,
            message: "no route".to_string(),
        })
    }
}

struct TestContext {
    service: Arc<Service>,
    db: Db,
    sender: nostr::Keys,
    _dir: TempDir,
}

fn setup() -> TestContext {
    setup_with_backend(Arc::new(MockLn))
}

fn setup_with_backend(ln: Arc<dyn LnClient>) -> TestContext {
    let dir = TempDir::new().expect("tempdir");
    let db_path = dir.path().join("test.db");
    let db_uri = db_path.to_str().expect("utf8 path").to_string();
    let db = Db::open(&db_uri).expect("open db");
    let identity = Identity::generate();
    let config = Config {
        nostr_secret_key: Some(identity.secret_hex()),
        client_pubkey: None,
        relay: "wss://relay.example.com/v1".to_string(),
        backend: BackendKind::Lnd,
        lnd_address: String::new(),
        lnd_cert_file: String::new(),
        lnd_macaroon_file: String::new(),
        alby_api_url: String::new(),
        alby_client_id: String::new(),
        alby_client_secret: String::new(),
        oauth_redirect_url: String::new(),
        oauth_auth_url: String::new(),
        oauth_token_url: String::new(),
        database_uri: db_uri,
    };
    let service = Arc::new(Service::new(config, db.clone(), identity, ln));
    service.set_received_eos(true);
    TestContext {
        service,
        db,
        sender: nostr::Keys::generate(),
        _dir: dir,
    }
}

fn sender_secret(ctx: &TestContext) -> [u8; 32] {
    crypto::shared_secret(&ctx.service.identity.pubkey_hex, ctx.sender.secret_key())
        .expect("shared secret")
}

fn request_event(ctx: &TestContext, plaintext: &str) -> nostr::Event {
    let ss = sender_secret(ctx);
    let content = crypto::encrypt(plaintext, &ss);
    crypto::sign_event(&ctx.sender, nip47::REQUEST_KIND, Vec::new(), content)
        .expect("signed request")
}

fn decrypt_response(ctx: &TestContext, reply: &nostr::Event) -> nip47::Response {
    let ss = sender_secret(ctx);
    let plaintext = crypto::decrypt(&reply.content, &ss).expect("decrypt reply");
    serde_json::from_str(&plaintext).expect("parse reply envelope")
}

fn register_app(ctx: &TestContext) -> App {
    let mut conn = ctx.db.conn().expect("conn");
    let user = User::find_or_create(&mut conn, "dummy").expect("user");
    App::create(
        &mut conn,
        user.id,
        "test",
        "",
        &ctx.sender.public_key().to_hex(),
    )
    .expect("app")
}

fn add_permission(
    ctx: &TestContext,
    app_id: i32,
    method: &str,
    max_amount: i64,
    budget_renewal: &str,
    expires_at: Option<chrono::NaiveDateTime>,
) {
    let mut conn = ctx.db.conn().expect("conn");
    let ts = nwcd::db::now();
    AppPermission::create(
        &mut conn,
        NewAppPermission {
            app_id,
            request_method: method,
            max_amount,
            max_amount_per_transaction: 0,
            budget_renewal,
            expires_at,
            created_at: ts,
            updated_at: ts,
        },
    )
    .expect("permission");
}

fn pay_json(invoice: &str) -> String {
    format!(r#"{{"method":"pay_invoice","params":{{"invoice":"{invoice}"}}}}"#)
}

#[tokio::test]
async fn drops_events_before_eos() {
    let ctx = setup();
    ctx.service.set_received_eos(false);
    register_app(&ctx);

    let event = request_event(&ctx, TEST_INVOICE);
    let reply = ctx.service.handle_event(&event).await.expect("handled");
    assert!(reply.is_none());
    assert!(!ctx.db.has_processed(&event.id.to_hex()).await.unwrap());
}

#[tokio::test]
async fn unregistered_pairing_key_is_unauthorized() {
    let ctx = setup();

    let event = request_event(&ctx, TEST_INVOICE);
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_UNAUTHORIZED);
    // Unknown senders leave no trace.
    assert!(!ctx.db.has_processed(&event.id.to_hex()).await.unwrap());
}

#[tokio::test]
async fn legacy_bare_invoice_pays_for_unrestricted_app() {
    let ctx = setup();
    let app = register_app(&ctx);

    let event = request_event(&ctx, TEST_INVOICE);
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");

    // Reply is a signed 23195 event tagged back at the request.
    assert!(crypto::verify_event(&reply));
    assert_eq!(reply.kind.as_u16(), nip47::RESPONSE_KIND);
    assert_eq!(reply.pubkey.to_hex(), ctx.service.identity.pubkey_hex);
    let tags: Vec<Vec<String>> = reply.tags.iter().map(|t| t.as_slice().to_vec()).collect();
    assert!(tags.contains(&vec!["p".to_string(), ctx.sender.public_key().to_hex()]));
    assert!(tags.contains(&vec!["e".to_string(), event.id.to_hex()]));

    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.result_type.as_deref(), Some("pay_invoice"));
    let result: nip47::PayResult =
        serde_json::from_value(response.result.unwrap()).expect("pay result");
    assert_eq!(result.preimage, MOCK_PREIMAGE);

    let mut conn = ctx.db.conn().unwrap();
    let payments = Payment::list_for_app(&mut conn, app.id).unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, 123);
    assert_eq!(payments[0].preimage.as_deref(), Some(MOCK_PREIMAGE));

    use diesel::prelude::*;
    use nwcd::db::schema::nostr_events::dsl::*;
    let event_state: String = nostr_events
        .filter(nostr_id.eq(event.id.to_hex()))
        .select(state)
        .first(&mut conn)
        .unwrap();
    assert_eq!(event_state, "executed");
}

#[tokio::test]
async fn json_envelope_pays_for_unrestricted_app() {
    let ctx = setup();
    let app = register_app(&ctx);

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    let result: nip47::PayResult =
        serde_json::from_value(response.result.unwrap()).expect("pay result");
    assert_eq!(result.preimage, MOCK_PREIMAGE);

    let mut conn = ctx.db.conn().unwrap();
    assert_eq!(Payment::list_for_app(&mut conn, app.id).unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_method_is_not_implemented() {
    let ctx = setup();
    let app = register_app(&ctx);

    let payload = format!(
        r#"{{"method":"get_balance","params":{{"invoice":"{TEST_INVOICE}"}}}}"#
    );
    let event = request_event(&ctx, &payload);
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_NOT_IMPLEMENTED);

    let mut conn = ctx.db.conn().unwrap();
    assert!(Payment::list_for_app(&mut conn, app.id).unwrap().is_empty());
}

#[tokio::test]
async fn replayed_event_is_dropped() {
    let ctx = setup();
    let app = register_app(&ctx);

    let event = request_event(&ctx, TEST_INVOICE);
    let first = ctx.service.handle_event(&event).await.expect("handled");
    assert!(first.is_some());
    assert!(ctx.db.has_processed(&event.id.to_hex()).await.unwrap());

    let second = ctx.service.handle_event(&event).await.expect("handled");
    assert!(second.is_none());

    let mut conn = ctx.db.conn().unwrap();
    assert_eq!(Payment::list_for_app(&mut conn, app.id).unwrap().len(), 1);
}

#[tokio::test]
async fn quota_exceeded_denies_payment() {
    let ctx = setup();
    let app = register_app(&ctx);
    add_permission(
        &ctx,
        app.id,
        nip47::PAY_INVOICE_METHOD,
        100,
        "never",
        Some(nwcd::db::now() + chrono::Duration::hours(24)),
    );

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_QUOTA_EXCEEDED);

    let mut conn = ctx.db.conn().unwrap();
    assert!(Payment::list_for_app(&mut conn, app.id).unwrap().is_empty());
}

#[tokio::test]
async fn within_quota_is_allowed() {
    let ctx = setup();
    let app = register_app(&ctx);
    add_permission(
        &ctx,
        app.id,
        nip47::PAY_INVOICE_METHOD,
        1000,
        "never",
        Some(nwcd::db::now() + chrono::Duration::hours(24)),
    );

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert!(response.error.is_none());

    let mut conn = ctx.db.conn().unwrap();
    assert_eq!(Payment::list_for_app(&mut conn, app.id).unwrap().len(), 1);
}

#[tokio::test]
async fn expired_permission_denies_payment() {
    let ctx = setup();
    let app = register_app(&ctx);
    add_permission(
        &ctx,
        app.id,
        nip47::PAY_INVOICE_METHOD,
        100,
        "never",
        Some(nwcd::db::now() - chrono::Duration::hours(24)),
    );

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_EXPIRED);
}

#[tokio::test]
async fn unmatched_method_permission_is_restricted() {
    let ctx = setup();
    let app = register_app(&ctx);
    add_permission(&ctx, app.id, "something_else", 0, "never", None);

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_RESTRICTED);
}

#[tokio::test]
async fn backend_failure_marks_error_and_replies_internal() {
    let ctx = setup_with_backend(Arc::new(FailingLn));
    let app = register_app(&ctx);

    let event = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&event)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    let error = response.error.unwrap();
    assert_eq!(error.code, nip47::ERROR_INTERNAL);
    assert!(error.message.contains("Something went wrong while paying invoice"));

    let mut conn = ctx.db.conn().unwrap();
    // The payment row exists but never settled.
    let payments = Payment::list_for_app(&mut conn, app.id).unwrap();
    assert_eq!(payments.len(), 1);
    assert!(payments[0].preimage.is_none());

    use diesel::prelude::*;
    use nwcd::db::schema::nostr_events::dsl::*;
    let event_state: String = nostr_events
        .filter(nostr_id.eq(event.id.to_hex()))
        .select(state)
        .first(&mut conn)
        .unwrap();
    assert_eq!(event_state, "error");
}

#[tokio::test]
async fn consumed_budget_ignores_unsettled_payments() {
    let ctx = setup();
    let app = register_app(&ctx);

    let mut conn = ctx.db.conn().unwrap();
    let processed_a = nwcd::db::NostrEvent::create(&mut conn, app.id, "ev_a", "x").unwrap();
    let processed_b = nwcd::db::NostrEvent::create(&mut conn, app.id, "ev_b", "x").unwrap();
    let settled = Payment::create(&mut conn, app.id, processed_a.id, TEST_INVOICE, 123).unwrap();
    Payment::create(&mut conn, app.id, processed_b.id, TEST_INVOICE, 500).unwrap();
    Payment::set_preimage(&mut conn, settled.id, MOCK_PREIMAGE).unwrap();
    drop(conn);

    let since = app.created_at - chrono::Duration::days(1);
    let consumed = ctx.db.consumed_budget(app.id, since).await.unwrap();
    assert_eq!(consumed, 123);
}

#[tokio::test]
async fn quota_accounts_for_prior_settled_spend() {
    let ctx = setup();
    let app = register_app(&ctx);
    add_permission(
        &ctx,
        app.id,
        nip47::PAY_INVOICE_METHOD,
        200,
        "never",
        Some(nwcd::db::now() + chrono::Duration::hours(24)),
    );

    // First 123-sat payment fits the 200-sat quota.
    let first = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&first)
        .await
        .expect("handled")
        .expect("reply");
    assert!(decrypt_response(&ctx, &reply).error.is_none());

    // The second would bring the window to 246 sats.
    let second = request_event(&ctx, &pay_json(TEST_INVOICE));
    let reply = ctx
        .service
        .handle_event(&second)
        .await
        .expect("handled")
        .expect("reply");
    let response = decrypt_response(&ctx, &reply);
    assert_eq!(response.error.unwrap().code, nip47::ERROR_QUOTA_EXCEEDED);
}
