use chrono::{TimeZone, Utc};
use cirrus_model::{EntitySubclass, User, Value};
use cirrus_sync::transport::mock::MockTransport;
use cirrus_sync::{Client, ClientConfig, ErrorCode, MemoryStorage, Method, SyncError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn config() -> ClientConfig {
    ClientConfig::new("https://api.example.com/1/", "app-id")
}

fn setup() -> (Client, MockTransport, Arc<MemoryStorage>) {
    let transport = MockTransport::new();
    let storage = Arc::new(MemoryStorage::new());
    let client = Client::new(config(), Arc::new(transport.clone()), storage.clone()).unwrap();
    (client, transport, storage)
}

fn user_json(token: &str) -> serde_json::Value {
    json!({
        "objectId": "u1",
        "username": "ada",
        "createdAt": "2024-01-01T00:00:00.000Z",
        "sessionToken": token
    })
}

// ── Sign up ─────────────────────────────────────────────────────

#[tokio::test]
async fn sign_up_creates_and_logs_in_the_user() {
    let (client, transport, storage) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(
        201,
        json!({
            "objectId": "u1",
            "createdAt": "2024-01-01T00:00:00.000Z",
            "sessionToken": "r:new"
        }),
    );

    let user: User = client.create_typed().unwrap();
    user.set_username("ada").unwrap();
    user.set_password("secret").unwrap();
    client.sign_up(&user, &cancel).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(requests[0].path, "classes/_User");
    assert_eq!(
        requests[0].body,
        Some(json!({ "username": "ada", "password": "secret" }))
    );

    assert_eq!(user.object_id().as_deref(), Some("u1"));
    assert!(user.is_new());
    assert_eq!(user.session_token().as_deref(), Some("r:new"));
    assert_eq!(user.get("password"), None);

    let current = client.current_user(&cancel).await.unwrap().unwrap();
    assert!(current.ptr_eq(&user));

    let restarted = Client::new(config(), Arc::new(MockTransport::new()), storage).unwrap();
    let loaded = restarted.current_user(&cancel).await.unwrap().unwrap();
    assert_eq!(loaded.username().as_deref(), Some("ada"));
    assert_eq!(loaded.get("password"), None);
}

#[tokio::test]
async fn sign_up_requires_credentials_and_a_new_user() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();

    let nameless: User = client.create_typed().unwrap();
    nameless.set_password("secret").unwrap();
    assert!(matches!(
        client.sign_up(&nameless, &cancel).await,
        Err(SyncError::InvalidState(_))
    ));

    let passwordless: User = client.create_typed().unwrap();
    passwordless.set_username("ada").unwrap();
    assert!(matches!(
        client.sign_up(&passwordless, &cancel).await,
        Err(SyncError::InvalidState(_))
    ));

    let existing = client
        .create_without_data(User::CLASS_NAME, "u1")
        .downcast::<User>()
        .unwrap();
    existing.set_username("ada").unwrap();
    existing.set_password("secret").unwrap();
    assert!(matches!(
        client.sign_up(&existing, &cancel).await,
        Err(SyncError::InvalidState(_))
    ));

    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn failed_sign_up_keeps_the_user_dirty() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(400, json!({ "code": 202, "error": "Account already exists" }));

    let user: User = client.create_typed().unwrap();
    user.set_username("ada").unwrap();
    user.set_password("secret").unwrap();
    let err = client.sign_up(&user, &cancel).await.unwrap_err();

    assert_eq!(err.code(), Some(ErrorCode::USERNAME_TAKEN));
    assert!(user.is_dirty());
    assert_eq!(user.get_str("password").as_deref(), Some("secret"));
    assert!(client.current_user(&cancel).await.unwrap().is_none());
}

// ── Log in ──────────────────────────────────────────────────────

#[tokio::test]
async fn log_in_sends_escaped_credentials() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(200, user_json("r:abc"));

    let user = client.log_in("ada", "p@ss word", &cancel).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].method, Method::Get);
    assert_eq!(requests[0].path, "login?username=ada&password=p%40ss%20word");
    assert_eq!(requests[0].body, None);

    assert_eq!(user.username().as_deref(), Some("ada"));
    assert!(!user.is_new());
    assert_eq!(
        client.session_token(&cancel).await.unwrap().as_deref(),
        Some("r:abc")
    );
}

#[tokio::test]
async fn rejected_log_in_leaves_no_current_user() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(404, json!({ "code": 101, "error": "Invalid username/password." }));

    let err = client.log_in("ada", "wrong", &cancel).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::OBJECT_NOT_FOUND));
    assert!(client.current_user(&cancel).await.unwrap().is_none());
}

#[tokio::test]
async fn become_user_looks_up_the_session_owner() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(
        200,
        json!({ "objectId": "u1", "username": "ada", "createdAt": "2024-01-01T00:00:00.000Z" }),
    );

    let user = client.become_user("r:existing", &cancel).await.unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].path, "users/me");
    assert_eq!(requests[0].header("X-Parse-Session-Token"), Some("r:existing"));
    assert_eq!(user.session_token().as_deref(), Some("r:existing"));

    let current = client.current_user(&cancel).await.unwrap().unwrap();
    assert!(current.ptr_eq(&user));
}

#[tokio::test]
async fn password_reset_posts_the_email() {
    let (client, transport, _) = setup();
    transport.push_json(200, json!({}));

    client
        .request_password_reset("ada@example.com", &CancellationToken::new())
        .await
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests[0].path, "requestPasswordReset");
    assert_eq!(requests[0].body, Some(json!({ "email": "ada@example.com" })));
}

// ── Functions ───────────────────────────────────────────────────

#[tokio::test]
async fn call_function_encodes_params_and_decodes_the_result() {
    let (client, transport, _) = setup();
    let cancel = CancellationToken::new();
    transport.push_json(200, user_json("r:abc"));
    client.log_in("ada", "secret", &cancel).await.unwrap();

    transport.push_json(
        200,
        json!({ "result": { "__type": "Date", "iso": "2024-03-01T12:00:00.000Z" } }),
    );
    let when = Utc.with_ymd_and_hms(2023, 12, 24, 18, 0, 0).unwrap();
    let mut params = BTreeMap::new();
    params.insert("since".to_string(), Value::Date(when));
    params.insert("limit".to_string(), Value::from(5));

    let result = client
        .call_function("next run", &params, &cancel)
        .await
        .unwrap();
    assert_eq!(
        result,
        Some(Value::Date(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()))
    );

    let sent = &transport.requests()[1];
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.path, "functions/next%20run");
    assert_eq!(sent.header("X-Parse-Session-Token"), Some("r:abc"));
    assert_eq!(
        sent.body,
        Some(json!({
            "limit": 5,
            "since": { "__type": "Date", "iso": "2023-12-24T18:00:00.000Z" }
        }))
    );
}

#[tokio::test]
async fn call_function_without_a_result_returns_none() {
    let (client, transport, _) = setup();
    transport.push_json(200, json!({}));

    let result = client
        .call_function("ping", &BTreeMap::new(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, None);
}
