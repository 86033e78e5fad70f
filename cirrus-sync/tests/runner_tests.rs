use cirrus_sync::transport::mock::MockTransport;
use cirrus_sync::{
    ClientConfig, Command, CommandRunner, ErrorCode, InstallationIdController, KeyValueStore,
    MemoryStorage, Method, SyncError, TransportResponse,
};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn runner(config: ClientConfig) -> (CommandRunner, MockTransport) {
    let transport = MockTransport::new();
    let store = Arc::new(KeyValueStore::new(Arc::new(MemoryStorage::new())));
    let runner = CommandRunner::new(
        Arc::new(transport.clone()),
        config,
        Arc::new(InstallationIdController::new(store)),
    );
    (runner, transport)
}

fn base_config() -> ClientConfig {
    ClientConfig::new("https://api.example.com/1/", "app-id")
}

// ── Headers ─────────────────────────────────────────────────────

#[tokio::test]
async fn master_key_replaces_client_key() {
    let (runner, transport) = runner(ClientConfig {
        client_key: Some("client".into()),
        master_key: Some("master".into()),
        ..base_config()
    });
    transport.push_json(200, json!({}));

    runner
        .run_command(Command::new(Method::Get, "config"), &CancellationToken::new())
        .await
        .unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.header("X-Parse-Master-Key"), Some("master"));
    assert_eq!(sent.header("X-Parse-Windows-Key"), None);
    assert_eq!(sent.header("X-Parse-Application-Id"), Some("app-id"));
    assert!(sent.header("X-Parse-Client-Version").is_some_and(|v| v.starts_with("rust")));
    assert!(sent.header("X-Parse-Installation-Id").is_some());
    assert_eq!(sent.header("Content-Type"), None);
    assert_eq!(sent.header("X-Parse-Session-Token"), None);
}

#[tokio::test]
async fn optional_headers_follow_configuration() {
    let mut config = ClientConfig {
        client_key: Some("client".into()),
        revocable_session: true,
        app_build_version: Some("42".into()),
        app_display_version: Some("1.2.0".into()),
        os_version: Some("linux".into()),
        ..base_config()
    };
    config.extra_headers.insert("X-Custom".into(), "yes".into());
    let (runner, transport) = runner(config);
    transport.push_json(201, json!({ "objectId": "a" }));

    let command = Command::new(Method::Post, "classes/Note")
        .with_body(json!({ "title": "x" }))
        .with_session_token(Some("r:abc".into()));
    let response = runner
        .run_command(command, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.status, 201);

    let sent = &transport.requests()[0];
    assert_eq!(sent.header("X-Parse-Windows-Key"), Some("client"));
    assert_eq!(sent.header("X-Parse-Revocable-Session"), Some("1"));
    assert_eq!(sent.header("X-Parse-App-Build-Version"), Some("42"));
    assert_eq!(sent.header("X-Parse-App-Display-Version"), Some("1.2.0"));
    assert_eq!(sent.header("X-Parse-OS-Version"), Some("linux"));
    assert_eq!(sent.header("X-Custom"), Some("yes"));
    assert_eq!(sent.header("X-Parse-Session-Token"), Some("r:abc"));
    assert_eq!(sent.header("Content-Type"), Some("application/json"));
}

// ── Status contract ─────────────────────────────────────────────

#[tokio::test]
async fn status_codes_are_classified() {
    let (runner, transport) = runner(base_config());
    let cancel = CancellationToken::new();
    transport.push_json(500, json!({ "code": 101, "error": "ignored" }));
    transport.push_json(404, json!({ "code": 101, "error": "Object not found." }));
    transport.push_response(TransportResponse::new(403, "forbidden"));
    transport.push_json(200, json!([{ "a": 1 }]));

    let get = || Command::new(Method::Get, "classes/Note/x");

    let err = runner.run_command(get(), &cancel).await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::INTERNAL_SERVER_ERROR));

    match runner.run_command(get(), &cancel).await.unwrap_err() {
        SyncError::Server { code, message } => {
            assert_eq!(code, ErrorCode::OBJECT_NOT_FOUND);
            assert_eq!(message, "Object not found.");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    match runner.run_command(get(), &cancel).await.unwrap_err() {
        SyncError::Server { code, message } => {
            assert_eq!(code, ErrorCode::OTHER_CAUSE);
            assert_eq!(message, "forbidden");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let ok = runner.run_command(get(), &cancel).await.unwrap();
    assert_eq!(ok.body.get("results"), Some(&json!([{ "a": 1 }])));
}

#[tokio::test]
async fn cancelled_commands_never_reach_the_transport() {
    let (runner, transport) = runner(base_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = runner
        .run_command(Command::new(Method::Get, "config"), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(transport.request_count(), 0);
}
