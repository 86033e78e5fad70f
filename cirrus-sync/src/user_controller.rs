//! Account endpoints: sign up, password log in and session lookup.

use crate::command::{class_path, Command, Method};
use crate::error::SyncResult;
use crate::runner::CommandRunner;
use cirrus_model::coder::{decode_state, encode_operations};
use cirrus_model::{Decoder, EntitySubclass, ObjectState, OperationSet, User};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct UserController {
    runner: Arc<CommandRunner>,
    decoder: Arc<Decoder>,
}

impl UserController {
    pub fn new(runner: Arc<CommandRunner>, decoder: Arc<Decoder>) -> Self {
        Self { runner, decoder }
    }

    /// Creates the user described by `operations`. The returned state is
    /// always new and carries the issued session token.
    pub async fn sign_up(
        &self,
        operations: &OperationSet,
        cancel: &CancellationToken,
    ) -> SyncResult<ObjectState> {
        let command = Command::new(Method::Post, class_path(User::CLASS_NAME, None))
            .with_body(JsonValue::Object(encode_operations(operations)?));
        let response = self.runner.run_command(command, cancel).await?;
        let state = decode_state(&response.body, User::CLASS_NAME, &self.decoder)?;
        debug!(object_id = ?state.object_id(), "signed up");
        Ok(state.mutated(|s| s.is_new = true))
    }

    /// Exchanges a username and password for the user's state.
    pub async fn log_in(
        &self,
        username: &str,
        password: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<ObjectState> {
        let path = format!(
            "login?username={}&password={}",
            urlencoding::encode(username),
            urlencoding::encode(password)
        );
        let response = self
            .runner
            .run_command(Command::new(Method::Get, path), cancel)
            .await?;
        let state = decode_state(&response.body, User::CLASS_NAME, &self.decoder)?;
        debug!(object_id = ?state.object_id(), "logged in");
        Ok(state.mutated(|s| s.is_new = response.status == 201))
    }

    /// The user owning `session_token`.
    pub async fn get_user(
        &self,
        session_token: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<ObjectState> {
        let command = Command::new(Method::Get, "users/me")
            .with_session_token(Some(session_token.to_string()));
        let response = self.runner.run_command(command, cancel).await?;
        let state = decode_state(&response.body, User::CLASS_NAME, &self.decoder)?;
        Ok(state.mutated(|s| {
            s.is_new = false;
            s.session_token.get_or_insert_with(|| session_token.to_string());
        }))
    }

    /// Asks the server to mail a password reset link to `email`.
    pub async fn request_password_reset(
        &self,
        email: &str,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let command =
            Command::new(Method::Post, "requestPasswordReset").with_body(json!({ "email": email }));
        self.runner.run_command(command, cancel).await?;
        Ok(())
    }
}
