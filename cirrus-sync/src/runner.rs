//! Command dispatch.
//!
//! The [`CommandRunner`] decorates a [`Command`] with the client's
//! authentication and metadata headers, hands it to the [`Transport`] and
//! classifies the response:
//!
//! | status | outcome |
//! |---|---|
//! | `>= 500` | `Server { INTERNAL_SERVER_ERROR }` |
//! | `200..=299` | the JSON body (arrays wrapped as `{"results": [...]}`) |
//! | anything else | `Server { code, error }` from the body, or the raw body |

use crate::command::Command;
use crate::config::ClientConfig;
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::installation_id::InstallationIdController;
use crate::transport::Transport;
use cirrus_types::JsonMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// A classified successful response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub status: u16,
    pub body: JsonMap,
}

/// Sends commands and turns raw responses into results.
pub struct CommandRunner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    installation_id: Arc<InstallationIdController>,
}

impl CommandRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        installation_id: Arc<InstallationIdController>,
    ) -> Self {
        Self {
            transport,
            config,
            installation_id,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn decorate(&self, mut command: Command) -> SyncResult<Command> {
        let config = &self.config;
        let installation_id = self.installation_id.get().await?;

        let mut headers = std::mem::take(&mut command.headers);
        headers.push(("X-Parse-Application-Id".into(), config.application_id.clone()));
        headers.push(("X-Parse-Client-Version".into(), config.client_version.clone()));
        headers.push(("X-Parse-Installation-Id".into(), installation_id.to_string()));
        for (name, value) in &config.extra_headers {
            headers.push((name.clone(), value.clone()));
        }
        let metadata = [
            ("X-Parse-App-Build-Version", &config.app_build_version),
            ("X-Parse-App-Display-Version", &config.app_display_version),
            ("X-Parse-OS-Version", &config.os_version),
        ];
        for (name, value) in metadata {
            if let Some(value) = value {
                headers.push((name.into(), value.clone()));
            }
        }
        match (&config.master_key, &config.client_key) {
            (Some(master_key), _) => headers.push(("X-Parse-Master-Key".into(), master_key.clone())),
            (None, Some(client_key)) => {
                headers.push(("X-Parse-Windows-Key".into(), client_key.clone()));
            }
            (None, None) => {}
        }
        if config.revocable_session {
            headers.push(("X-Parse-Revocable-Session".into(), "1".into()));
        }
        if let Some(token) = &command.session_token {
            headers.push(("X-Parse-Session-Token".into(), token.clone()));
        }
        if command.body.is_some() {
            headers.push(("Content-Type".into(), "application/json".into()));
        }
        command.headers = headers;
        Ok(command)
    }

    /// Runs `command` and classifies its response.
    ///
    /// A cancelled token is observed before any I/O and again once the
    /// transport returns; in both cases the result is [`SyncError::Cancelled`].
    pub async fn run_command(
        &self,
        command: Command,
        cancel: &CancellationToken,
    ) -> SyncResult<CommandResponse> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let command = self.decorate(command).await?;
        debug!(method = %command.method, path = %command.path, "running command");

        let response = self.transport.execute(&command, cancel).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        trace!(status = response.status, "command response");
        classify(response.status, response.body.as_deref().unwrap_or_default())
    }
}

fn parse_body(body: &str) -> Option<JsonMap> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Some(JsonMap::new());
    }
    match serde_json::from_str::<JsonValue>(trimmed).ok()? {
        JsonValue::Object(map) => Some(map),
        JsonValue::Array(results) => {
            let mut map = JsonMap::new();
            map.insert("results".into(), JsonValue::Array(results));
            Some(map)
        }
        _ => None,
    }
}

fn classify(status: u16, body: &str) -> SyncResult<CommandResponse> {
    if status >= 500 {
        warn!(status, "server error response");
        return Err(SyncError::server(
            ErrorCode::INTERNAL_SERVER_ERROR,
            if body.is_empty() {
                format!("server returned status {status}")
            } else {
                body.to_string()
            },
        ));
    }

    let parsed = parse_body(body);
    if (200..300).contains(&status) {
        return match parsed {
            Some(body) => Ok(CommandResponse { status, body }),
            None => Err(SyncError::server(
                ErrorCode::INTERNAL_SERVER_ERROR,
                format!("invalid response body: {body}"),
            )),
        };
    }

    let code = parsed
        .as_ref()
        .and_then(|map| map.get("code"))
        .and_then(JsonValue::as_i64)
        .map_or(ErrorCode::OTHER_CAUSE, ErrorCode);
    let message = parsed
        .as_ref()
        .and_then(|map| map.get("error"))
        .and_then(JsonValue::as_str)
        .map_or_else(|| body.to_string(), str::to_string);
    debug!(status, code = %code, "application error response");
    Err(SyncError::server(code, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn server_errors_win_over_bodies() {
        let err = classify(503, r#"{"code": 101, "error": "nope"}"#).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn success_bodies_are_decoded() {
        let ok = classify(201, r#"{"objectId": "a"}"#).unwrap();
        assert_eq!(ok.status, 201);
        assert_eq!(ok.body.get("objectId"), Some(&json!("a")));
    }

    #[test]
    fn top_level_arrays_are_wrapped() {
        let ok = classify(200, "[1, 2]").unwrap();
        assert_eq!(ok.body.get("results"), Some(&json!([1, 2])));
    }

    #[test]
    fn empty_success_body_is_an_empty_map() {
        assert!(classify(200, "").unwrap().body.is_empty());
    }

    #[test]
    fn non_json_success_is_an_internal_error() {
        let err = classify(200, "<html>").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn application_errors_carry_code_and_message() {
        match classify(404, r#"{"code": 101, "error": "Object not found."}"#).unwrap_err() {
            SyncError::Server { code, message } => {
                assert_eq!(code, ErrorCode::OBJECT_NOT_FOUND);
                assert_eq!(message, "Object not found.");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unstructured_errors_fall_back_to_raw_body() {
        match classify(400, "bad request").unwrap_err() {
            SyncError::Server { code, message } => {
                assert_eq!(code, ErrorCode::OTHER_CAUSE);
                assert_eq!(message, "bad request");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
