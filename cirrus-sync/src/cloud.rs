//! Server-side function calls.

use crate::command::{Command, Method};
use crate::error::SyncResult;
use crate::runner::CommandRunner;
use cirrus_model::codec::encode_map;
use cirrus_model::{Decoder, Value};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct CloudController {
    runner: Arc<CommandRunner>,
    decoder: Arc<Decoder>,
}

impl CloudController {
    pub fn new(runner: Arc<CommandRunner>, decoder: Arc<Decoder>) -> Self {
        Self { runner, decoder }
    }

    /// Runs the function `name` with `params` and returns its decoded
    /// `result`, or `None` when the response carries none.
    pub async fn call_function(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<Value>> {
        let command = Command::new(Method::Post, format!("functions/{}", urlencoding::encode(name)))
            .with_body(JsonValue::Object(encode_map(params)?))
            .with_session_token(session_token.map(str::to_string));
        let response = self.runner.run_command(command, cancel).await?;
        debug!(function = name, "function returned");
        match response.body.get("result") {
            Some(result) => Ok(Some(self.decoder.decode(result)?)),
            None => Ok(None),
        }
    }
}
