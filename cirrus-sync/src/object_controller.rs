//! Fetch, save and delete of entity states, single and batched.

use crate::command::{class_path, Command, Method};
use crate::error::{ErrorCode, SyncError, SyncResult};
use crate::runner::CommandRunner;
use cirrus_model::coder::{decode_state, encode_operations};
use cirrus_model::{Decoder, ObjectState, OperationSet};
use cirrus_types::JsonMap;
use futures::future::join_all;
use reqwest::Url;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const BATCH_PATH: &str = "batch";

/// Turns entity states into commands and command responses into states.
pub struct ObjectController {
    runner: Arc<CommandRunner>,
    decoder: Arc<Decoder>,
    server_url: Url,
    batch_size: usize,
}

impl ObjectController {
    pub fn new(runner: Arc<CommandRunner>, decoder: Arc<Decoder>) -> SyncResult<Self> {
        let config = runner.config();
        let server_url = Url::parse(&config.server_url)
            .map_err(|e| SyncError::Config(format!("invalid server_url {}: {e}", config.server_url)))?;
        let batch_size = config.batch_size.max(1);
        Ok(Self {
            runner,
            decoder,
            server_url,
            batch_size,
        })
    }

    fn decode(&self, body: &JsonMap, class_name: &str) -> SyncResult<ObjectState> {
        Ok(decode_state(body, class_name, &self.decoder)?)
    }

    fn require_id(state: &ObjectState) -> SyncResult<&str> {
        state.object_id().ok_or_else(|| {
            SyncError::InvalidState(format!(
                "{} has no object id; save it first",
                state.class_name()
            ))
        })
    }

    fn save_command(
        state: &ObjectState,
        operations: &OperationSet,
        session_token: Option<&str>,
    ) -> SyncResult<Command> {
        let body = JsonValue::Object(encode_operations(operations)?);
        let command = match state.object_id() {
            Some(id) => Command::new(Method::Put, class_path(state.class_name(), Some(id))),
            None => Command::new(Method::Post, class_path(state.class_name(), None)),
        };
        Ok(command
            .with_body(body)
            .with_session_token(session_token.map(str::to_string)))
    }

    fn delete_command(state: &ObjectState, session_token: Option<&str>) -> SyncResult<Command> {
        let id = Self::require_id(state)?;
        Ok(Command::new(Method::Delete, class_path(state.class_name(), Some(id)))
            .with_session_token(session_token.map(str::to_string)))
    }

    /// Fetches the server state of a saved entity.
    pub async fn fetch(
        &self,
        state: &ObjectState,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<ObjectState> {
        let id = Self::require_id(state)?;
        let command = Command::new(Method::Get, class_path(state.class_name(), Some(id)))
            .with_session_token(session_token.map(str::to_string));
        let response = self.runner.run_command(command, cancel).await?;
        let fetched = self.decode(&response.body, state.class_name())?;
        debug!(class = %state.class_name(), object_id = id, "fetched");
        Ok(fetched.mutated(|s| s.is_new = false))
    }

    /// Saves `operations` against `state`.
    ///
    /// New entities are created with `POST`, existing ones updated with
    /// `PUT`. The returned state is new exactly when the server answered 201.
    pub async fn save(
        &self,
        state: &ObjectState,
        operations: &OperationSet,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<ObjectState> {
        let command = Self::save_command(state, operations, session_token)?;
        let response = self.runner.run_command(command, cancel).await?;
        let saved = self.decode(&response.body, state.class_name())?;
        debug!(class = %state.class_name(), status = response.status, "saved");
        Ok(saved.mutated(|s| s.is_new = response.status == 201))
    }

    /// Deletes a saved entity.
    pub async fn delete(
        &self,
        state: &ObjectState,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let command = Self::delete_command(state, session_token)?;
        self.runner.run_command(command, cancel).await?;
        debug!(class = %state.class_name(), object_id = ?state.object_id(), "deleted");
        Ok(())
    }

    /// Saves many entities through the batch endpoint.
    ///
    /// Results are positional. An entity created by the batch is reported as
    /// new.
    pub async fn save_all(
        &self,
        items: &[(ObjectState, OperationSet)],
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<SyncResult<ObjectState>> {
        let mut results: Vec<Option<SyncResult<ObjectState>>> = Vec::with_capacity(items.len());
        let mut commands = Vec::new();
        let mut slots = Vec::new();
        for (index, (state, operations)) in items.iter().enumerate() {
            match Self::save_command(state, operations, session_token) {
                Ok(command) => {
                    commands.push(command);
                    slots.push(index);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let responses = self.execute_batch_requests(commands, session_token, cancel).await;
        for (index, response) in slots.into_iter().zip(responses) {
            let state = &items[index].0;
            let was_new = state.object_id().is_none();
            results[index] = Some(response.and_then(|body| {
                let saved = self.decode(&body, state.class_name())?;
                Ok(saved.mutated(|s| s.is_new = was_new))
            }));
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(SyncError::InvalidState("missing batch result".into())))
            })
            .collect()
    }

    /// Deletes many entities through the batch endpoint. Results are positional.
    pub async fn delete_all(
        &self,
        states: &[ObjectState],
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<SyncResult<()>> {
        let mut results: Vec<Option<SyncResult<()>>> = Vec::with_capacity(states.len());
        let mut commands = Vec::new();
        let mut slots = Vec::new();
        for (index, state) in states.iter().enumerate() {
            match Self::delete_command(state, session_token) {
                Ok(command) => {
                    commands.push(command);
                    slots.push(index);
                    results.push(None);
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let responses = self.execute_batch_requests(commands, session_token, cancel).await;
        for (index, response) in slots.into_iter().zip(responses) {
            results[index] = Some(response.map(|_| ()));
        }
        results
            .into_iter()
            .map(|r| {
                r.unwrap_or_else(|| Err(SyncError::InvalidState("missing batch result".into())))
            })
            .collect()
    }

    /// Runs `commands` through the batch endpoint, at most `batch_size` per
    /// call, with the calls dispatched concurrently.
    ///
    /// Returns one result per command, in order.
    pub async fn execute_batch_requests(
        &self,
        commands: Vec<Command>,
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<SyncResult<JsonMap>> {
        if commands.is_empty() {
            return Vec::new();
        }
        debug!(
            count = commands.len(),
            batch_size = self.batch_size,
            "dispatching batch"
        );
        let chunks = commands
            .chunks(self.batch_size)
            .map(|chunk| self.execute_chunk(chunk, session_token, cancel));
        join_all(chunks).await.into_iter().flatten().collect()
    }

    fn batch_entry(&self, command: &Command) -> SyncResult<JsonValue> {
        let url = self
            .server_url
            .join(&command.path)
            .map_err(|e| SyncError::InvalidState(format!("invalid path {}: {e}", command.path)))?;
        let mut entry = json!({
            "method": command.method.as_str(),
            "path": url.path(),
        });
        if let (Some(body), Some(map)) = (&command.body, entry.as_object_mut()) {
            map.insert("body".into(), body.clone());
        }
        Ok(entry)
    }

    async fn execute_chunk(
        &self,
        chunk: &[Command],
        session_token: Option<&str>,
        cancel: &CancellationToken,
    ) -> Vec<SyncResult<JsonMap>> {
        let fail_all = |e: SyncError| -> Vec<SyncResult<JsonMap>> {
            chunk.iter().map(|_| Err(e.fan_out())).collect()
        };

        let requests = match chunk
            .iter()
            .map(|command| self.batch_entry(command))
            .collect::<SyncResult<Vec<_>>>()
        {
            Ok(requests) => requests,
            Err(e) => return fail_all(e),
        };
        let command = Command::new(Method::Post, BATCH_PATH)
            .with_body(json!({ "requests": requests }))
            .with_session_token(session_token.map(str::to_string));

        let response = match self.runner.run_command(command, cancel).await {
            Ok(response) => response,
            Err(e) => {
                debug!(count = chunk.len(), "batch call failed: {e}");
                return fail_all(e);
            }
        };

        let results: &[JsonValue] = match response.body.get("results") {
            Some(JsonValue::Array(results)) => results.as_slice(),
            _ => &[],
        };
        if results.len() != chunk.len() {
            warn!(
                expected = chunk.len(),
                actual = results.len(),
                "batch result count mismatch"
            );
            return fail_all(SyncError::BatchCountMismatch {
                expected: chunk.len(),
                actual: results.len(),
            });
        }

        results.iter().map(batch_item_result).collect()
    }
}

fn batch_item_result(item: &JsonValue) -> SyncResult<JsonMap> {
    if let Some(JsonValue::Object(success)) = item.get("success") {
        return Ok(success.clone());
    }
    if let Some(error) = item.get("error") {
        let code = error
            .get("code")
            .and_then(JsonValue::as_i64)
            .map_or(ErrorCode::OTHER_CAUSE, ErrorCode);
        let message = error
            .get("error")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(SyncError::server(code, message));
    }
    Err(SyncError::InvalidState("invalid batch command response".into()))
}
