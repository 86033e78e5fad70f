//! Transport layer abstraction.
//!
//! The sync layer never opens sockets itself. Every command goes through a
//! [`Transport`], which reports the raw status and body of the response.
//! [`HttpTransport`] is the reqwest-backed implementation; [`mock`] holds a
//! scripted transport for tests.

use crate::command::{Command, Method};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Raw response of a transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Option<String>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(body.into()),
        }
    }
}

/// Executes commands against the remote store.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `command` and returns the raw response.
    ///
    /// Network failures are reported as errors; HTTP error statuses are not.
    /// A token cancelled before dispatch fails with [`SyncError::Cancelled`];
    /// a request already on the wire is allowed to finish.
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> SyncResult<TransportResponse>;
}

/// Transport over HTTP(S).
pub struct HttpTransport {
    base_url: Url,
    client: Client,
}

impl HttpTransport {
    /// Creates a transport for `server_url` with a per-request timeout.
    pub fn new(server_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Self::with_client(server_url, client)
    }

    /// Creates a transport reusing an existing HTTP client.
    pub fn with_client(server_url: &str, client: Client) -> SyncResult<Self> {
        let base_url = Url::parse(server_url)
            .map_err(|e| SyncError::Config(format!("invalid server_url {server_url}: {e}")))?;
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> SyncResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| SyncError::Transport(format!("invalid path {path}: {e}")))
    }
}

fn http_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> SyncResult<TransportResponse> {
        let url = self.url(&command.path)?;
        debug!(method = %command.method, %url, "sending command");

        let mut request = self.client.request(http_method(command.method), url);
        for (name, value) in &command.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &command.body {
            request = request.body(serde_json::to_vec(body)?);
        }

        // A sent request runs to completion; the runner reports cancellation.
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("request failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("failed to read response: {e}")))?;

        Ok(TransportResponse {
            status,
            body: (!body.is_empty()).then_some(body),
        })
    }
}

/// A scripted transport for testing.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, MutexGuard};

    type Handler = Arc<dyn Fn(&Command) -> SyncResult<TransportResponse> + Send + Sync>;

    enum Scripted {
        Response(TransportResponse),
        Failure(String),
    }

    #[derive(Default)]
    struct MockState {
        scripted: VecDeque<Scripted>,
        handler: Option<Handler>,
        requests: Vec<Command>,
    }

    /// Answers commands from a script and records every command it sees.
    ///
    /// Scripted responses are consumed first, in order; once the script is
    /// exhausted the handler (if any) answers.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> MutexGuard<'_, MockState> {
            self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
        }

        /// Queues a response with a JSON body.
        pub fn push_json(&self, status: u16, body: serde_json::Value) {
            self.push_response(TransportResponse::new(status, body.to_string()));
        }

        /// Queues a raw response.
        pub fn push_response(&self, response: TransportResponse) {
            self.lock().scripted.push_back(Scripted::Response(response));
        }

        /// Queues a transport failure.
        pub fn push_failure(&self, message: impl Into<String>) {
            self.lock().scripted.push_back(Scripted::Failure(message.into()));
        }

        /// Answers every unscripted command with `handler`.
        pub fn set_handler(
            &self,
            handler: impl Fn(&Command) -> SyncResult<TransportResponse> + Send + Sync + 'static,
        ) {
            self.lock().handler = Some(Arc::new(handler));
        }

        /// Commands seen so far, in arrival order.
        pub fn requests(&self) -> Vec<Command> {
            self.lock().requests.clone()
        }

        pub fn request_count(&self) -> usize {
            self.lock().requests.len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn execute(
            &self,
            command: &Command,
            cancel: &CancellationToken,
        ) -> SyncResult<TransportResponse> {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let (scripted, handler) = {
                let mut state = self.lock();
                state.requests.push(command.clone());
                (state.scripted.pop_front(), state.handler.clone())
            };
            match (scripted, handler) {
                (Some(Scripted::Response(response)), _) => Ok(response),
                (Some(Scripted::Failure(message)), _) => Err(SyncError::Transport(message)),
                (None, Some(handler)) => handler(command),
                (None, None) => Err(SyncError::Transport(format!(
                    "no scripted response for {} {}",
                    command.method, command.path
                ))),
            }
        }
    }
}
