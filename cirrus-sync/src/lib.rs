//! Ordering, dispatch and persistence for cirrus entities.
//!
//! `cirrus-model` mutates entities in memory; this crate sends those
//! mutations to the remote store and keeps the local side consistent while
//! requests are in flight.
//!
//! ## Components
//!
//! - **Queue**: per-resource [`OrderingQueue`]s, looked up by [`ResourceKey`]
//! - **Transport**: the [`Transport`] collaborator and its HTTP implementation
//! - **Runner**: adds headers to [`Command`]s and classifies responses
//! - **Object controller**: fetch, save and delete, with batching
//! - **Storage**: the [`Storage`] collaborator, in memory or in a JSON file
//! - **Current**: the persisted current user, installation and config
//! - **Users / cloud**: sign up, log in, session lookup and server functions
//! - **Client**: the context struct tying them together
//!
//! ## Save flow
//!
//! 1. Referenced entities that are new or dirty are saved first, in batches
//! 2. The entity's pending operations are snapshotted in submission order
//! 3. The save waits for earlier work queued on the same entity
//! 4. On success the snapshot folds into the server state; on failure it
//!    merges back under operations made since
//!
//! # Example
//!
//! ```
//! use cirrus_sync::transport::mock::MockTransport;
//! use cirrus_sync::{Client, ClientConfig, MemoryStorage};
//! use std::sync::Arc;
//!
//! let config = ClientConfig::new("https://api.example.com/1/", "my-app");
//! let client = Client::new(
//!     config,
//!     Arc::new(MockTransport::new()),
//!     Arc::new(MemoryStorage::new()),
//! )
//! .unwrap();
//!
//! let note = client.create("Note");
//! note.set("title", "hello").unwrap();
//! assert!(note.is_dirty());
//! ```

mod client;
pub mod cloud;
pub mod command;
mod config;
pub mod current;
mod error;
mod installation_id;
pub mod object_controller;
pub mod queue;
pub mod runner;
pub mod storage;
pub mod transport;
pub mod user_controller;

pub use client::Client;
pub use cloud::CloudController;
pub use command::{Command, Method};
pub use config::{ClientConfig, MAX_BATCH_SIZE};
pub use current::{ConfigController, CurrentEntityController, CurrentUserController, RemoteConfig};
pub use error::{ErrorCode, SyncError, SyncResult};
pub use installation_id::InstallationIdController;
pub use object_controller::ObjectController;
pub use queue::{enqueue_for_all, OrderingQueue, Predecessor, PredecessorOutcome, QueueRegistry, ResourceKey};
pub use runner::{CommandResponse, CommandRunner};
pub use storage::{FileStorage, KeyValueStore, MemoryStorage, Storage};
pub use transport::{HttpTransport, Transport, TransportResponse};
pub use user_controller::UserController;
