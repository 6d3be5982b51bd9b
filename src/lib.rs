//! # Queue Client
//!
//! A polling message-queue client: connect with credentials, resolve queues,
//! and send, long-poll, and acknowledge messages with at-least-once delivery.
//!
//! ## Features
//!
//! - Long-poll receive with a per-queue wait and visibility timeout
//! - Typed errors that keep the classified remote fault as their source
//! - "No message" is an empty result, not an error
//! - Cancellable receives
//! - A pluggable transport: SQS via `aws-sdk-sqs`, or in-memory for tests
//! - A consumer loop that deletes messages its handlers accept
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rs_queue_client::client::connect;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = connect("http://localhost:4566", "access-id", "access-key")?;
//!     let queue = connection.resolve_queue("orders");
//!
//!     queue.send("hello").await?;
//!     if let Some(message) = queue.receive().await? {
//!         println!("{}: {}", message.id, message.body);
//!         queue.delete(&message.receipt_handle).await?;
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod consumer;
pub mod errors;
pub mod message;
pub mod queue;
pub mod transport;

pub use client::{ClientConnector, Connection, ConnectionConfig, connect};
pub use errors::{HandlerError, QueueClientError};
pub use message::MessageEnvelope;
pub use queue::{QueueAttributesSnapshot, QueueReference, QueueSettings};
pub use transport::{InMemoryTransport, QueueTransport, RemoteError, RemoteErrorKind};
