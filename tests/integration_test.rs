//! Tests against a live SQS-compatible endpoint.
//!
//! Configure `QUEUE_ENDPOINT`, `QUEUE_ACCESS_ID`, `QUEUE_ACCESS_KEY` (and
//! optionally `QUEUE_REGION`) in the environment or a `.env` file, then run
//! `cargo test -- --ignored`.

use std::time::Duration;

use futures::TryStreamExt;
use rs_queue_client::consumer::QueueConsumer;
use rs_queue_client::{
    Connection, ConnectionConfig, HandlerError, MessageEnvelope, QueueClientError, QueueSettings,
    RemoteErrorKind,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;

fn live_connection() -> Connection {
    dotenvy::dotenv().ok();
    ConnectionConfig::from_env()
        .expect("QUEUE_ENDPOINT, QUEUE_ACCESS_ID and QUEUE_ACCESS_KEY must be set")
        .connect()
        .expect("Failed to connect")
}

fn unique_queue_name(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

fn test_settings() -> QueueSettings {
    QueueSettings {
        polling_wait_seconds: 5,
        visibility_timeout_seconds: 10,
    }
}

#[tokio::test]
#[ignore = "requires a live SQS endpoint"]
async fn test_live_round_trip() {
    let connection = live_connection();
    let name = unique_queue_name("rs-queue-client-roundtrip");

    connection
        .create_queue(&name, test_settings())
        .await
        .expect("Failed to create queue");

    let listed: Vec<String> = connection
        .list_queues(Some(&name))
        .try_collect()
        .await
        .expect("Failed to list queues");
    assert!(listed.contains(&name), "created queue should be listed");

    let queue = connection.resolve_queue_with(&name, test_settings());
    let id = queue.send("Test message 1").await.expect("Failed to send");

    let message = queue
        .receive()
        .await
        .expect("Failed to receive")
        .expect("message should arrive within the poll window");
    assert_eq!(message.id, id);
    assert_eq!(message.body, "Test message 1");

    queue
        .delete(&message.receipt_handle)
        .await
        .expect("Failed to delete");
    assert!(queue.receive().await.expect("Failed to receive").is_none());
}

#[tokio::test]
#[ignore = "requires a live SQS endpoint"]
async fn test_live_duplicate_queue_with_other_settings_is_rejected() {
    let connection = live_connection();
    let name = unique_queue_name("rs-queue-client-dup");

    connection
        .create_queue(&name, test_settings())
        .await
        .expect("Failed to create queue");

    let err = connection
        .create_queue(
            &name,
            QueueSettings {
                polling_wait_seconds: 1,
                visibility_timeout_seconds: 99,
            },
        )
        .await
        .unwrap_err();
    match err {
        QueueClientError::QueueCreation { source, .. } => {
            assert_eq!(source.kind, RemoteErrorKind::QueueAlreadyExist)
        }
        other => panic!("expected QueueCreation, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires a live SQS endpoint"]
async fn test_live_consumer_with_shutdown() {
    let connection = live_connection();
    let name = unique_queue_name("rs-queue-client-consumer");
    connection
        .create_queue(&name, test_settings())
        .await
        .expect("Failed to create queue");

    let queue = connection.resolve_queue_with(&name, test_settings());
    queue
        .send("Shutdown test message")
        .await
        .expect("Failed to send test message");

    let received = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut consumer = QueueConsumer::new();
    consumer.add_handler_fn(
        &queue,
        |message: MessageEnvelope, received: Arc<Mutex<Vec<String>>>| async move {
            received.lock().await.push(message.body);
            Ok::<(), HandlerError>(())
        },
        received.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let task =
        tokio::spawn(async move { consumer.start_all_handlers_with_shutdown(shutdown_rx).await });

    timeout(Duration::from_secs(30), async {
        while received.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    })
    .await
    .expect("Test timed out waiting for the message");

    let _ = shutdown_tx.send(());
    timeout(Duration::from_secs(10), task)
        .await
        .expect("Shutdown test timed out - handlers did not shut down gracefully")
        .unwrap();

    assert_eq!(queue.message_count().await.unwrap(), 0);
}
