//! Executor + broadcaster behavior against an in-memory transport.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parity_streak_bot::engine::{Engine, EngineConfig, IngestOutcome};
use parity_streak_bot::error::TransportError;
use parity_streak_bot::executor::{
    create_engine_channel, run_executor, EngineCommand, EngineHandle, Executor,
};
use parity_streak_bot::commands;
use parity_streak_bot::destinations::DestinationStore;
use parity_streak_bot::metrics::Metrics;
use parity_streak_bot::retry::RetryPolicy;
use parity_streak_bot::supervisor;
use parity_streak_bot::telegram::Inbound;
use parity_streak_bot::transport::{Broadcaster, Transport};
use parity_streak_bot::types::{DestinationId, MessageHandle, Parity, ResetReason};

const ADMIN: i64 = 999;

#[derive(Default)]
struct MockTransport {
    failing: Vec<DestinationId>,
    send_delay: Option<Duration>,
    next_id: AtomicI64,
    sends: Mutex<Vec<(DestinationId, String)>>,
    edits: Mutex<Vec<(DestinationId, MessageHandle, String)>>,
}

impl MockTransport {
    fn sends_to(&self, dest: DestinationId) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == dest)
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn edits(&self) -> Vec<(DestinationId, MessageHandle, String)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        destination: DestinationId,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        if let Some(delay) = self.send_delay {
            if destination != ADMIN {
                tokio::time::sleep(delay).await;
            }
        }
        if self.failing.contains(&destination) {
            return Err(TransportError::Api {
                code: 400,
                description: "Bad Request: chat not found".to_string(),
                retry_after_secs: None,
            });
        }
        self.sends
            .lock()
            .unwrap()
            .push((destination, text.to_string()));
        Ok(MessageHandle(1000 + self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    async fn edit(
        &self,
        destination: DestinationId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), TransportError> {
        self.edits
            .lock()
            .unwrap()
            .push((destination, handle, text.to_string()));
        Ok(())
    }
}

fn spawn_bot(transport: Arc<MockTransport>, destinations: Vec<DestinationId>) -> (EngineHandle, Metrics) {
    spawn_bot_with_store(transport, destinations, None)
}

fn spawn_bot_with_store(
    transport: Arc<MockTransport>,
    destinations: Vec<DestinationId>,
    store: Option<DestinationStore>,
) -> (EngineHandle, Metrics) {
    let metrics = Metrics::new();
    let engine = Engine::new(
        EngineConfig {
            history_capacity: 5,
            ..EngineConfig::default()
        },
        destinations,
    );
    let broadcaster = Broadcaster::new(transport, metrics.clone(), Some(ADMIN));
    let (handle, rx) = create_engine_channel();
    let executor = Executor::new(engine, broadcaster, metrics.clone(), store, &handle);
    tokio::spawn(run_executor(rx, executor));
    (handle, metrics)
}

async fn feed(handle: &EngineHandle, game: u64, total: u32) -> IngestOutcome {
    handle
        .ingest(format!("✅ #N{} #T{}", game, total), false)
        .await
        .unwrap()
}

/// Five even games fill the window and open an ODD prediction for game 6.
async fn open_prediction(handle: &EngineHandle) {
    for g in 1..=5 {
        feed(handle, g, 2).await;
    }
    let status = handle.get_status().await.unwrap();
    let open = status.open_prediction.expect("prediction opened");
    assert_eq!(open.target_game, 6);
    assert_eq!(open.predicted, Parity::Odd);
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn test_partial_delivery_records_only_successful_handles() {
    let transport = Arc::new(MockTransport {
        failing: vec![-2],
        ..Default::default()
    });
    let (handle, metrics) = spawn_bot(transport.clone(), vec![-1, -2]);
    open_prediction(&handle).await;

    for _ in 0..200 {
        let status = handle.get_status().await.unwrap();
        if status
            .open_prediction
            .map(|p| p.broadcast_refs.len() == 1)
            .unwrap_or(false)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(metrics.transport_failures.get(), 1);

    feed(&handle, 6, 2).await;
    feed(&handle, 7, 4).await;
    feed(&handle, 8, 6).await;

    let t = transport.clone();
    wait_until(move || !t.edits().is_empty()).await;
    let edits = transport.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, -1);
    assert!(edits[0].2.contains("LOST"));
    assert_eq!(metrics.predictions_lost.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resolution_before_delivery_applies_final_edit_late() {
    let transport = Arc::new(MockTransport {
        send_delay: Some(Duration::from_secs(5)),
        ..Default::default()
    });
    let (handle, _metrics) = spawn_bot(transport.clone(), vec![-1]);
    open_prediction(&handle).await;

    // Resolves immediately while the broadcast is still in flight.
    feed(&handle, 6, 3).await;
    assert!(transport.edits().is_empty());

    let t = transport.clone();
    wait_until(move || !t.edits().is_empty()).await;
    let edits = transport.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, -1);
    assert!(edits[0].2.contains("✅0️⃣"));
}

#[tokio::test]
async fn test_admin_is_notified_of_open_and_reset() {
    let transport = Arc::new(MockTransport::default());
    let (handle, metrics) = spawn_bot(transport.clone(), vec![-1]);
    open_prediction(&handle).await;
    handle.reset(ResetReason::Admin).await.unwrap();

    let t = transport.clone();
    wait_until(move || t.sends_to(ADMIN).len() >= 2).await;
    let admin = transport.sends_to(ADMIN);
    assert!(admin.iter().any(|m| m.contains("New prediction")));
    assert!(admin.iter().any(|m| m.contains("Reset")));
    assert_eq!(metrics.engine_resets.get(), 1);

    let status = handle.get_status().await.unwrap();
    assert_eq!(status.history_len, 0);
    assert!(status.open_prediction.is_none());
}

#[tokio::test]
async fn test_stuck_prediction_times_out() {
    let transport = Arc::new(MockTransport::default());
    let (handle, metrics) = spawn_bot(transport, vec![-1]);
    open_prediction(&handle).await;

    handle
        .check_timeout_at(Utc::now() + ChronoDuration::minutes(5))
        .await
        .unwrap();
    assert!(handle.get_status().await.unwrap().open_prediction.is_some());

    handle
        .check_timeout_at(Utc::now() + ChronoDuration::minutes(21))
        .await
        .unwrap();
    let status = handle.get_status().await.unwrap();
    assert!(status.open_prediction.is_none());
    assert_eq!(status.history_len, 0);
    assert_eq!(metrics.engine_resets.get(), 1);
}

#[tokio::test]
async fn test_destination_commands_are_validated() {
    let (handle, _) = spawn_bot(Arc::new(MockTransport::default()), vec![-1]);
    assert!(handle.add_destination(-5).await.unwrap().is_ok());
    assert!(handle.add_destination(-5).await.unwrap().is_err());
    assert!(handle.remove_destination(-77).await.unwrap().is_err());
    assert_eq!(handle.list_destinations().await.unwrap(), vec![-5, -1]);
    assert!(handle.set_gap(Parity::Even, 1).await.unwrap().is_err());
}

#[tokio::test]
async fn test_destination_changes_are_persisted() {
    let path = std::env::temp_dir().join(format!("dests_{}.json", uuid::Uuid::new_v4()));
    let store = DestinationStore::new(&path);
    let (handle, _) = spawn_bot_with_store(
        Arc::new(MockTransport::default()),
        vec![-1],
        Some(store.clone()),
    );

    handle.add_destination(-1009).await.unwrap().unwrap();
    assert_eq!(store.load(), Some(BTreeSet::from([-1009, -1])));

    handle.remove_destination(-1).await.unwrap().unwrap();
    assert_eq!(store.load(), Some(BTreeSet::from([-1009])));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_poller_enqueues_checks() {
    let (handle, mut rx) = create_engine_channel();
    let start = tokio::time::Instant::now();
    tokio::spawn(supervisor::run_timeout_poller(handle, Duration::from_secs(60)));

    let cmd = rx.recv().await.expect("poller sends a command");
    assert!(matches!(cmd, EngineCommand::CheckTimeout { .. }));
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_slow_command_reply_does_not_hold_up_feed() {
    let transport = Arc::new(MockTransport {
        send_delay: Some(Duration::from_secs(5)),
        ..Default::default()
    });
    let (handle, _) = spawn_bot(transport.clone(), vec![-1]);
    let broadcaster = Broadcaster::new(transport.clone(), Metrics::new(), None);
    let start = tokio::time::Instant::now();

    let reply = commands::handle_inbound(
        Inbound::Command {
            chat_id: 77,
            sender_id: 77,
            text: "/status".to_string(),
        },
        handle.clone(),
        broadcaster.clone(),
        0,
        RetryPolicy::default(),
    )
    .await
    .expect("commands produce a reply task");

    let fed = commands::handle_inbound(
        Inbound::FeedPost {
            text: "✅ #N1 #T2".to_string(),
            is_edit: false,
        },
        handle.clone(),
        broadcaster,
        0,
        RetryPolicy::default(),
    )
    .await;
    assert!(fed.is_none());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.get_status().await.unwrap().history_len, 1);
    assert!(transport.sends_to(77).is_empty());

    reply.await.unwrap();
    let sent = transport.sends_to(77);
    assert_eq!(sent.len(), 1);
    assert!(start.elapsed() >= Duration::from_secs(5));
}
