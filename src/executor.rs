//! Serialized command execution.
//!
//! One task owns the [`Engine`] and drains a bounded command queue. Queries answer
//! over oneshot channels. Effects are handed to spawned delivery tasks, so a slow
//! Bot API call never stalls ingestion. Broadcast handles come back through the
//! same queue as `RecordHandles`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::destinations::DestinationStore;
use crate::engine::{
    Effect, Engine, HistorySnapshot, InfoSnapshot, IngestOutcome, StatsSnapshot, StatusSnapshot,
};
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::transport::Broadcaster;
use crate::types::{Counters, DestinationId, GapMode, MessageHandle, Parity, ParityPair, ResetReason};

const COMMAND_QUEUE_CAPACITY: usize = 256;

pub enum EngineCommand {
    Ingest {
        text: String,
        is_edit: bool,
        received_at: DateTime<Utc>,
        reply: Option<oneshot::Sender<IngestOutcome>>,
    },
    RecordHandles {
        target_game: u64,
        handles: BTreeMap<DestinationId, MessageHandle>,
    },
    CheckTimeout {
        now: DateTime<Utc>,
    },
    Reset {
        reason: ResetReason,
        now: DateTime<Utc>,
        reply: Option<oneshot::Sender<()>>,
    },
    Status(oneshot::Sender<StatusSnapshot>),
    Info(oneshot::Sender<InfoSnapshot>),
    History {
        n: usize,
        reply: oneshot::Sender<HistorySnapshot>,
    },
    Stats(oneshot::Sender<StatsSnapshot>),
    SetMode {
        mode: GapMode,
        reply: oneshot::Sender<ParityPair>,
    },
    SetGap {
        parity: Parity,
        value: u32,
        reply: oneshot::Sender<Result<ParityPair, EngineError>>,
    },
    AddDestination {
        id: DestinationId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    RemoveDestination {
        id: DestinationId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ListDestinations(oneshot::Sender<Vec<DestinationId>>),
}

/// Cloneable front door to the executor task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

fn closed() -> anyhow::Error {
    anyhow!("engine executor has stopped")
}

impl EngineHandle {
    async fn submit(&self, cmd: EngineCommand) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| closed())
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.submit(make(reply)).await?;
        rx.await.map_err(|_| closed())
    }

    pub async fn ingest(&self, text: String, is_edit: bool) -> Result<IngestOutcome> {
        self.ask(|reply| EngineCommand::Ingest {
            text,
            is_edit,
            received_at: Utc::now(),
            reply: Some(reply),
        })
        .await
    }

    pub async fn check_timeout(&self) -> Result<()> {
        self.check_timeout_at(Utc::now()).await
    }

    pub async fn check_timeout_at(&self, now: DateTime<Utc>) -> Result<()> {
        self.submit(EngineCommand::CheckTimeout { now }).await
    }

    pub async fn reset(&self, reason: ResetReason) -> Result<()> {
        self.ask(|reply| EngineCommand::Reset {
            reason,
            now: Utc::now(),
            reply: Some(reply),
        })
        .await
    }

    pub async fn get_status(&self) -> Result<StatusSnapshot> {
        self.ask(EngineCommand::Status).await
    }

    pub async fn get_info(&self) -> Result<InfoSnapshot> {
        self.ask(EngineCommand::Info).await
    }

    pub async fn get_history(&self, n: usize) -> Result<HistorySnapshot> {
        self.ask(|reply| EngineCommand::History { n, reply }).await
    }

    pub async fn get_stats(&self) -> Result<StatsSnapshot> {
        self.ask(EngineCommand::Stats).await
    }

    pub async fn set_mode(&self, mode: GapMode) -> Result<ParityPair> {
        self.ask(|reply| EngineCommand::SetMode { mode, reply }).await
    }

    pub async fn set_gap(&self, parity: Parity, value: u32) -> Result<Result<ParityPair, EngineError>> {
        self.ask(|reply| EngineCommand::SetGap {
            parity,
            value,
            reply,
        })
        .await
    }

    pub async fn add_destination(&self, id: DestinationId) -> Result<Result<(), EngineError>> {
        self.ask(|reply| EngineCommand::AddDestination { id, reply })
            .await
    }

    pub async fn remove_destination(&self, id: DestinationId) -> Result<Result<(), EngineError>> {
        self.ask(|reply| EngineCommand::RemoveDestination { id, reply })
            .await
    }

    pub async fn list_destinations(&self) -> Result<Vec<DestinationId>> {
        self.ask(EngineCommand::ListDestinations).await
    }
}

pub struct Executor {
    engine: Engine,
    broadcaster: Broadcaster,
    metrics: Metrics,
    store: Option<DestinationStore>,
    /// Weak so the queue closes once every external handle is dropped.
    loopback: mpsc::WeakSender<EngineCommand>,
}

/// Create the queue and its handle. Pass the receiver to [`run_executor`].
pub fn create_engine_channel() -> (EngineHandle, mpsc::Receiver<EngineCommand>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    (EngineHandle { tx }, rx)
}

impl Executor {
    pub fn new(
        engine: Engine,
        broadcaster: Broadcaster,
        metrics: Metrics,
        store: Option<DestinationStore>,
        handle: &EngineHandle,
    ) -> Self {
        Self {
            engine,
            broadcaster,
            metrics,
            store,
            loopback: handle.tx.downgrade(),
        }
    }

    fn handle(&mut self, cmd: EngineCommand) {
        let before = self.engine.counters();
        match cmd {
            EngineCommand::Ingest {
                text,
                is_edit,
                received_at,
                reply,
            } => {
                let report = self.engine.ingest(&text, is_edit, received_at);
                self.count_outcome(&report.outcome);
                self.dispatch(report.effects);
                if let Some(reply) = reply {
                    let _ = reply.send(report.outcome);
                }
            }
            EngineCommand::RecordHandles {
                target_game,
                handles,
            } => {
                let effects = self.engine.record_handles(target_game, handles);
                self.dispatch(effects);
            }
            EngineCommand::CheckTimeout { now } => {
                let effects = self.engine.check_timeout(now);
                if !effects.is_empty() {
                    self.metrics.engine_resets.inc();
                }
                self.dispatch(effects);
            }
            EngineCommand::Reset { reason, now, reply } => {
                let effects = self.engine.reset(reason, now);
                self.metrics.engine_resets.inc();
                self.dispatch(effects);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
            }
            EngineCommand::Status(reply) => {
                let _ = reply.send(self.engine.get_status());
            }
            EngineCommand::Info(reply) => {
                let _ = reply.send(self.engine.get_info());
            }
            EngineCommand::History { n, reply } => {
                let _ = reply.send(self.engine.get_history(n));
            }
            EngineCommand::Stats(reply) => {
                let _ = reply.send(self.engine.get_stats());
            }
            EngineCommand::SetMode { mode, reply } => {
                let _ = reply.send(self.engine.set_mode(mode));
            }
            EngineCommand::SetGap {
                parity,
                value,
                reply,
            } => {
                let _ = reply.send(self.engine.set_gap(parity, value));
            }
            EngineCommand::AddDestination { id, reply } => {
                let result = self.engine.add_destination(id);
                if result.is_ok() {
                    self.persist_destinations();
                }
                let _ = reply.send(result);
            }
            EngineCommand::RemoveDestination { id, reply } => {
                let result = self.engine.remove_destination(id);
                if result.is_ok() {
                    self.persist_destinations();
                }
                let _ = reply.send(result);
            }
            EngineCommand::ListDestinations(reply) => {
                let _ = reply.send(self.engine.list_destinations());
            }
        }
        self.update_gauges(before);
    }

    fn count_outcome(&self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Recorded { .. } => self.metrics.observations_recorded.inc(),
            IngestOutcome::DuplicateGame { .. } | IngestOutcome::Stale { .. } => {
                self.metrics.duplicate_games.inc()
            }
            IngestOutcome::MissingTotal { .. } => self.metrics.missing_totals.inc(),
            IngestOutcome::Pending { .. } => self.metrics.pending_games.inc(),
            IngestOutcome::Ignored(_) => {}
        }
    }

    fn update_gauges(&self, before: Counters) {
        let after = self.engine.counters();
        self.metrics
            .predictions_opened
            .add(after.predictions_made.saturating_sub(before.predictions_made));
        self.metrics
            .predictions_won
            .add(after.predictions_won.saturating_sub(before.predictions_won));
        self.metrics
            .predictions_lost
            .add(after.predictions_lost.saturating_sub(before.predictions_lost));

        let thresholds = self.engine.thresholds();
        self.metrics.history_size.set(self.engine.history_len() as i64);
        self.metrics.even_threshold.set(thresholds.even as i64);
        self.metrics.odd_threshold.set(thresholds.odd as i64);
    }

    fn persist_destinations(&self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(&self.engine.list_destinations()) {
            error!(error = %e, "Failed to persist destinations");
        }
    }

    /// Hand every effect to its own delivery task.
    fn dispatch(&self, effects: Vec<Effect>) {
        for effect in effects {
            let broadcaster = self.broadcaster.clone();
            match effect {
                Effect::Broadcast {
                    target_game,
                    text,
                    destinations,
                } => {
                    let loopback = self.loopback.clone();
                    tokio::spawn(async move {
                        let handles = broadcaster.broadcast(&destinations, &text).await;
                        if handles.is_empty() {
                            warn!(target_game, "[EXEC] prediction reached no destination");
                            return;
                        }
                        let Some(tx) = loopback.upgrade() else {
                            return;
                        };
                        let _ = tx
                            .send(EngineCommand::RecordHandles {
                                target_game,
                                handles,
                            })
                            .await;
                    });
                }
                Effect::EditBroadcast {
                    target_game,
                    refs,
                    text,
                } => {
                    tokio::spawn(async move {
                        let ok = broadcaster.edit_all(&refs, &text).await;
                        info!(target_game, edited = ok, total = refs.len(), "[EXEC] prediction messages updated");
                    });
                }
                Effect::NotifyAdmin(text) => {
                    tokio::spawn(async move {
                        broadcaster.notify_admin(&text).await;
                    });
                }
            }
        }
    }
}

/// Drain commands until every [`EngineHandle`] is dropped.
pub async fn run_executor(mut rx: mpsc::Receiver<EngineCommand>, mut executor: Executor) {
    info!(
        destinations = executor.engine.list_destinations().len(),
        mode = %executor.engine.mode(),
        "[EXEC] engine executor started"
    );
    while let Some(cmd) = rx.recv().await {
        executor.handle(cmd);
    }
    info!("[EXEC] engine executor stopped");
}
