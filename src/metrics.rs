//! Process metrics for the prediction bot.
//!
//! Plain atomic counters and gauges, shared via `Arc` between the executor, the
//! transport and the health server, and rendered in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics registry
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Feed messages received (new and edited)
    pub messages_received: Arc<Counter>,
    /// Finalized games recorded into history
    pub observations_recorded: Arc<Counter>,
    /// Redelivered or out-of-window finalized games ignored
    pub duplicate_games: Arc<Counter>,
    /// Finalized messages without a total
    pub missing_totals: Arc<Counter>,
    /// In-progress messages parked
    pub pending_games: Arc<Counter>,

    pub predictions_opened: Arc<Counter>,
    pub predictions_won: Arc<Counter>,
    pub predictions_lost: Arc<Counter>,

    /// Broadcast and edit deliveries that succeeded
    pub deliveries_ok: Arc<Counter>,
    /// Send/edit/poll calls that failed
    pub transport_failures: Arc<Counter>,
    /// Failures since the last successful transport call
    pub consecutive_transport_failures: Arc<Gauge>,

    pub engine_resets: Arc<Counter>,

    pub history_size: Arc<Gauge>,
    pub even_threshold: Arc<Gauge>,
    pub odd_threshold: Arc<Gauge>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            messages_received: Arc::new(Counter::new(
                "messages_received",
                "Feed messages received",
            )),
            observations_recorded: Arc::new(Counter::new(
                "observations_recorded",
                "Finalized games recorded into history",
            )),
            duplicate_games: Arc::new(Counter::new(
                "duplicate_games",
                "Redelivered or out-of-window finalized games ignored",
            )),
            missing_totals: Arc::new(Counter::new(
                "missing_totals",
                "Finalized messages lacking a total marker",
            )),
            pending_games: Arc::new(Counter::new("pending_games", "In-progress messages seen")),
            predictions_opened: Arc::new(Counter::new(
                "predictions_opened",
                "Predictions opened",
            )),
            predictions_won: Arc::new(Counter::new("predictions_won", "Predictions won")),
            predictions_lost: Arc::new(Counter::new("predictions_lost", "Predictions lost")),
            deliveries_ok: Arc::new(Counter::new(
                "deliveries_ok",
                "Successful send and edit calls",
            )),
            transport_failures: Arc::new(Counter::new(
                "transport_failures",
                "Failed transport calls",
            )),
            consecutive_transport_failures: Arc::new(Gauge::new(
                "consecutive_transport_failures",
                "Transport failures since the last success",
            )),
            engine_resets: Arc::new(Counter::new("engine_resets", "Engine resets performed")),
            history_size: Arc::new(Gauge::new("history_size", "Games in the history window")),
            even_threshold: Arc::new(Gauge::new("even_threshold", "Active even gap threshold")),
            odd_threshold: Arc::new(Gauge::new("odd_threshold", "Active odd gap threshold")),
        }
    }

    /// Record a transport outcome and keep the consecutive-failure gauge current.
    pub fn record_transport(&self, ok: bool) {
        if ok {
            self.deliveries_ok.inc();
            self.consecutive_transport_failures.set(0);
        } else {
            self.transport_failures.inc();
            self.consecutive_transport_failures.inc();
        }
    }

    /// True once `limit` transport calls in a row have failed.
    pub fn is_degraded(&self, limit: u64) -> bool {
        self.consecutive_transport_failures.get() >= limit as i64
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let counters = [
            &self.messages_received,
            &self.observations_recorded,
            &self.duplicate_games,
            &self.missing_totals,
            &self.pending_games,
            &self.predictions_opened,
            &self.predictions_won,
            &self.predictions_lost,
            &self.deliveries_ok,
            &self.transport_failures,
            &self.engine_resets,
        ];
        let gauges = [
            &self.consecutive_transport_failures,
            &self.history_size,
            &self.even_threshold,
            &self.odd_threshold,
        ];

        let mut output = String::new();
        for c in counters {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n",
                name = c.name(),
                help = c.help,
                value = c.get()
            );
        }
        for g in gauges {
            let _ = write!(
                output,
                "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n",
                name = g.name(),
                help = g.help,
                value = g.get()
            );
        }
        output
    }

    /// Log a summary at shutdown.
    pub fn log_summary(&self) {
        tracing::info!("=== Metrics Summary ===");
        tracing::info!(
            "Feed: {} messages, {} recorded, {} duplicates, {} missing totals",
            self.messages_received.get(),
            self.observations_recorded.get(),
            self.duplicate_games.get(),
            self.missing_totals.get()
        );
        tracing::info!(
            "Predictions: {} opened, {} won, {} lost ({:.1}% win rate)",
            self.predictions_opened.get(),
            self.predictions_won.get(),
            self.predictions_lost.get(),
            self.win_rate()
        );
        tracing::info!(
            "Transport: {} ok, {} failed, {} resets",
            self.deliveries_ok.get(),
            self.transport_failures.get(),
            self.engine_resets.get()
        );
    }

    fn win_rate(&self) -> f64 {
        let settled = self.predictions_won.get() + self.predictions_lost.get();
        if settled == 0 {
            return 0.0;
        }
        self.predictions_won.get() as f64 / settled as f64 * 100.0
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomic counter for monotonically increasing metrics
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Atomic gauge; stored as u64, read back as i64 (two's complement)
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Gauge {
    pub fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value as u64, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed) as i64
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}
