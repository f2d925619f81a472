//! Outbound messaging seam and the fan-out broadcaster built on it.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::metrics::Metrics;
use crate::types::{DestinationId, MessageHandle};

/// Send and edit text messages on some chat platform.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        destination: DestinationId,
        text: &str,
    ) -> Result<MessageHandle, TransportError>;

    async fn edit(
        &self,
        destination: DestinationId,
        handle: MessageHandle,
        text: &str,
    ) -> Result<(), TransportError>;
}

/// Delivers effects to many destinations at once. A failing destination is logged
/// and skipped; it never aborts delivery to the others.
#[derive(Clone)]
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    metrics: Metrics,
    admin_chat: Option<DestinationId>,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        metrics: Metrics,
        admin_chat: Option<DestinationId>,
    ) -> Self {
        Self {
            transport,
            metrics,
            admin_chat,
        }
    }

    /// Send `text` to every destination concurrently. Returns the handles of the
    /// deliveries that succeeded.
    pub async fn broadcast(
        &self,
        destinations: &[DestinationId],
        text: &str,
    ) -> BTreeMap<DestinationId, MessageHandle> {
        let sends = destinations.iter().map(|&dest| async move {
            (dest, self.transport.send(dest, text).await)
        });

        let mut handles = BTreeMap::new();
        for (dest, result) in join_all(sends).await {
            match result {
                Ok(handle) => {
                    self.metrics.record_transport(true);
                    debug!(destination = dest, handle = %handle, "[BCAST] delivered");
                    handles.insert(dest, handle);
                }
                Err(e) => {
                    self.metrics.record_transport(false);
                    warn!(
                        event = "delivery_failed",
                        destination = dest,
                        error = %e,
                        "[BCAST] ⚠️ send failed, skipping destination"
                    );
                }
            }
        }
        info!(
            delivered = handles.len(),
            requested = destinations.len(),
            "[BCAST] broadcast complete"
        );
        handles
    }

    /// Edit every referenced message. Returns how many edits succeeded.
    pub async fn edit_all(&self, refs: &[(DestinationId, MessageHandle)], text: &str) -> usize {
        let edits = refs.iter().map(|&(dest, handle)| async move {
            (dest, self.transport.edit(dest, handle, text).await)
        });

        let mut ok = 0;
        for (dest, result) in join_all(edits).await {
            match result {
                Ok(()) => {
                    self.metrics.record_transport(true);
                    ok += 1;
                }
                Err(e) => {
                    self.metrics.record_transport(false);
                    warn!(
                        event = "edit_failed",
                        destination = dest,
                        error = %e,
                        "[BCAST] ⚠️ edit failed"
                    );
                }
            }
        }
        ok
    }

    /// Best-effort operator notification; a no-op when no admin is configured.
    pub async fn notify_admin(&self, text: &str) {
        let Some(admin) = self.admin_chat else {
            return;
        };
        match self.transport.send(admin, text).await {
            Ok(_) => self.metrics.record_transport(true),
            Err(e) => {
                self.metrics.record_transport(false);
                warn!(error = %e, "Failed to notify admin");
            }
        }
    }

    /// Direct reply to a command sender.
    pub async fn reply(&self, chat: DestinationId, text: &str) -> Result<(), TransportError> {
        let result = self.transport.send(chat, text).await.map(|_| ());
        self.metrics.record_transport(result.is_ok());
        result
    }
}
