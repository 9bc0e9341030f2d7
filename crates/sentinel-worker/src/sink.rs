//! Alert delivery.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use sentinel_models::Alert;

use crate::error::{WorkerError, WorkerResult};

/// Destination for alerts.
///
/// Called at most once per alert, from the pipeline that raised it.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn emit(&self, alert: Alert) -> WorkerResult<()>;
}

/// Writes each alert as a structured log event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn emit(&self, alert: Alert) -> WorkerResult<()> {
        let payload = serde_json::to_string(&alert)
            .map_err(|e| WorkerError::sink_failed(format!("serialize alert: {}", e)))?;
        let source = alert
            .source
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        warn!(
            alert_id = %alert.id,
            source = %source,
            label = %alert.label,
            confidence = alert.confidence,
            duration_secs = alert.streak_duration_secs(),
            payload = %payload,
            "ALERT"
        );
        Ok(())
    }
}

/// Forwards alerts to an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Alert>,
}

impl ChannelSink {
    /// Sink plus the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn from_sender(tx: mpsc::Sender<Alert>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for ChannelSink {
    async fn emit(&self, alert: Alert) -> WorkerResult<()> {
        self.tx
            .send(alert)
            .await
            .map_err(|_| WorkerError::sink_failed("alert receiver dropped"))
    }
}
