//! Per-source detection pipeline.
//!
//! Frames flow strictly downstream:
//!
//! ```text
//! FrameSource -> FrameQueue -> batch -> Classifier -> Smoother -> AlertDecider -> AlertSink
//! ```
//!
//! Decoding runs on its own task and classification on the blocking pool.
//! Errors affecting single frames or batches are counted and skipped; only
//! configuration errors, a source that cannot be opened, or a classifier
//! that keeps failing end the pipeline with an error.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, warn};

use sentinel_media::{FrameDecoder, FrameSource};
use sentinel_ml::{AlertDecider, Classifier, MlError, ObservationContext, Preprocessor, Smoother};
use sentinel_models::{Frame, SourceId};

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StreamLogger;
use crate::metrics;
use crate::queue::FrameQueue;
use crate::sink::AlertSink;

/// Why a pipeline stopped without an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The source ran out of frames
    StreamEnded,
    /// Stopped through the cancellation handle
    Cancelled,
    /// Decoding failed mid-stream; frames decoded before the failure were processed
    SourceFailed(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::StreamEnded => write!(f, "stream_ended"),
            EndReason::Cancelled => write!(f, "cancelled"),
            EndReason::SourceFailed(message) => write!(f, "source_failed: {}", message),
        }
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub source: SourceId,
    /// Frames produced by sampling, valid or not
    pub sampled: u64,
    /// Frames with a prediction
    pub classified: u64,
    /// Frames evicted from a full queue
    pub dropped: u64,
    /// Degenerate or undecodable frames
    pub invalid: u64,
    /// Frames lost to classifier failures
    pub prediction_failures: u64,
    /// Alerts raised
    pub alerts: u64,
    /// Alerts the sink failed to accept
    pub sink_failures: u64,
    pub end_reason: EndReason,
}

impl PipelineReport {
    fn new(source: SourceId) -> Self {
        Self {
            source,
            sampled: 0,
            classified: 0,
            dropped: 0,
            invalid: 0,
            prediction_failures: 0,
            alerts: 0,
            sink_failures: 0,
            end_reason: EndReason::StreamEnded,
        }
    }
}

/// What the decoding task saw.
#[derive(Debug, Default)]
struct ProducerOutcome {
    sampled: u64,
    invalid: u64,
    failure: Option<String>,
}

/// Detection pipeline shared by every source it runs on.
///
/// Holds only read-only state; each [`Pipeline::run`] call owns its own
/// queue, smoother and decider.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    classifier: Arc<dyn Classifier>,
    sink: Arc<dyn AlertSink>,
}

impl Pipeline {
    /// Validate the configuration against the classifier and build a pipeline.
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn AlertSink>,
    ) -> WorkerResult<Self> {
        config.validate()?;
        if config.top_k > classifier.labels().len() {
            return Err(WorkerError::config_error(format!(
                "top_k {} exceeds {} labels",
                config.top_k,
                classifier.labels().len()
            )));
        }

        let pipeline = Self {
            config,
            classifier,
            sink,
        };
        pipeline.smoother()?;
        pipeline.decider(None)?;
        Ok(pipeline)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    fn smoother(&self) -> WorkerResult<Smoother> {
        Ok(Smoother::from_mode(
            self.config.smoothing,
            self.config.smoothing_alpha,
            self.config.majority_window,
        )?)
    }

    fn decider(&self, source: Option<&SourceId>) -> WorkerResult<AlertDecider> {
        let decider = AlertDecider::new(
            self.classifier.labels().clone(),
            self.config.threshold,
            self.config.consecutive,
        )?;
        Ok(match source {
            Some(source) => decider.with_source(source.clone()),
            None => decider,
        })
    }

    /// Open a source with FFmpeg and run until it ends or is cancelled.
    pub async fn run(
        &self,
        source: SourceId,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<PipelineReport> {
        let logger = StreamLogger::new(&source);
        let frames = match FrameSource::open(source, self.config.target_fps).await {
            Ok(frames) => frames,
            Err(e) => {
                logger.log_error(&format!("failed to open source: {}", e));
                return Err(e.into());
            }
        };
        self.run_source(frames, cancel).await
    }

    /// Run over an already-open frame source.
    pub async fn run_source<D>(
        &self,
        frames: FrameSource<D>,
        mut cancel: watch::Receiver<bool>,
    ) -> WorkerResult<PipelineReport>
    where
        D: FrameDecoder + 'static,
    {
        let source = frames.source().clone();
        let label = source.to_string();
        let logger = StreamLogger::new(&source);

        logger.log_start(&format!(
            "{}x{} at {:.2} fps, sampling every {} frames",
            frames.info().width,
            frames.info().height,
            frames.sampler().native_fps(),
            frames.sampler().interval()
        ));

        let queue = Arc::new(FrameQueue::new(
            self.config.queue_capacity,
            self.config.backpressure,
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let producer = tokio::spawn(produce(
            frames,
            Arc::clone(&queue),
            stop_rx,
            label.clone(),
        ));

        let mut report = PipelineReport::new(source);
        let outcome = self
            .consume(&queue, &mut cancel, &mut report, &label)
            .await;

        // Stop decoding and release the source whatever the outcome
        let _ = stop_tx.send(true);
        queue.close();
        let produced = producer
            .await
            .map_err(|e| WorkerError::task_failed(format!("decoder task: {}", e)))?;

        report.sampled = produced.sampled;
        report.invalid += produced.invalid;
        report.dropped = queue.dropped();

        let end_reason = match outcome {
            Ok(reason) => reason,
            Err(e) => {
                logger.log_error(&e.to_string());
                return Err(e);
            }
        };

        report.end_reason = match (end_reason, produced.failure) {
            (EndReason::StreamEnded, Some(message)) => {
                logger.log_warning(&format!("decoding stopped early: {}", message));
                EndReason::SourceFailed(message)
            }
            (reason, _) => reason,
        };

        logger.log_completion(&report);
        Ok(report)
    }

    async fn consume(
        &self,
        queue: &FrameQueue,
        cancel: &mut watch::Receiver<bool>,
        report: &mut PipelineReport,
        label: &str,
    ) -> WorkerResult<EndReason> {
        let labels = self.classifier.labels().clone();
        let mut smoother = self.smoother()?;
        let mut decider = self.decider(Some(&report.source))?;
        let mut failures = 0u32;
        let mut dropped_seen = 0u64;

        loop {
            let batch = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Ok(EndReason::Cancelled),
                batch = queue.next_batch(self.config.batch_size, self.config.batch_timeout) => batch,
            };
            let Some(batch) = batch else {
                return Ok(EndReason::StreamEnded);
            };

            let dropped = queue.dropped();
            metrics::record_dropped(label, dropped - dropped_seen);
            dropped_seen = dropped;

            let frames = self.discard_invalid(batch, report, label);
            if frames.is_empty() {
                continue;
            }

            let count = frames.len();
            let classifier = Arc::clone(&self.classifier);
            let started = Instant::now();
            let result = tokio::task::spawn_blocking(move || classifier.classify_batch(&frames)).await;

            if *cancel.borrow() {
                debug!(source = %label, frames = count, "Discarding in-flight batch after cancellation");
                return Ok(EndReason::Cancelled);
            }

            let predictions = match result {
                Ok(Ok(predictions)) if predictions.len() != count => {
                    let message = format!(
                        "classifier returned {} predictions for {} frames",
                        predictions.len(),
                        count
                    );
                    self.record_failure(&mut failures, count, &message, report, label)?;
                    continue;
                }
                Ok(Ok(predictions)) => predictions,
                Ok(Err(MlError::InvalidFrame { index, message })) => {
                    warn!(source = %label, frame = index, "Classifier rejected frame: {}", message);
                    report.invalid += count as u64;
                    continue;
                }
                Ok(Err(e)) if !e.is_recoverable() => return Err(e.into()),
                Ok(Err(e)) => {
                    self.record_failure(&mut failures, count, &e.to_string(), report, label)?;
                    continue;
                }
                Err(e) => {
                    self.record_failure(&mut failures, count, &format!("classifier task: {}", e), report, label)?;
                    continue;
                }
            };

            failures = 0;
            metrics::record_batch(label, count, started.elapsed().as_secs_f64());

            for prediction in predictions {
                report.classified += 1;

                let observation = match smoother.observe(&prediction, &labels) {
                    Ok(observation) => observation,
                    Err(e) => {
                        warn!(source = %label, frame = prediction.frame_index, error = %e, "Prediction outside label set");
                        report.prediction_failures += 1;
                        metrics::record_prediction_failure(label, 1);
                        continue;
                    }
                };

                debug!(
                    source = %label,
                    frame = prediction.frame_index,
                    label = %observation.label,
                    confidence = observation.confidence,
                    "Frame classified"
                );

                let context = ObservationContext::new(prediction.frame_index, prediction.timestamp);
                if let Some(alert) = decider.update(&observation, &context) {
                    report.alerts += 1;
                    metrics::record_alert(label, &alert.label);
                    if let Err(e) = self.sink.emit(alert).await {
                        warn!(source = %label, error = %e, "Failed to deliver alert");
                        report.sink_failures += 1;
                        metrics::record_sink_failure(label);
                    }
                }
            }
        }
    }

    /// Split off degenerate frames, counting them.
    fn discard_invalid(&self, batch: Vec<Frame>, report: &mut PipelineReport, label: &str) -> Vec<Frame> {
        batch
            .into_iter()
            .filter(|frame| match Preprocessor::validate(frame) {
                Ok(()) => true,
                Err(e) => {
                    debug!(source = %label, error = %e, "Skipping invalid frame");
                    report.invalid += 1;
                    metrics::record_invalid(label);
                    false
                }
            })
            .collect()
    }

    fn record_failure(
        &self,
        failures: &mut u32,
        frames: usize,
        message: &str,
        report: &mut PipelineReport,
        label: &str,
    ) -> WorkerResult<()> {
        *failures += 1;
        report.prediction_failures += frames as u64;
        metrics::record_prediction_failure(label, frames);
        warn!(
            source = %label,
            frames,
            consecutive_failures = *failures,
            "Prediction failed: {}",
            message
        );

        if *failures >= self.config.max_consecutive_failures {
            return Err(WorkerError::PersistentPredictionFailure {
                failures: *failures,
                last_error: message.to_string(),
            });
        }
        Ok(())
    }
}

/// Decode frames into the queue until the source ends or `stop` is set.
async fn produce<D: FrameDecoder>(
    mut frames: FrameSource<D>,
    queue: Arc<FrameQueue>,
    mut stop: watch::Receiver<bool>,
    label: String,
) -> ProducerOutcome {
    let mut outcome = ProducerOutcome::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = stopped(&mut stop) => break,
            next = frames.next_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                outcome.sampled += 1;
                metrics::record_sampled(&label);
                let pushed = tokio::select! {
                    biased;
                    _ = stopped(&mut stop) => break,
                    pushed = queue.push(frame) => pushed,
                };
                if pushed.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) if e.is_frame_local() => {
                debug!(source = %label, error = %e, "Skipping undecodable frame");
                outcome.sampled += 1;
                outcome.invalid += 1;
                metrics::record_invalid(&label);
            }
            Err(e) => {
                outcome.failure = Some(e.to_string());
                break;
            }
        }
    }

    queue.close();
    if let Err(e) = frames.close().await {
        warn!(source = %label, error = %e, "Failed to release source");
    }
    outcome
}

/// Resolves once the flag is set or the sender is dropped.
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

/// Resolves once the flag is set. A dropped sender never cancels.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let result = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
    if result.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_ml::MlResult;
    use sentinel_models::{LabelSet, Prediction};

    struct NoopClassifier(LabelSet);

    impl Classifier for NoopClassifier {
        fn labels(&self) -> &LabelSet {
            &self.0
        }

        fn classify_batch(&self, _frames: &[Frame]) -> MlResult<Vec<Prediction>> {
            Ok(Vec::new())
        }
    }

    fn pipeline(config: PipelineConfig) -> WorkerResult<Pipeline> {
        Pipeline::new(
            config,
            Arc::new(NoopClassifier(LabelSet::synthetic(2))),
            Arc::new(crate::sink::LogSink),
        )
    }

    #[test]
    fn test_new_validates_config() {
        assert!(pipeline(PipelineConfig { top_k: 2, ..Default::default() }).is_ok());
        assert!(pipeline(PipelineConfig { top_k: 3, ..Default::default() }).is_err());
        assert!(pipeline(PipelineConfig { target_fps: -1.0, top_k: 1, ..Default::default() }).is_err());
    }

    #[test]
    fn test_end_reason_display() {
        assert_eq!(EndReason::Cancelled.to_string(), "cancelled");
        assert_eq!(
            EndReason::SourceFailed("eof".into()).to_string(),
            "source_failed: eof"
        );
    }

    #[tokio::test]
    async fn test_cancelled_ignores_dropped_sender() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let result = tokio::time::timeout(std::time::Duration::from_millis(20), cancelled(&mut rx)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_when_set() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        cancelled(&mut rx).await;
    }
}
