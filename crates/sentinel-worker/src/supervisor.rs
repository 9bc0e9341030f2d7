//! Multi-source pipeline supervision.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use sentinel_media::{FrameDecoder, FrameSource};
use sentinel_ml::Classifier;
use sentinel_models::SourceId;

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::StreamLogger;
use crate::metrics;
use crate::pipeline::{Pipeline, PipelineReport};
use crate::sink::AlertSink;

struct StreamHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<WorkerResult<PipelineReport>>,
}

/// Runs one independent pipeline per source.
///
/// Pipelines share the classifier and sink, and nothing else: each has its
/// own decoder, queue, smoother, decider and cancellation handle, so one
/// source failing leaves the others running.
pub struct StreamSupervisor {
    pipeline: Arc<Pipeline>,
    streams: HashMap<SourceId, StreamHandle>,
}

impl StreamSupervisor {
    pub fn new(
        config: PipelineConfig,
        classifier: Arc<dyn Classifier>,
        sink: Arc<dyn AlertSink>,
    ) -> WorkerResult<Self> {
        Ok(Self {
            pipeline: Arc::new(Pipeline::new(config, classifier, sink)?),
            streams: HashMap::new(),
        })
    }

    /// Open `source` with FFmpeg and start its pipeline.
    pub fn start(&mut self, source: SourceId) -> WorkerResult<()> {
        self.ensure_not_running(&source)?;
        let pipeline = Arc::clone(&self.pipeline);
        let task_source = source.clone();
        self.spawn(source, move |cancel| async move {
            pipeline.run(task_source, cancel).await
        });
        Ok(())
    }

    /// Start a pipeline over an already-open frame source.
    pub fn start_source<D>(&mut self, frames: FrameSource<D>) -> WorkerResult<()>
    where
        D: FrameDecoder + 'static,
    {
        let source = frames.source().clone();
        self.ensure_not_running(&source)?;
        let pipeline = Arc::clone(&self.pipeline);
        self.spawn(source, move |cancel| async move {
            pipeline.run_source(frames, cancel).await
        });
        Ok(())
    }

    fn ensure_not_running(&self, source: &SourceId) -> WorkerResult<()> {
        if self.streams.contains_key(source) {
            return Err(WorkerError::AlreadyRunning(source.to_string()));
        }
        Ok(())
    }

    fn spawn<F, Fut>(&mut self, source: SourceId, run: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = WorkerResult<PipelineReport>> + Send + 'static,
    {
        let (cancel, rx) = watch::channel(false);
        let span = StreamLogger::new(&source).create_span();
        let task = tokio::spawn(run(rx).instrument(span));

        self.streams.insert(source, StreamHandle { cancel, task });
        metrics::set_active_streams(self.streams.len());
    }

    /// Sources with a pipeline that has not been stopped or collected.
    pub fn sources(&self) -> Vec<SourceId> {
        self.streams.keys().cloned().collect()
    }

    pub fn is_running(&self, source: &SourceId) -> bool {
        self.streams
            .get(source)
            .map(|s| !s.task.is_finished())
            .unwrap_or(false)
    }

    /// Whether every pipeline has finished on its own.
    pub fn all_finished(&self) -> bool {
        self.streams.values().all(|s| s.task.is_finished())
    }

    /// Cancel one source and wait for its report.
    pub async fn stop(&mut self, source: &SourceId) -> Option<WorkerResult<PipelineReport>> {
        let handle = self.streams.remove(source)?;
        metrics::set_active_streams(self.streams.len());
        let _ = handle.cancel.send(true);
        Some(join(handle.task).await)
    }

    /// Wait until every pipeline finishes or `shutdown` resolves, then stop
    /// whatever is still running.
    pub async fn run_until<S>(
        self,
        shutdown: S,
        timeout: Duration,
    ) -> Vec<(SourceId, WorkerResult<PipelineReport>)>
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            _ = shutdown => info!("Shutdown requested, stopping {} streams", self.streams.len()),
            _ = self.wait_all() => info!("All streams finished"),
        }
        self.shutdown(timeout).await
    }

    async fn wait_all(&self) {
        while !self.all_finished() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Cancel every pipeline and collect the reports.
    ///
    /// Pipelines that do not stop within `timeout` are aborted. Aborting
    /// drops the pipeline's stop channel, and its decoder task then closes
    /// the source at the next frame boundary.
    pub async fn shutdown(mut self, timeout: Duration) -> Vec<(SourceId, WorkerResult<PipelineReport>)> {
        for handle in self.streams.values() {
            let _ = handle.cancel.send(true);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut results = Vec::with_capacity(self.streams.len());
        for (source, handle) in self.streams.drain() {
            let abort = handle.task.abort_handle();
            let result = match tokio::time::timeout_at(deadline, join(handle.task)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(source = %source, "Pipeline did not stop in time, aborting");
                    abort.abort();
                    Err(WorkerError::task_failed("shutdown timed out"))
                }
            };
            results.push((source, result));
        }

        metrics::set_active_streams(0);
        results
    }
}

async fn join(task: JoinHandle<WorkerResult<PipelineReport>>) -> WorkerResult<PipelineReport> {
    task.await
        .map_err(|e| WorkerError::task_failed(e.to_string()))?
}
