//! Per-source worker: open → read → classify → record, reconnecting forever.
//!
//! ```text
//! Connecting --open ok--> Streaming --read error / end of stream--> BackingOff
//!     ^                                                                 |
//!     +-------------------------- fixed delay -------------------------+
//! Connecting --open error--> BackingOff
//! any state --stop--> Stopped
//! ```
//!
//! Only the stop token ends the loop. Frame-level failures never leave
//! `Streaming`; store failures drop the detection and keep streaming.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::bucket::Clock;
use crate::dedup::{DedupOutcome, Deduplicator};
use crate::detector::Detector;
use crate::display::{AnnotatedFrame, DisplaySink};
use crate::event::{DetectionRecord, LocationMap};
use crate::source::{Frame, FrameSource, FrameStream, ReadOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Connecting,
    Streaming,
    BackingOff,
    /// Stop token cancelled; the worker has returned.
    Stopped,
}

/// Collaborators every worker gets a handle to.
#[derive(Clone)]
pub struct WorkerDeps {
    pub frames: Arc<dyn FrameSource>,
    pub detector: Detector,
    pub dedup: Deduplicator,
    pub clock: Arc<dyn Clock>,
    pub display: Option<DisplaySink>,
    pub reconnect_delay: Duration,
}

/// What happened to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Target absent.
    Clear,
    /// Inference failed; frame skipped.
    Failed,
    /// Target present and the bucket protocol completed.
    Recorded(DedupOutcome),
    /// Target present but a store call failed; detection dropped.
    Dropped,
    /// Stop requested while the frame was being classified.
    Interrupted,
}

enum StreamExit {
    Lost,
    Stopped,
}

pub struct SourceWorker {
    source: String,
    location: String,
    deps: WorkerDeps,
    state: Arc<watch::Sender<WorkerState>>,
}

impl SourceWorker {
    pub fn new(
        source: impl Into<String>,
        locations: &LocationMap,
        deps: WorkerDeps,
        state: Arc<watch::Sender<WorkerState>>,
    ) -> Self {
        let source = source.into();
        let location = locations.resolve(&source).to_string();
        Self {
            source,
            location,
            deps,
            state,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Runs until `stop` is cancelled. The capture handle is always released
    /// before returning.
    pub async fn run(self, stop: CancellationToken) {
        tracing::info!(source = %self.source, location = %self.location, "worker started");

        loop {
            self.set_state(WorkerState::Connecting);
            let opened = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                opened = self.deps.frames.open(&self.source) => opened,
            };

            match opened {
                Ok(mut stream) => {
                    tracing::info!(source = %self.source, "source opened");
                    self.set_state(WorkerState::Streaming);
                    let exit = self.stream(stream.as_mut(), &stop).await;
                    stream.release().await;
                    if matches!(exit, StreamExit::Stopped) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(source = %self.source, error = %e, "failed to open source");
                }
            }

            counter!("camwatch_source_reconnects_total", "source" => self.source.clone())
                .increment(1);
            self.set_state(WorkerState::BackingOff);
            if !self.backoff(&stop).await {
                break;
            }
        }

        self.set_state(WorkerState::Stopped);
        tracing::info!(source = %self.source, "worker stopped");
    }

    async fn stream(&self, stream: &mut dyn FrameStream, stop: &CancellationToken) -> StreamExit {
        loop {
            let read = tokio::select! {
                biased;
                _ = stop.cancelled() => return StreamExit::Stopped,
                read = stream.read_frame() => read,
            };

            match read {
                Ok(ReadOutcome::Frame(frame)) => {
                    if self.process(frame, stop).await == FrameOutcome::Interrupted {
                        return StreamExit::Stopped;
                    }
                }
                Ok(ReadOutcome::EndOfStream) => {
                    tracing::warn!(source = %self.source, "stream ended");
                    return StreamExit::Lost;
                }
                Err(e) => {
                    tracing::warn!(source = %self.source, error = %e, "failed to read frame");
                    return StreamExit::Lost;
                }
            }
        }
    }

    /// Classify one frame and, on a hit, run the bucket protocol inline.
    pub async fn process(&self, frame: Frame, stop: &CancellationToken) -> FrameOutcome {
        counter!("camwatch_frames_total", "source" => self.source.clone()).increment(1);

        let classified = tokio::select! {
            biased;
            _ = stop.cancelled() => return FrameOutcome::Interrupted,
            c = self.deps.detector.classify(&frame) => c,
        };
        let classification = match classified {
            Ok(c) => c,
            Err(e) => {
                counter!("camwatch_frame_errors_total", "source" => self.source.clone())
                    .increment(1);
                tracing::warn!(source = %self.source, seq = frame.seq(), error = %e, "frame skipped");
                return FrameOutcome::Failed;
            }
        };

        let outcome = if classification.present {
            counter!("camwatch_detections_total", "source" => self.source.clone()).increment(1);
            let record = DetectionRecord::new(
                self.source.clone(),
                self.location.clone(),
                self.deps.clock.now(),
            );
            tracing::info!(
                source = %self.source,
                location = %self.location,
                at = %record.time_key,
                "target detected"
            );
            self.record(&record).await
        } else {
            FrameOutcome::Clear
        };

        if let Some(display) = &self.deps.display {
            display.offer(AnnotatedFrame {
                source: self.source.clone(),
                present: classification.present,
                detections: classification.detections,
                frame,
            });
        }

        outcome
    }

    async fn record(&self, record: &DetectionRecord) -> FrameOutcome {
        match self.deps.dedup.record(record).await {
            Ok(outcome) => {
                counter!("camwatch_events_recorded_total", "source" => self.source.clone())
                    .increment(1);
                counter!("camwatch_events_pruned_total", "source" => self.source.clone())
                    .increment(outcome.pruned);
                FrameOutcome::Recorded(outcome)
            }
            Err(e) => {
                counter!("camwatch_store_errors_total", "source" => self.source.clone())
                    .increment(1);
                tracing::error!(source = %self.source, error = %e, "detection dropped");
                FrameOutcome::Dropped
            }
        }
    }

    /// Waits the reconnect delay; `false` when stopped meanwhile.
    async fn backoff(&self, stop: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = stop.cancelled() => false,
            _ = tokio::time::sleep(self.deps.reconnect_delay) => true,
        }
    }

    fn set_state(&self, next: WorkerState) {
        self.state.send_replace(next);
        let streaming = if next == WorkerState::Streaming { 1.0 } else { 0.0 };
        gauge!("camwatch_worker_streaming", "source" => self.source.clone()).set(streaming);
    }
}
