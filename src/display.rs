//! Display side channel.
//!
//! Workers push annotated frames with `try_send`; a full or closed queue drops
//! the frame. A single hub task drains the queue into a [`FramePresenter`],
//! and a presenter asking to quit stops only that frame's source.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::detector::Detection;
use crate::source::Frame;

/// Frame plus the overlay data a renderer needs. The frame itself is untouched.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub source: String,
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Continue,
    /// The viewer closed this source.
    Quit,
}

pub trait FramePresenter: Send + 'static {
    fn present(&mut self, frame: &AnnotatedFrame) -> Presentation;
}

/// Headless presenter: one debug line per frame with a positive detection.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl FramePresenter for LogPresenter {
    fn present(&mut self, frame: &AnnotatedFrame) -> Presentation {
        if frame.present {
            tracing::debug!(
                source = %frame.source,
                seq = frame.frame.seq(),
                boxes = frame.detections.len(),
                "annotated frame"
            );
        }
        Presentation::Continue
    }
}

/// Producer half handed to every worker.
#[derive(Debug, Clone)]
pub struct DisplaySink {
    tx: mpsc::Sender<AnnotatedFrame>,
}

impl DisplaySink {
    /// Best-effort enqueue; never waits.
    pub fn offer(&self, frame: AnnotatedFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(f) | mpsc::error::TrySendError::Closed(f)) => {
                counter!("camwatch_display_dropped_total", "source" => f.source).increment(1);
                false
            }
        }
    }
}

/// Creates the bounded queue. `capacity` must be non-zero.
pub fn channel(capacity: usize) -> (DisplaySink, mpsc::Receiver<AnnotatedFrame>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DisplaySink { tx }, rx)
}

/// Per-source stop tokens, keyed by source id.
pub type StopHandles = Arc<HashMap<String, CancellationToken>>;

/// Drains the queue until shutdown or until every sink is dropped.
pub fn spawn_hub<P: FramePresenter>(
    mut rx: mpsc::Receiver<AnnotatedFrame>,
    mut presenter: P,
    stops: StopHandles,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if presenter.present(&frame) == Presentation::Quit {
                if let Some(token) = stops.get(&frame.source) {
                    if !token.is_cancelled() {
                        tracing::info!(source = %frame.source, "viewer requested stop");
                        token.cancel();
                    }
                }
            }
        }
        tracing::debug!("display hub stopped");
    })
}
