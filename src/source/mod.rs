// src/source/mod.rs
pub mod snapshot;

use std::sync::Arc;

use async_trait::async_trait;

pub use snapshot::SnapshotSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Cannot open source {source_id}: {reason}")]
    Open { source_id: String, reason: String },

    #[error("Read from {source_id} failed: {reason}")]
    Read { source_id: String, reason: String },
}

/// One decoded-or-encoded frame. Cloning shares the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u64,
    data: Arc<[u8]>,
}

impl Frame {
    pub fn new(seq: u64, data: Vec<u8>) -> Self {
        Self {
            seq,
            data: data.into(),
        }
    }

    /// Position of this frame within its stream session, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Result of a successful read call.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Frame),
    EndOfStream,
}

/// Opens capture handles for source identifiers.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self, source: &str) -> Result<Box<dyn FrameStream>, SourceError>;
}

/// An open capture handle, owned by exactly one worker.
#[async_trait]
pub trait FrameStream: Send {
    async fn read_frame(&mut self) -> Result<ReadOutcome, SourceError>;

    /// Gives the capture resource back. Called once per successful `open`.
    async fn release(self: Box<Self>);
}
