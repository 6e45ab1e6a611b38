// src/source/snapshot.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::time::{interval, Interval, MissedTickBehavior};

use super::{Frame, FrameSource, FrameStream, ReadOutcome, SourceError};

/// Polls an HTTP(S) JPEG snapshot endpoint (most IP cameras expose one) at a
/// fixed interval. Identifiers that are not http(s) URLs never open.
#[derive(Clone)]
pub struct SnapshotSource {
    client: reqwest::Client,
    frame_interval: Duration,
}

impl SnapshotSource {
    pub fn new(frame_interval: Duration, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            frame_interval,
        })
    }
}

async fn fetch(client: &reqwest::Client, url: &Url) -> Result<Option<Vec<u8>>, String> {
    let resp = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    if !status.is_success() {
        return Err(format!("HTTP {status}"));
    }
    let body = resp.bytes().await.map_err(|e| e.to_string())?;
    if body.is_empty() {
        return Ok(None);
    }
    Ok(Some(body.to_vec()))
}

#[async_trait]
impl FrameSource for SnapshotSource {
    async fn open(&self, source: &str) -> Result<Box<dyn FrameStream>, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            source_id: source.to_string(),
            reason,
        };

        let url = Url::parse(source).map_err(|e| open_err(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(open_err(format!("unsupported scheme `{}`", url.scheme())));
        }

        // The first snapshot proves the camera is reachable and is replayed as frame 1.
        let first = fetch(&self.client, &url)
            .await
            .map_err(open_err)?
            .ok_or_else(|| open_err("no snapshot available".into()))?;

        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.reset();

        Ok(Box::new(SnapshotStream {
            client: self.client.clone(),
            url,
            ticker,
            seq: 0,
            pending: Some(first),
        }))
    }
}

struct SnapshotStream {
    client: reqwest::Client,
    url: Url,
    ticker: Interval,
    seq: u64,
    pending: Option<Vec<u8>>,
}

#[async_trait]
impl FrameStream for SnapshotStream {
    async fn read_frame(&mut self) -> Result<ReadOutcome, SourceError> {
        let data = match self.pending.take() {
            Some(data) => data,
            None => {
                self.ticker.tick().await;
                match fetch(&self.client, &self.url).await {
                    Ok(Some(data)) => data,
                    Ok(None) => return Ok(ReadOutcome::EndOfStream),
                    Err(reason) => {
                        return Err(SourceError::Read {
                            source_id: self.url.to_string(),
                            reason,
                        })
                    }
                }
            }
        };
        self.seq += 1;
        Ok(ReadOutcome::Frame(Frame::new(self.seq, data)))
    }

    async fn release(self: Box<Self>) {
        tracing::debug!(url = %self.url, frames = self.seq, "snapshot stream released");
    }
}
