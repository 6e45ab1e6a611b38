// tests/common/mod.rs
// Scripted sources, a keyword model and a tokio-driven clock shared by the
// integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;

use camwatch::bucket::Clock;
use camwatch::detector::{Detection, DetectorError, InferenceModel};
use camwatch::source::{Frame, FrameSource, FrameStream, ReadOutcome, SourceError};

pub const TZ: Tz = chrono_tz::Asia::Kolkata;

/// 2024-06-01 12:00:00 in the canonical zone.
pub fn noon() -> DateTime<Tz> {
    TZ.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Tz> {
    noon() + chrono::Duration::seconds(secs)
}

/// How a scripted stream ends once its frames run out.
#[derive(Debug, Clone, Copy)]
pub enum Tail {
    End,
    Error,
    /// Never yields another frame.
    Hang,
}

#[derive(Debug, Clone)]
pub enum Session {
    Refuse,
    Frames {
        frames: Vec<&'static str>,
        tail: Tail,
    },
}

impl Session {
    pub fn frames(frames: &[&'static str], tail: Tail) -> Self {
        Session::Frames {
            frames: frames.to_vec(),
            tail,
        }
    }
}

#[derive(Default)]
pub struct Counters {
    pub opens: AtomicUsize,
    pub refusals: AtomicUsize,
    pub releases: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
    pub fn refusals(&self) -> usize {
        self.refusals.load(Ordering::SeqCst)
    }
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

/// Replays one session per `open` call; once a source's script runs out every
/// further open is refused.
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Session>>>,
    frame_gap: Duration,
    counters: Mutex<HashMap<String, Arc<Counters>>>,
}

impl ScriptedSource {
    pub fn new(frame_gap: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            frame_gap,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn script(self, source: &str, sessions: Vec<Session>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source.to_string(), sessions.into());
        self
    }

    pub fn counters(&self, source: &str) -> Arc<Counters> {
        self.counters
            .lock()
            .unwrap()
            .entry(source.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&self, source: &str) -> Result<Box<dyn FrameStream>, SourceError> {
        let counters = self.counters(source);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(source)
            .and_then(|q| q.pop_front())
            .unwrap_or(Session::Refuse);

        match next {
            Session::Refuse => {
                counters.refusals.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Open {
                    source_id: source.to_string(),
                    reason: "scripted refusal".into(),
                })
            }
            Session::Frames { frames, tail } => {
                counters.opens.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedStream {
                    source: source.to_string(),
                    frames: frames.into(),
                    tail,
                    seq: 0,
                    gap: self.frame_gap,
                    counters,
                }))
            }
        }
    }
}

struct ScriptedStream {
    source: String,
    frames: VecDeque<&'static str>,
    tail: Tail,
    seq: u64,
    gap: Duration,
    counters: Arc<Counters>,
}

#[async_trait]
impl FrameStream for ScriptedStream {
    async fn read_frame(&mut self) -> Result<ReadOutcome, SourceError> {
        tokio::time::sleep(self.gap).await;
        match self.frames.pop_front() {
            Some(payload) => {
                self.seq += 1;
                Ok(ReadOutcome::Frame(Frame::new(self.seq, payload.as_bytes().to_vec())))
            }
            None => match self.tail {
                Tail::End => Ok(ReadOutcome::EndOfStream),
                Tail::Error => Err(SourceError::Read {
                    source_id: self.source.clone(),
                    reason: "scripted read failure".into(),
                }),
                Tail::Hang => std::future::pending().await,
            },
        }
    }

    async fn release(self: Box<Self>) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// `hit` → target class at 0.9, `weak` → target class at 0.3,
/// `other` → class 7 at 0.9, `bad` → inference error, anything else → nothing.
pub struct KeywordModel;

#[async_trait]
impl InferenceModel for KeywordModel {
    async fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let det = |class_id, confidence| Detection {
            class_id,
            confidence,
            bbox: Default::default(),
        };
        match frame.data() {
            b"hit" => Ok(vec![det(1, 0.9)]),
            b"weak" => Ok(vec![det(1, 0.3)]),
            b"other" => Ok(vec![det(7, 0.9)]),
            b"bad" => Err(DetectorError::Model("scripted inference failure".into())),
            _ => Ok(vec![]),
        }
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Wall clock that follows tokio's (pausable) clock from a fixed base.
pub struct TokioClock {
    base: DateTime<Tz>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(base: DateTime<Tz>) -> Self {
        Self {
            base,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Tz> {
        let elapsed = tokio::time::Instant::now() - self.started;
        self.base + chrono::Duration::from_std(elapsed).unwrap()
    }
}
