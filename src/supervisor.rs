// src/supervisor.rs
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::display::StopHandles;
use crate::event::LocationMap;
use crate::worker::{SourceWorker, WorkerDeps, WorkerState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub source: String,
    pub location: String,
    pub state: WorkerState,
}

/// Read-only view over every worker's published state.
#[derive(Clone, Default)]
pub struct WorkerBoard {
    entries: Arc<Vec<(String, String, watch::Receiver<WorkerState>)>>,
}

impl WorkerBoard {
    pub fn snapshot(&self) -> Vec<WorkerStatus> {
        self.entries
            .iter()
            .map(|(source, location, rx)| WorkerStatus {
                source: source.clone(),
                location: location.clone(),
                state: *rx.borrow(),
            })
            .collect()
    }

    pub fn state_of(&self, source: &str) -> Option<WorkerState> {
        self.entries
            .iter()
            .find(|(s, _, _)| s == source)
            .map(|(_, _, rx)| *rx.borrow())
    }
}

/// Starts one task per source and waits for all of them on shutdown.
pub struct Supervisor {
    handles: Vec<(String, JoinHandle<()>)>,
    board: WorkerBoard,
    stops: StopHandles,
}

impl Supervisor {
    /// Every worker gets a child of `shutdown`, so cancelling it stops them all
    /// while each child can still be stopped on its own.
    pub fn start(
        sources: &[String],
        locations: Arc<LocationMap>,
        deps: WorkerDeps,
        shutdown: &CancellationToken,
    ) -> Self {
        let mut handles = Vec::with_capacity(sources.len());
        let mut entries = Vec::with_capacity(sources.len());
        let mut stops = HashMap::with_capacity(sources.len());

        for source in sources {
            let stop = shutdown.child_token();
            let (tx, rx) = watch::channel(WorkerState::Connecting);
            let state = Arc::new(tx);

            entries.push((source.clone(), locations.resolve(source).to_string(), rx));
            stops.insert(source.clone(), stop.clone());

            let handle = tokio::spawn(supervise(
                source.clone(),
                locations.clone(),
                deps.clone(),
                state,
                stop,
            ));
            handles.push((source.clone(), handle));
        }

        tracing::info!(workers = handles.len(), "supervisor started");
        Self {
            handles,
            board: WorkerBoard {
                entries: Arc::new(entries),
            },
            stops: Arc::new(stops),
        }
    }

    pub fn board(&self) -> WorkerBoard {
        self.board.clone()
    }

    pub fn stop_handles(&self) -> StopHandles {
        self.stops.clone()
    }

    /// Blocks until every worker has returned.
    pub async fn join(self) {
        for (source, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(source = %source, error = %e, "worker task failed");
            }
        }
        tracing::info!("all workers stopped");
    }
}

/// Runs the worker for one source; a panicked worker is restarted after the
/// reconnect delay unless the source was stopped.
async fn supervise(
    source: String,
    locations: Arc<LocationMap>,
    deps: WorkerDeps,
    state: Arc<watch::Sender<WorkerState>>,
    stop: CancellationToken,
) {
    let delay = deps.reconnect_delay;
    loop {
        let worker = SourceWorker::new(source.clone(), &locations, deps.clone(), state.clone());
        match tokio::spawn(worker.run(stop.clone())).await {
            Ok(()) => break,
            Err(e) if e.is_panic() => {
                tracing::error!(source = %source, "worker panicked; restarting");
                state.send_replace(WorkerState::BackingOff);
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(_) => break,
        }
    }
    // A panicked or aborted worker never reached its own exit path.
    state.send_replace(WorkerState::Stopped);
}
