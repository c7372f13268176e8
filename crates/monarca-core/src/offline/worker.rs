//! Worker context for the offline cache.
//!
//! The cache runs on its own task and reacts to discrete events sent over a
//! channel. Lifecycle events are handled one at a time, in order, so an
//! install always finishes before the activation that follows it. Fetch
//! events are answered on their own tasks so a slow network never stalls
//! the lifecycle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::fetcher::{AssetRequest, FetchError, Fetcher};
use super::manager::{OfflineCache, OfflineError, Routed, WorkerState};
use super::storage::CacheStorage;

/// Buffer size for the worker event channel.
const EVENT_BUFFER_SIZE: usize = 64;

/// Messages a page can post to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Activate the waiting version now
    SkipWaiting,
}

/// Result of an install event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub activated: bool,
    /// Generations deleted by the activation that followed, if any
    pub evicted: Vec<String>,
}

enum WorkerEvent {
    Install(oneshot::Sender<Result<InstallOutcome, OfflineError>>),
    Activate(oneshot::Sender<Result<Vec<String>, OfflineError>>),
    Fetch(AssetRequest, oneshot::Sender<Result<Routed, FetchError>>),
    Message(ControlMessage),
    State(oneshot::Sender<WorkerState>),
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Offline worker has stopped")]
    Stopped,

    #[error(transparent)]
    Offline(#[from] OfflineError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Cheap, cloneable handle used to talk to a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerEvent>,
}

impl WorkerHandle {
    /// Run the install event. When install succeeds and skip-waiting is set
    /// the worker activates right away.
    pub async fn install(&self) -> Result<InstallOutcome, WorkerError> {
        Ok(self.request(WorkerEvent::Install).await??)
    }

    pub async fn activate(&self) -> Result<Vec<String>, WorkerError> {
        Ok(self.request(WorkerEvent::Activate).await??)
    }

    pub async fn fetch(&self, request: AssetRequest) -> Result<Routed, WorkerError> {
        Ok(self
            .request(|reply| WorkerEvent::Fetch(request, reply))
            .await??)
    }

    pub async fn state(&self) -> Result<WorkerState, WorkerError> {
        self.request(WorkerEvent::State).await
    }

    pub async fn post_message(&self, message: ControlMessage) -> Result<(), WorkerError> {
        self.tx
            .send(WorkerEvent::Message(message))
            .await
            .map_err(|_| WorkerError::Stopped)
    }

    async fn request<T>(
        &self,
        event: impl FnOnce(oneshot::Sender<T>) -> WorkerEvent,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(event(reply))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }
}

/// Start the worker task. It runs until every handle is dropped.
pub fn spawn<S: CacheStorage, F: Fetcher>(
    cache: OfflineCache<S, F>,
) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER_SIZE);
    let task = tokio::spawn(run(Arc::new(cache), rx));
    (WorkerHandle { tx }, task)
}

async fn run<S: CacheStorage, F: Fetcher>(
    cache: Arc<OfflineCache<S, F>>,
    mut rx: mpsc::Receiver<WorkerEvent>,
) {
    debug!(version = %cache.version(), "Offline worker started");

    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Install(reply) => {
                let outcome = install(&cache).await;
                let _ = reply.send(outcome);
            }
            WorkerEvent::Activate(reply) => {
                let _ = reply.send(cache.activate().await);
            }
            WorkerEvent::Fetch(request, reply) => {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let _ = reply.send(cache.route(&request).await);
                });
            }
            WorkerEvent::Message(ControlMessage::SkipWaiting) => {
                cache.skip_waiting();
                if cache.wants_activation() {
                    if let Err(e) = cache.activate().await {
                        error!(error = %e, "Activation after skip-waiting failed");
                    }
                }
            }
            WorkerEvent::State(reply) => {
                let _ = reply.send(cache.state());
            }
        }
    }

    cache.settle().await;
    debug!(version = %cache.version(), "Offline worker stopped");
}

async fn install<S: CacheStorage, F: Fetcher>(
    cache: &OfflineCache<S, F>,
) -> Result<InstallOutcome, OfflineError> {
    cache.install().await?;

    if !cache.wants_activation() {
        info!(version = %cache.version(), "Installed, waiting to activate");
        return Ok(InstallOutcome {
            activated: false,
            evicted: Vec::new(),
        });
    }

    match cache.activate().await {
        Ok(evicted) => Ok(InstallOutcome {
            activated: true,
            evicted,
        }),
        Err(e) => {
            warn!(error = %e, "Installed but activation failed");
            Ok(InstallOutcome {
                activated: false,
                evicted: Vec::new(),
            })
        }
    }
}
