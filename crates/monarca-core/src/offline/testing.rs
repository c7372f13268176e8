//! Scripted network used by the offline cache tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

use super::fetcher::{AssetRequest, AssetResponse, FetchError, Fetcher};

/// Answers from a URL table. Unknown URLs fail like a dropped connection.
/// While the gate is closed every fetch waits.
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn serve(&self, url: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.as_bytes().to_vec()));
    }

    pub fn drop_route(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }
}

impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let key = request.cache_key();
        let entry = self.routes.lock().unwrap().get(&key).cloned();
        match entry {
            Some((status, body)) => Ok(AssetResponse::network(
                status,
                Some("text/plain".to_string()),
                body,
            )),
            None => Err(FetchError::Network {
                url: key,
                reason: "connection refused".to_string(),
            }),
        }
    }
}
