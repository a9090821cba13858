//! Fakes shared by service tests: token verifier, recording exporter, channel sockets.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::extract::ws::Message;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::{
    auth::{AuthError, Identity, IdentityVerifier},
    config::AppConfig,
    dao::{
        game_export::{ExportError, GameExporter},
        game_store::InMemoryGameStore,
        models::FinishedGameExport,
    },
    services::export_worker::ExportQueue,
    state::{AppState, SharedState, connection::ConnectionHandle},
};

/// Accepts `token-<id>` and yields the identity `<id>` named `Player <id>`.
pub struct TokenVerifier;

impl IdentityVerifier for TokenVerifier {
    fn verify(&self, token: &str) -> BoxFuture<'static, Result<Identity, AuthError>> {
        let result = match token.strip_prefix("token-") {
            Some(id) if !id.is_empty() => Ok(Identity::new(id, format!("Player {id}"))),
            _ => Err(AuthError::InvalidToken),
        };
        Box::pin(async move { result })
    }
}

#[derive(Default)]
pub struct RecordingExporter {
    calls: AtomicUsize,
    records: Mutex<Vec<FinishedGameExport>>,
}

impl RecordingExporter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<FinishedGameExport> {
        self.records.lock().unwrap().clone()
    }

    /// Wait until at least `expected` calls landed, then a little longer so extra
    /// calls would be observed too.
    pub async fn settle(&self, expected: usize) -> usize {
        for _ in 0..100 {
            if self.calls() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.calls()
    }
}

impl GameExporter for RecordingExporter {
    fn export_finished_game(
        &self,
        record: FinishedGameExport,
    ) -> BoxFuture<'static, Result<(), ExportError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.records.lock().unwrap().push(record);
        Box::pin(async { Ok(()) })
    }
}

pub struct Harness {
    pub state: SharedState,
    pub store: Arc<InMemoryGameStore>,
    pub exporter: Arc<RecordingExporter>,
}

pub async fn harness() -> Harness {
    harness_with(AppConfig::default()).await
}

pub async fn harness_with(config: AppConfig) -> Harness {
    let store = Arc::new(InMemoryGameStore::new());
    let exporter = Arc::new(RecordingExporter::default());
    let exports = ExportQueue::spawn(exporter.clone(), &config.export);
    let state = AppState::new(config, Arc::new(TokenVerifier), exports);
    state.install_game_store(store.clone()).await;
    Harness {
        state,
        store,
        exporter,
    }
}

/// A connection whose receiver stands in for the client socket.
pub fn socket() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle::new(tx), rx)
}

/// Drain every queued text frame as JSON.
pub fn drain_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let Message::Text(text) = message {
            out.push(serde_json::from_str(text.as_str()).unwrap());
        }
    }
    out
}

/// Types of the drained text frames, in order.
pub fn drain_types(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    drain_json(rx)
        .into_iter()
        .map(|v| v["type"].as_str().unwrap_or_default().to_owned())
        .collect()
}
