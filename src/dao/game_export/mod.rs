#[cfg(feature = "http-export")]
pub mod http;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::info;

use crate::dao::models::FinishedGameExport;

#[cfg(feature = "http-export")]
pub use http::HttpGameExporter;

/// Failure reported by an export backend.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The collaborator could not be reached or did not answer.
    #[error("export transport failed: {0}")]
    Transport(String),
    /// The collaborator answered but refused the record.
    #[error("export rejected with status {status}")]
    Rejected { status: u16 },
}

impl ExportError {
    /// Whether delivering the same record again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExportError::Transport(_) => true,
            ExportError::Rejected { status } => *status >= 500 || *status == 429,
        }
    }
}

/// Downstream "save completed game" collaborator.
///
/// Implementations must treat `idempotency_key` as the dedup key: the same record
/// may be delivered more than once when a retry follows a lost acknowledgement.
pub trait GameExporter: Send + Sync {
    fn export_finished_game(
        &self,
        record: FinishedGameExport,
    ) -> BoxFuture<'static, Result<(), ExportError>>;
}

/// Exporter used when no downstream endpoint is configured; records are only logged.
#[derive(Debug, Clone, Default)]
pub struct LogOnlyExporter;

impl GameExporter for LogOnlyExporter {
    fn export_finished_game(
        &self,
        record: FinishedGameExport,
    ) -> BoxFuture<'static, Result<(), ExportError>> {
        Box::pin(async move {
            info!(
                game_id = %record.game_id,
                user_id = %record.perspective_id,
                result = ?record.result,
                key = %record.idempotency_key,
                "finished game export (no endpoint configured)"
            );
            Ok(())
        })
    }
}
