use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::Client;

use super::{ExportError, GameExporter};
use crate::dao::models::FinishedGameExport;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Exporter that POSTs each record as JSON to a downstream history service.
#[derive(Clone)]
pub struct HttpGameExporter {
    client: Client,
    endpoint: Arc<str>,
}

impl HttpGameExporter {
    /// Build an exporter targeting `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ExportError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ExportError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: Arc::from(endpoint.into()),
        })
    }
}

impl GameExporter for HttpGameExporter {
    fn export_finished_game(
        &self,
        record: FinishedGameExport,
    ) -> BoxFuture<'static, Result<(), ExportError>> {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            let response = client
                .post(endpoint.as_ref())
                .header(IDEMPOTENCY_HEADER, record.idempotency_key.as_str())
                .json(&record)
                .send()
                .await
                .map_err(|err| ExportError::Transport(err.to_string()))?;

            let status = response.status();
            // 409 means the key was already recorded downstream.
            if status.is_success() || status == reqwest::StatusCode::CONFLICT {
                Ok(())
            } else {
                Err(ExportError::Rejected {
                    status: status.as_u16(),
                })
            }
        })
    }
}
