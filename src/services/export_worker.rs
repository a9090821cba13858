//! Bounded worker pool delivering finished-game records to the export collaborator.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{
        Semaphore,
        mpsc::{self, error::TrySendError},
    },
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ExportConfig,
    dao::{game_export::GameExporter, models::FinishedGameExport},
};

/// Attempts and backoff applied to each record.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl From<&ExportConfig> for RetryPolicy {
    fn from(config: &ExportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }
}

/// Submission side of the export pool. Cloning shares the same workers.
#[derive(Clone, Debug)]
pub struct ExportQueue {
    tx: mpsc::Sender<FinishedGameExport>,
}

impl ExportQueue {
    /// Start the dispatcher task and return the handle used to submit records.
    pub fn spawn(exporter: Arc<dyn GameExporter>, config: &ExportConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(dispatch(
            rx,
            exporter,
            RetryPolicy::from(config),
            config.concurrency.max(1),
        ));
        Self { tx }
    }

    /// Queue a record without waiting. Returns `false` when it had to be dropped.
    pub fn submit(&self, record: FinishedGameExport) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                error!(
                    game_id = %record.game_id,
                    key = %record.idempotency_key,
                    "export queue full; dropping finished game record"
                );
                false
            }
            Err(TrySendError::Closed(record)) => {
                error!(
                    game_id = %record.game_id,
                    key = %record.idempotency_key,
                    "export worker stopped; dropping finished game record"
                );
                false
            }
        }
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<FinishedGameExport>,
    exporter: Arc<dyn GameExporter>,
    policy: RetryPolicy,
    concurrency: usize,
) {
    let permits = Arc::new(Semaphore::new(concurrency));
    while let Some(record) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let exporter = exporter.clone();
        tokio::spawn(async move {
            deliver(exporter.as_ref(), record, policy).await;
            drop(permit);
        });
    }
    debug!("export dispatcher stopped");
}

/// Deliver one record, retrying with exponential backoff. Returns whether it landed.
pub async fn deliver(
    exporter: &dyn GameExporter,
    record: FinishedGameExport,
    policy: RetryPolicy,
) -> bool {
    let mut delay = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match exporter.export_finished_game(record.clone()).await {
            Ok(()) => {
                info!(
                    game_id = %record.game_id,
                    key = %record.idempotency_key,
                    attempt,
                    "finished game exported"
                );
                return true;
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    game_id = %record.game_id,
                    key = %record.idempotency_key,
                    attempt,
                    error = %err,
                    "export attempt failed; retrying"
                );
                sleep(delay).await;
                delay = (delay * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(err) => {
                error!(
                    game_id = %record.game_id,
                    key = %record.idempotency_key,
                    attempt,
                    error = %err,
                    "giving up on finished game export"
                );
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use futures::future::BoxFuture;

    use super::*;
    use crate::dao::{
        game_export::ExportError,
        models::{Color, GameEntity, GameType, NewGame, PlayerEntity, TimeControl},
    };

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyExporter {
        failures: u32,
        status: Option<u16>,
        calls: AtomicU32,
        delivered: Mutex<Vec<String>>,
    }

    impl FlakyExporter {
        fn new(failures: u32, status: Option<u16>) -> Self {
            Self {
                failures,
                status,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl GameExporter for FlakyExporter {
        fn export_finished_game(
            &self,
            record: FinishedGameExport,
        ) -> BoxFuture<'static, Result<(), ExportError>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let result = if call < self.failures {
                Err(match self.status {
                    Some(status) => ExportError::Rejected { status },
                    None => ExportError::Transport("connection refused".into()),
                })
            } else {
                self.delivered.lock().unwrap().push(record.idempotency_key);
                Ok(())
            };
            Box::pin(async move { result })
        }
    }

    fn record() -> FinishedGameExport {
        let game = GameEntity::from_new(NewGame {
            white: PlayerEntity {
                id: "w".into(),
                name: "W".into(),
            },
            black: PlayerEntity {
                id: "b".into(),
                name: "B".into(),
            },
            time_control: TimeControl::parse("1+0"),
            game_type: GameType::Standard,
        });
        FinishedGameExport::for_perspective(&game, Color::White, 16)
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let exporter = FlakyExporter::new(2, None);
        assert!(deliver(&exporter, record(), policy(3)).await);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let exporter = FlakyExporter::new(10, Some(503));
        assert!(!deliver(&exporter, record(), policy(3)).await);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_rejection_is_not_retried() {
        let exporter = FlakyExporter::new(10, Some(422));
        assert!(!deliver(&exporter, record(), policy(5)).await);
        assert_eq!(exporter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submitted_records_reach_the_exporter() {
        let exporter = Arc::new(FlakyExporter::new(0, None));
        let config = ExportConfig {
            endpoint: None,
            queue_capacity: 4,
            concurrency: 2,
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            rating_delta: 16,
        };
        let queue = ExportQueue::spawn(exporter.clone(), &config);

        let record = record();
        let expected = record.idempotency_key.clone();
        assert!(queue.submit(record));

        for _ in 0..50 {
            if !exporter.delivered.lock().unwrap().is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*exporter.delivered.lock().unwrap(), vec![expected]);
    }
}
