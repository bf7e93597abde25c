//! Periodic block template polling.
//!
//! [`TemplateSource`] asks a [`TemplateProvider`] for a fresh template on a
//! fixed interval and hands each one to the [`JobBroadcaster`]. A failed
//! poll, whether the node is unreachable, answers with an error, or sends
//! something that does not assemble, is logged and skipped; the current job
//! stays as it was.

mod rpc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub use rpc::{NodeRpcClient, RPC_TIMEOUT, is_auth_failure};

use crate::broadcaster::{JobBroadcaster, UpdateOutcome};
use crate::job::{AssemblyError, BlockTemplate};

/// Reasons a poll produced no new job.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("invalid RPC URL: {0}")]
    InvalidUrl(String),

    #[error("RPC request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("node answered HTTP {0}")]
    Status(StatusCode),

    #[error("node returned an error: {0}")]
    Node(String),

    #[error("malformed template response: {0}")]
    Malformed(String),

    #[error("template did not assemble: {0}")]
    Assembly(#[from] AssemblyError),
}

/// Something that can produce the node's current block template.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn fetch(&self) -> Result<BlockTemplate, TemplateError>;
}

/// Polls a provider and feeds the broadcaster.
pub struct TemplateSource {
    provider: Box<dyn TemplateProvider>,
    broadcaster: Arc<JobBroadcaster>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl TemplateSource {
    pub fn new(
        provider: Box<dyn TemplateProvider>,
        broadcaster: Arc<JobBroadcaster>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            broadcaster,
            interval,
            shutdown,
        }
    }

    /// Fetch one template and publish it.
    pub async fn poll_once(&self) -> Result<UpdateOutcome, TemplateError> {
        let template = self.provider.fetch().await?;
        debug!(
            height = template.height,
            transactions = template.transactions.len(),
            "Fetched block template"
        );
        Ok(self.broadcaster.update_from_template(&template)?)
    }

    /// Poll until shutdown. The first poll happens immediately.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.cancelled() => break,
            }

            let result = tokio::select! {
                result = self.poll_once() => result,
                _ = self.shutdown.cancelled() => break,
            };

            match result {
                Ok(_) => {}
                Err(TemplateError::Status(status)) if is_auth_failure(status) => {
                    error!(%status, "Node rejected RPC credentials; keeping current job");
                }
                Err(e) => warn!(error = %e, "Template poll failed; keeping current job"),
            }
        }

        debug!("Template source stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    /// Provider that replays scripted results, then keeps failing.
    struct Scripted {
        results: Mutex<VecDeque<Result<BlockTemplate, TemplateError>>>,
        calls: Arc<Mutex<usize>>,
    }

    impl Scripted {
        fn new(results: Vec<Result<BlockTemplate, TemplateError>>) -> (Self, Arc<Mutex<usize>>) {
            let calls = Arc::new(Mutex::new(0));
            let provider = Self {
                results: Mutex::new(results.into()),
                calls: calls.clone(),
            };
            (provider, calls)
        }
    }

    #[async_trait]
    impl TemplateProvider for Scripted {
        async fn fetch(&self) -> Result<BlockTemplate, TemplateError> {
            *self.calls.lock() += 1;
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TemplateError::Node("exhausted".to_string())))
        }
    }

    fn template(height: u64) -> BlockTemplate {
        serde_json::from_value(json!({
            "height": height,
            "previousblockhash": "00".repeat(32),
        }))
        .unwrap()
    }

    fn source(provider: Scripted, broadcaster: Arc<JobBroadcaster>) -> TemplateSource {
        TemplateSource::new(
            Box::new(provider),
            broadcaster,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn failures_keep_current_job() {
        let broadcaster = Arc::new(JobBroadcaster::new());
        let (provider, _) = Scripted::new(vec![
            Ok(template(100)),
            Err(TemplateError::Node("busy".to_string())),
            Ok(BlockTemplate {
                previous_block_hash: "zz".to_string(),
                ..template(101)
            }),
            Ok(template(100)),
            Ok(template(101)),
        ]);
        let source = source(provider, broadcaster.clone());

        assert!(matches!(
            source.poll_once().await,
            Ok(UpdateOutcome::Broadcast { .. })
        ));
        let first = broadcaster.current_job().unwrap();

        assert!(matches!(source.poll_once().await, Err(TemplateError::Node(_))));
        assert!(matches!(
            source.poll_once().await,
            Err(TemplateError::Assembly(AssemblyError::InvalidPrevHash { .. }))
        ));
        assert_eq!(broadcaster.current_job().unwrap().job_id, first.job_id);

        assert_eq!(source.poll_once().await.unwrap(), UpdateOutcome::Unchanged);
        assert_eq!(broadcaster.current_job().unwrap().job_id, first.job_id);

        source.poll_once().await.unwrap();
        assert_eq!(broadcaster.current_job().unwrap().height, 101);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_on_interval_until_shutdown() {
        let broadcaster = Arc::new(JobBroadcaster::new());
        let (provider, calls) = Scripted::new(vec![Ok(template(100)), Ok(template(101))]);
        let shutdown = CancellationToken::new();
        let source = TemplateSource::new(
            Box::new(provider),
            broadcaster.clone(),
            Duration::from_secs(10),
            shutdown.clone(),
        );
        let task = tokio::spawn(source.run());

        // First poll is immediate
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*calls.lock(), 1);
        assert_eq!(broadcaster.current_job().unwrap().height, 100);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*calls.lock(), 2);
        assert_eq!(broadcaster.current_job().unwrap().height, 101);

        // Failing polls keep the loop alive
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(*calls.lock(), 4);
        assert_eq!(broadcaster.current_job().unwrap().height, 101);

        shutdown.cancel();
        task.await.unwrap();
    }
}
