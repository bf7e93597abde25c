//! Daemon lifecycle.
//!
//! Wires the components together from a [`Config`], runs them until
//! SIGINT/SIGTERM, then shuts everything down through one cancellation
//! token and waits for every task to finish.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::broadcaster::JobBroadcaster;
use crate::config::Config;
use crate::reporter::HttpShareReporter;
use crate::stratum::{SessionContext, StratumServer};
use crate::template_source::{NodeRpcClient, TemplateSource};

/// Owns the running components of the bridge.
pub struct Daemon {
    config: Config,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Token that stops the daemon when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until a termination signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;
        let shutdown = self.shutdown.clone();

        self.run_until(async move {
            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = shutdown.cancelled() => {}
            }
        })
        .await
    }

    /// Start every component, wait for `stop`, then shut down.
    ///
    /// Configuration problems are reported before anything starts.
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> anyhow::Result<()> {
        let config = &self.config;
        config.validate()?;

        let credentials = config.load_credentials()?;
        let tls = config.tls_acceptor()?;
        let reporter = HttpShareReporter::new(&config.report_url, config.report_secret.as_bytes())
            .context("failed to create share reporter")?;

        let broadcaster = Arc::new(JobBroadcaster::new());
        let ctx = SessionContext {
            broadcaster: broadcaster.clone(),
            credentials: Arc::new(credentials),
            reporter: Arc::new(reporter),
        };

        if ctx.credentials.is_empty() {
            warn!("No credentials configured; any non-empty worker name is accepted");
        }

        let addr = config.listen_addr();
        let server = StratumServer::bind(&addr, tls.clone(), ctx, self.shutdown.clone())
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;
        if tls.is_none() && !config.is_loopback() {
            warn!(addr = %addr, "Plaintext listener on a non-loopback address");
        }
        self.tracker.spawn(server.run());

        match &config.rpc_url {
            Some(url) => {
                let client = NodeRpcClient::new(url).context("invalid node RPC URL")?;
                info!(
                    node = %client.url(),
                    interval = ?config.poll_period(),
                    "Polling node for block templates"
                );
                let source = TemplateSource::new(
                    Box::new(client),
                    broadcaster,
                    config.poll_period(),
                    self.shutdown.clone(),
                );
                self.tracker.spawn(source.run());
            }
            None => warn!("No node RPC URL configured; no jobs will be produced"),
        }

        self.tracker.close();
        info!(report_url = %config.report_url, "Started.");

        stop.await;

        debug!("Shutting down.");
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::config::ConfigError;

    fn config(args: &[&str]) -> Config {
        let argv = ["bridged", "--report-secret", "s", "--host", "127.0.0.1", "--port", "0"];
        Config::try_parse_from(argv.iter().chain(args).copied()).unwrap()
    }

    #[tokio::test]
    async fn refuses_to_start_with_half_configured_tls() {
        let daemon = Daemon::new(config(&["--tls-cert", "/tmp/cert.pem"]));
        let err = daemon.run_until(async {}).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::IncompleteTls { .. })
        ));
    }

    #[tokio::test]
    async fn refuses_to_start_with_unreadable_tls() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        let daemon = Daemon::new(config(&[
            "--tls-cert",
            cert.to_str().unwrap(),
            "--tls-key",
            key.to_str().unwrap(),
        ]));

        let err = daemon.run_until(async {}).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Tls(_))
        ));
    }

    #[tokio::test]
    async fn starts_and_stops_without_node() {
        let daemon = Daemon::new(config(&[]));
        let shutdown = daemon.shutdown_token();
        let stop = shutdown.clone();

        let run = tokio::spawn(daemon.run_until(async move { stop.cancelled().await }));
        tokio::task::yield_now().await;

        shutdown.cancel();
        run.await.unwrap().unwrap();
    }
}
