//! Listener that turns accepted sockets into worker sessions.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::error::StratumError;
use super::session::{SessionContext, WorkerSession};
use crate::broadcaster::SessionId;

/// How long a client gets to finish the TLS handshake.
pub const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed accept, so a full fd table does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts worker connections and runs one session task per connection.
pub struct StratumServer {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    ctx: SessionContext,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    next_id: SessionId,
}

impl StratumServer {
    /// Bind the listening socket.
    ///
    /// With `tls` set, every connection must complete a TLS handshake before
    /// it is served.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        tls: Option<TlsAcceptor>,
        ctx: SessionContext,
        shutdown: CancellationToken,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            tls,
            ctx,
            shutdown,
            tracker: TaskTracker::new(),
            next_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait for every session to
    /// finish.
    pub async fn run(mut self) {
        let addr = self.local_addr().ok();
        info!(
            addr = ?addr,
            tls = self.tls.is_some(),
            "Accepting worker connections"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }

                _ = self.shutdown.cancelled() => break,
            }
        }

        drop(self.listener);
        self.tracker.close();
        debug!(sessions = self.tracker.len(), "Waiting for sessions to close");
        self.tracker.wait().await;
        debug!("Stratum server stopped");
    }

    fn spawn_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = self.next_id;
        self.next_id += 1;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Could not set TCP_NODELAY");
        }

        let ctx = self.ctx.clone();
        let shutdown = self.shutdown.child_token();
        let tls = self.tls.clone();
        let peer_name = peer.to_string();

        self.tracker.spawn(async move {
            let result = match tls {
                None => {
                    let conn = Connection::new(stream);
                    WorkerSession::new(id, peer_name, conn, ctx, shutdown)
                        .run()
                        .await
                }
                Some(acceptor) => {
                    let handshake =
                        tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream))
                            .await
                            .map_err(|_| StratumError::HandshakeTimeout)
                            .and_then(|accepted| accepted.map_err(StratumError::from));
                    let stream = match handshake {
                        Ok(stream) => stream,
                        Err(e) => {
                            warn!(peer = %peer, error = %e, "TLS handshake failed");
                            return;
                        }
                    };
                    let conn = Connection::new(stream);
                    WorkerSession::new(id, peer_name, conn, ctx, shutdown)
                        .run()
                        .await
                }
            };

            if let Err(e) = result {
                debug!(session = id, peer = %peer, error = %e, "Connection failed");
            }
        });
    }
}
