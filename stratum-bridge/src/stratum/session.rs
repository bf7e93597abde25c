//! Per-connection protocol state machine.
//!
//! A session walks `Connected -> Subscribed -> Authorized` and never moves
//! backwards; `Closed` is terminal and reached from anywhere when the
//! connection ends. Nothing a worker sends closes the connection by itself:
//! malformed lines, unknown methods, failed authorization and premature
//! submits are all answered on the wire.
//!
//! Job notifications reach the session through a channel fed by the
//! [`JobBroadcaster`]; the session writes them out from its own task, so a
//! slow worker only ever stalls itself.

use std::fmt;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::connection::{Frame, Transport};
use super::error::StratumResult;
use super::messages::{
    AuthorizeParams, ClientMessage, EXTRANONCE_PLACEHOLDER, MessageError, Request, ServerMessage,
    SubmitParams, reason,
};
use crate::broadcaster::{JobBroadcaster, JobReceiver, JobSender, Registration, SessionId};
use crate::credentials::CredentialMap;
use crate::job::Job;
use crate::reporter::{ShareReport, ShareReporter, ShareSubmission};

/// Where a session is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    Subscribed,
    Authorized,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connected => "connected",
            SessionState::Subscribed => "subscribed",
            SessionState::Authorized => "authorized",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared collaborators handed to every session.
#[derive(Clone)]
pub struct SessionContext {
    pub broadcaster: Arc<JobBroadcaster>,
    pub credentials: Arc<CredentialMap>,
    pub reporter: Arc<dyn ShareReporter>,
}

/// One worker connection.
pub struct WorkerSession<T> {
    id: SessionId,
    peer: String,
    transport: T,
    ctx: SessionContext,
    shutdown: CancellationToken,

    state: SessionState,
    session_token: Option<String>,
    worker_name: Option<String>,
    miner_id: Option<String>,
    extranonce_subscribed: bool,

    /// Last job this worker was notified of
    job: Option<Arc<Job>>,
    job_tx: JobSender,
    job_rx: JobReceiver,

    /// Present while authorized; dropping it deregisters
    registration: Option<Registration>,
}

impl<T: Transport> WorkerSession<T> {
    pub fn new(
        id: SessionId,
        peer: impl Into<String>,
        transport: T,
        ctx: SessionContext,
        shutdown: CancellationToken,
    ) -> Self {
        let (job_tx, job_rx) = mpsc::unbounded_channel();

        Self {
            id,
            peer: peer.into(),
            transport,
            ctx,
            shutdown,
            state: SessionState::Connected,
            session_token: None,
            worker_name: None,
            miner_id: None,
            extranonce_subscribed: false,
            job: None,
            job_tx,
            job_rx,
            registration: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve the connection until the peer leaves, a write fails or
    /// shutdown is requested, then close the session.
    pub async fn run(mut self) -> StratumResult<()> {
        debug!(session = self.id, peer = %self.peer, "Worker connected");

        let result = self.serve().await;
        self.close();
        result
    }

    async fn serve(&mut self) -> StratumResult<()> {
        loop {
            tokio::select! {
                frame = self.transport.read_frame() => {
                    match frame? {
                        Some(frame) => self.handle_frame(frame).await?,
                        None => {
                            debug!(session = self.id, "Peer closed connection");
                            return Ok(());
                        }
                    }
                }

                Some(job) = self.job_rx.recv() => {
                    self.notify(job).await?;
                }

                _ = self.shutdown.cancelled() => {
                    return Ok(());
                }
            }
        }
    }

    /// Enter `Closed` and leave the broadcaster.
    ///
    /// Safe to call more than once; only the first call has any effect.
    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.registration.take();

        info!(
            session = self.id,
            peer = %self.peer,
            worker = self.worker_name.as_deref(),
            "Worker disconnected"
        );
    }

    async fn handle_frame(&mut self, frame: Frame) -> StratumResult<()> {
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Oversized => {
                return self
                    .send(ServerMessage::error(Value::Null, Value::Null, reason::LINE_TOO_LONG))
                    .await;
            }
            Frame::NotUtf8 => {
                return self
                    .send(ServerMessage::error(Value::Null, Value::Null, reason::INVALID_JSON))
                    .await;
            }
        };

        let ClientMessage { id, request } = match ClientMessage::parse(&line) {
            Ok(msg) => msg,
            Err(MessageError::InvalidJson) => {
                debug!(session = self.id, line = %line, "Unparseable line");
                return self
                    .send(ServerMessage::error(Value::Null, Value::Null, reason::INVALID_JSON))
                    .await;
            }
            Err(MessageError::InvalidParams { id, reason: why }) => {
                debug!(session = self.id, reason = %why, "Invalid params");
                return self
                    .send(ServerMessage::error(id, json!(false), reason::INVALID_PARAMS))
                    .await;
            }
        };

        match request {
            Request::Subscribe => self.handle_subscribe(id).await,
            Request::ExtranonceSubscribe => self.handle_extranonce_subscribe(id).await,
            Request::Authorize(params) => self.handle_authorize(id, params).await,
            Request::Submit(params) => self.handle_submit(id, params).await,
            Request::Unknown { method } => {
                debug!(session = self.id, method = method.as_deref(), "Unknown method");
                self.send(ServerMessage::error(id, Value::Null, reason::UNKNOWN_METHOD))
                    .await
            }
        }
    }

    async fn handle_subscribe(&mut self, id: Value) -> StratumResult<()> {
        let token = Uuid::new_v4().to_string();
        self.send(ServerMessage::result(
            id,
            json!([token, EXTRANONCE_PLACEHOLDER]),
        ))
        .await?;

        self.session_token = Some(token);
        if self.state == SessionState::Connected {
            self.state = SessionState::Subscribed;
        }
        debug!(session = self.id, state = %self.state, "Subscribed");

        if let Some(job) = self.ctx.broadcaster.current_job() {
            self.notify(job).await?;
        }
        Ok(())
    }

    async fn handle_extranonce_subscribe(&mut self, id: Value) -> StratumResult<()> {
        self.extranonce_subscribed = true;
        self.send(ServerMessage::result(id, json!([true]))).await
    }

    async fn handle_authorize(&mut self, id: Value, params: AuthorizeParams) -> StratumResult<()> {
        let AuthorizeParams { username, password } = params;

        if let Err(e) = self.ctx.credentials.check(&username, &password) {
            warn!(
                session = self.id,
                peer = %self.peer,
                worker = %username,
                reason = %e,
                "Authorization failed"
            );
            return self
                .send(ServerMessage::error(id, json!(false), reason::AUTH_FAILED))
                .await;
        }

        self.miner_id = Some(username.clone());
        self.worker_name = Some(username);
        self.state = SessionState::Authorized;

        if self.registration.is_none() {
            let last_seen = self.job.as_ref().map(|job| job.job_id.as_str());
            let registration = self
                .ctx
                .broadcaster
                .register(self.id, self.job_tx.clone(), last_seen);
            self.registration = Some(registration);
        }

        info!(
            session = self.id,
            peer = %self.peer,
            worker = self.worker_name.as_deref(),
            "Worker authorized"
        );
        self.send(ServerMessage::result(id, json!(true))).await
    }

    async fn handle_submit(&mut self, id: Value, params: SubmitParams) -> StratumResult<()> {
        if self.state != SessionState::Authorized {
            debug!(session = self.id, state = %self.state, "Submit before authorize");
            return self
                .send(ServerMessage::error(id, json!(false), reason::UNAUTHORIZED))
                .await;
        }

        let submission = ShareSubmission {
            worker: params.worker,
            job_id: params.job_id,
            nonce: params.nonce,
            shares: 1,
        };

        if self
            .job
            .as_ref()
            .is_none_or(|job| job.job_id != submission.job_id)
        {
            debug!(
                session = self.id,
                job_id = %submission.job_id,
                "Submit for a job other than the current one"
            );
        }

        let miner_id = self.miner_id.as_deref().unwrap_or("unknown");
        let worker_name = self.worker_name.as_deref().unwrap_or_default();
        let report = ShareReport::for_submission(miner_id, worker_name, &submission);

        match self.ctx.reporter.report(&report).await {
            Ok(()) => {
                debug!(
                    session = self.id,
                    worker = %submission.worker,
                    job_id = %submission.job_id,
                    nonce = %submission.nonce,
                    "Share credited"
                );
                self.send(ServerMessage::result(id, json!(true))).await
            }
            Err(e) => {
                warn!(
                    session = self.id,
                    worker = %submission.worker,
                    job_id = %submission.job_id,
                    error = %e,
                    "Share report rejected"
                );
                self.send(ServerMessage::error(id, json!(false), e.reason()))
                    .await
            }
        }
    }

    /// Send a job notification, unless this worker already holds that job
    /// or a newer one.
    async fn notify(&mut self, job: Arc<Job>) -> StratumResult<()> {
        if self
            .job
            .as_ref()
            .is_some_and(|held| held.sequence >= job.sequence)
        {
            return Ok(());
        }

        self.send(ServerMessage::notify(&job)).await?;
        self.job = Some(job);
        Ok(())
    }

    async fn send(&mut self, msg: ServerMessage) -> StratumResult<()> {
        self.transport.write_message(&msg).await
    }
}
