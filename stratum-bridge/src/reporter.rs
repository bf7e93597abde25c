//! Share reporting to the external accounting service.
//!
//! Each accepted submission becomes one signed HTTP POST. The body is the
//! JSON encoding of a [`ShareReport`]; the `X-REPORT-SIG` header carries the
//! hex HMAC-SHA256 of exactly those body bytes under a shared secret. Only a
//! 200 answer counts as credited. There is no retry here: a rejected report
//! is surfaced to the worker, who may resubmit.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-REPORT-SIG";

/// Upper bound on one report round trip.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// A share accepted from a worker, before it is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareSubmission {
    /// Worker name as given in the submit
    pub worker: String,

    /// Job the share claims to be for
    pub job_id: String,

    /// Nonce as sent by the worker
    pub nonce: String,

    /// Shares credited for this submission
    pub shares: u64,
}

/// Body posted to the accounting endpoint.
///
/// Field order is the serialization order, which the signature covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareReport {
    pub miner_id: String,
    pub worker_name: String,
    pub shares: u64,
}

impl ShareReport {
    /// Report for `submission`, credited to the session's identity.
    pub fn for_submission(miner_id: &str, worker_name: &str, submission: &ShareSubmission) -> Self {
        Self {
            miner_id: miner_id.to_string(),
            worker_name: worker_name.to_string(),
            shares: submission.shares,
        }
    }
}

/// Reasons a report was not credited.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("accounting endpoint answered {0}")]
    Status(StatusCode),

    #[error("report request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("report encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unusable report secret")]
    InvalidKey,
}

impl ReportError {
    /// Short reason string sent back to the worker.
    pub fn reason(&self) -> String {
        match self {
            ReportError::Status(status) => format!("report_error:{}", status.as_u16()),
            _ => "report_failed".to_string(),
        }
    }
}

/// Destination for share reports.
#[async_trait]
pub trait ShareReporter: Send + Sync {
    /// Report one share. `Ok` means the accounting side credited it.
    async fn report(&self, report: &ShareReport) -> Result<(), ReportError>;
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, ReportError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| ReportError::InvalidKey)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex signature against `body` in constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Reporter posting to an HTTP accounting endpoint.
pub struct HttpShareReporter {
    http: HttpClient,
    url: String,
    secret: Vec<u8>,
}

impl HttpShareReporter {
    pub fn new(url: impl Into<String>, secret: impl Into<Vec<u8>>) -> Result<Self, ReportError> {
        Self::with_timeout(url, secret, REPORT_TIMEOUT)
    }

    pub fn with_timeout(
        url: impl Into<String>,
        secret: impl Into<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Self, ReportError> {
        Ok(Self {
            http: HttpClient::builder().timeout(timeout).build()?,
            url: url.into(),
            secret: secret.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ShareReporter for HttpShareReporter {
    async fn report(&self, report: &ShareReport) -> Result<(), ReportError> {
        let body = serde_json::to_vec(report)?;
        let signature = sign(&self.secret, &body)?;

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ReportError::Status(status));
        }

        debug!(
            miner_id = %report.miner_id,
            shares = report.shares,
            "Share credited"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    use super::*;

    const SECRET: &[u8] = b"change_this_report_secret";

    #[derive(Clone)]
    struct Accounting {
        status: StatusCode,
        received: Arc<Mutex<Vec<(ShareReport, bool)>>>,
    }

    /// Endpoint that verifies the signature the way the accounting side does.
    async fn report_share(
        State(accounting): State<Accounting>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let valid = verify_signature(SECRET, &body, signature);
        let report: ShareReport = serde_json::from_slice(&body).unwrap();
        accounting.received.lock().push((report, valid));

        if valid { accounting.status } else { StatusCode::UNAUTHORIZED }
    }

    async fn spawn_accounting(status: StatusCode) -> (SocketAddr, Accounting) {
        let accounting = Accounting {
            status,
            received: Arc::default(),
        };
        let app = Router::new()
            .route("/api/report_share", post(report_share))
            .with_state(accounting.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (addr, accounting)
    }

    fn alice() -> ShareReport {
        ShareReport {
            miner_id: "alice".to_string(),
            worker_name: "alice".to_string(),
            shares: 1,
        }
    }

    #[test]
    fn signature_is_deterministic() {
        let body = serde_json::to_vec(&alice()).unwrap();
        assert_eq!(sign(SECRET, &body).unwrap(), sign(SECRET, &body).unwrap());
        assert_ne!(sign(SECRET, &body).unwrap(), sign(b"other", &body).unwrap());
    }

    #[test]
    fn rfc4231_vector() {
        // RFC 4231 test case 2
        let mac = sign(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn tampered_body_fails_verification() {
        let mut body = serde_json::to_vec(&alice()).unwrap();
        let signature = sign(SECRET, &body).unwrap();
        assert!(verify_signature(SECRET, &body, &signature));

        let last = body.len() - 2;
        body[last] ^= 0x01;
        assert!(!verify_signature(SECRET, &body, &signature));
    }

    #[test]
    fn malformed_signature_fails_verification() {
        let body = serde_json::to_vec(&alice()).unwrap();
        assert!(!verify_signature(SECRET, &body, "not hex"));
        assert!(!verify_signature(SECRET, &body, ""));
    }

    #[test]
    fn body_field_order() {
        let body = serde_json::to_string(&alice()).unwrap();
        assert_eq!(body, r#"{"miner_id":"alice","worker_name":"alice","shares":1}"#);
    }

    #[test]
    fn submission_maps_to_session_identity() {
        let submission = ShareSubmission {
            worker: "alice.rig1".to_string(),
            job_id: "job".to_string(),
            nonce: "00000001".to_string(),
            shares: 1,
        };
        let report = ShareReport::for_submission("alice", "alice", &submission);
        assert_eq!(report, alice());
    }

    #[tokio::test]
    async fn accepted_on_200() {
        let (addr, accounting) = spawn_accounting(StatusCode::OK).await;
        let reporter =
            HttpShareReporter::new(format!("http://{}/api/report_share", addr), SECRET).unwrap();

        reporter.report(&alice()).await.unwrap();

        let received = accounting.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (alice(), true));
    }

    #[tokio::test]
    async fn rejected_on_other_status() {
        let (addr, _accounting) = spawn_accounting(StatusCode::INTERNAL_SERVER_ERROR).await;
        let reporter =
            HttpShareReporter::new(format!("http://{}/api/report_share", addr), SECRET).unwrap();

        let err = reporter.report(&alice()).await.unwrap_err();
        assert!(matches!(err, ReportError::Status(StatusCode::INTERNAL_SERVER_ERROR)));
        assert_eq!(err.reason(), "report_error:500");
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected_by_endpoint() {
        let (addr, accounting) = spawn_accounting(StatusCode::OK).await;
        let reporter =
            HttpShareReporter::new(format!("http://{}/api/report_share", addr), "wrong").unwrap();

        let err = reporter.report(&alice()).await.unwrap_err();
        assert_eq!(err.reason(), "report_error:401");
        assert!(!accounting.received.lock()[0].1);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_rejected() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let reporter =
            HttpShareReporter::new(format!("http://{}/api/report_share", addr), SECRET).unwrap();
        let err = reporter.report(&alice()).await.unwrap_err();
        assert!(matches!(err, ReportError::Request(_)));
        assert_eq!(err.reason(), "report_failed");
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let app = Router::new().route(
            "/api/report_share",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                StatusCode::OK
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let reporter = HttpShareReporter::with_timeout(
            format!("http://{}/api/report_share", addr),
            SECRET,
            Duration::from_millis(200),
        )
        .unwrap();

        let err = reporter.report(&alice()).await.unwrap_err();
        assert!(matches!(&err, ReportError::Request(e) if e.is_timeout()));
        assert_eq!(err.reason(), "report_failed");
    }
}
