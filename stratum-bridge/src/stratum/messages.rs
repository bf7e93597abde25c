//! Worker protocol messages.
//!
//! Requests arrive as newline-delimited JSON objects with `id`, `method` and
//! `params`. They are parsed once, at the boundary, into a [`Request`] with
//! typed parameters; the session state machine never sees raw JSON.
//! Replies and pushes are [`ServerMessage`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::job::Job;

/// Wire method names.
pub mod method {
    pub const SUBSCRIBE: &str = "mining.subscribe";
    pub const EXTRANONCE_SUBSCRIBE: &str = "mining.extranonce.subscribe";
    pub const AUTHORIZE: &str = "mining.authorize";
    pub const SUBMIT: &str = "mining.submit";
    pub const NOTIFY: &str = "mining.notify";
}

/// Reason strings carried in a response's `error` field.
pub mod reason {
    pub const INVALID_JSON: &str = "invalid json";
    pub const LINE_TOO_LONG: &str = "line too long";
    pub const UNKNOWN_METHOD: &str = "unknown method";
    pub const INVALID_PARAMS: &str = "invalid params";
    pub const AUTH_FAILED: &str = "auth failed";
    pub const UNAUTHORIZED: &str = "unauthorized";
}

/// Placeholder returned in place of a real extranonce1 on subscribe.
pub const EXTRANONCE_PLACEHOLDER: &str = "extranonce_placeholder";

/// A parsed request from a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    /// Request id, echoed verbatim in the response
    pub id: Value,

    pub request: Request,
}

/// The fixed set of methods a worker may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Subscribe,
    ExtranonceSubscribe,
    Authorize(AuthorizeParams),
    Submit(SubmitParams),
    /// Any other method, or none at all
    Unknown { method: Option<String> },
}

/// `mining.authorize` parameters: `[user, password]`.
///
/// Missing entries read as empty strings, which authorization then rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeParams {
    pub username: String,
    pub password: String,
}

/// `mining.submit` parameters: `[worker, job_id, nonce]`.
///
/// Worker and job id are required; the nonce defaults to empty. Trailing
/// entries (extranonce2, ntime, ...) are accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    pub worker: String,
    pub job_id: String,
    pub nonce: String,
}

/// Why a line could not become a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Not JSON, or not a JSON object
    InvalidJson,

    /// Known method, unusable parameters
    InvalidParams { id: Value, reason: String },
}

impl ClientMessage {
    /// Parse one line received from a worker.
    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(line).map_err(|_| MessageError::InvalidJson)?;
        let Value::Object(mut object) = value else {
            return Err(MessageError::InvalidJson);
        };

        let id = object.remove("id").unwrap_or(Value::Null);
        let params = match object.remove("params") {
            Some(Value::Array(params)) => params,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                return Err(MessageError::InvalidParams {
                    id,
                    reason: "params not an array".to_string(),
                });
            }
        };

        let method = object.get("method").and_then(Value::as_str);
        let parsed = match method {
            Some(method::SUBSCRIBE) => Ok(Request::Subscribe),
            Some(method::EXTRANONCE_SUBSCRIBE) => Ok(Request::ExtranonceSubscribe),
            Some(method::AUTHORIZE) => AuthorizeParams::from_params(&params).map(Request::Authorize),
            Some(method::SUBMIT) => SubmitParams::from_params(&params).map(Request::Submit),
            other => Ok(Request::Unknown {
                method: other.map(str::to_string),
            }),
        };

        match parsed {
            Ok(request) => Ok(Self { id, request }),
            Err(reason) => Err(MessageError::InvalidParams { id, reason }),
        }
    }
}

impl AuthorizeParams {
    fn from_params(params: &[Value]) -> Result<Self, String> {
        Ok(Self {
            username: optional_string(params, 0, "username")?,
            password: optional_string(params, 1, "password")?,
        })
    }
}

impl SubmitParams {
    fn from_params(params: &[Value]) -> Result<Self, String> {
        if params.len() < 2 {
            return Err("mining.submit params too short".to_string());
        }

        let worker = params[0].as_str().ok_or("worker not a string")?.to_string();
        let job_id = params[1].as_str().ok_or("job_id not a string")?.to_string();
        let nonce = optional_string(params, 2, "nonce")?;

        Ok(Self {
            worker,
            job_id,
            nonce,
        })
    }
}

/// String parameter at `index`, empty if absent or null.
fn optional_string(params: &[Value], index: usize, name: &str) -> Result<String, String> {
    match params.get(index) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(format!("{} not a string", name)),
    }
}

/// A message sent to a worker.
///
/// Responses always carry `id`, `result` and `error` (null on success).
/// Notifications carry `id: null`, as Stratum v1 miners expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Notification {
        #[serde(default)]
        id: Value,
        method: String,
        params: Value,
    },

    Response {
        #[serde(default)]
        id: Value,
        result: Value,
        error: Option<String>,
    },
}

impl ServerMessage {
    /// Successful response.
    pub fn result(id: Value, result: Value) -> Self {
        ServerMessage::Response {
            id,
            result,
            error: None,
        }
    }

    /// Failed response with a reason.
    pub fn error(id: Value, result: Value, reason: impl Into<String>) -> Self {
        ServerMessage::Response {
            id,
            result,
            error: Some(reason.into()),
        }
    }

    /// `mining.notify` for a job.
    ///
    /// Params are `[job_id, {target, height, previousblockhash, merkle_root,
    /// header}]`; `merkle_root` is null for a job without transactions.
    pub fn notify(job: &Job) -> Self {
        ServerMessage::Notification {
            id: Value::Null,
            method: method::NOTIFY.to_string(),
            params: json!([
                job.job_id,
                {
                    "target": job.target,
                    "height": job.height,
                    "previousblockhash": job.prev_blockhash.to_string(),
                    "merkle_root": job.merkle_root.map(|root| root.to_string()),
                    "header": hex::encode(&job.header.bytes),
                }
            ]),
        }
    }

    /// The `result` of a response, if this is one.
    pub fn result_value(&self) -> Option<&Value> {
        match self {
            ServerMessage::Response { result, .. } => Some(result),
            ServerMessage::Notification { .. } => None,
        }
    }

    /// The `error` of a response, if this is one and it failed.
    pub fn error_reason(&self) -> Option<&str> {
        match self {
            ServerMessage::Response { error, .. } => error.as_deref(),
            ServerMessage::Notification { .. } => None,
        }
    }

    /// Method name for notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            ServerMessage::Notification { method, .. } => Some(method),
            ServerMessage::Response { .. } => None,
        }
    }
}
