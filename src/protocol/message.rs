//! FSCP message model and single-line JSON encoding.
//!
//! Every message travels as one JSON object per line:
//!
//! ```json
//! {"type":"request_input","id":"1","payload":{"id":"1","prompt":"Name?"}}
//! ```
//!
//! | `type`            | payload                                   | sender |
//! |-------------------|-------------------------------------------|--------|
//! | `log`             | `level`, `text`                           | script |
//! | `progress`        | `current`, `total?`, `unit?`, `message?`  | script |
//! | `request_input`   | `id`, `prompt`, `default?`, `secret?`, `suggestions?` | script |
//! | `request_confirm` | `id`, `prompt`, `default?`                | script |
//! | `response`        | `id`, `value`                             | host   |
//! | `result`          | free-form object, `title?`, `status?`     | script |
//! | `error`           | `message`                                 | script |
//! | `done`            | `exitCode`                                | script |
//! | `cancel`          | *(empty)*                                 | host   |
//!
//! Decoding is strict: an unknown `type`, a missing payload field, or a
//! structurally invalid record is rejected with [`AppError::Protocol`].
//! Encoding never fails for a constructed [`Message`], and
//! `decode(&m.encode()) == m` holds for every message.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// Which end of the channel is allowed to emit a message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The long-lived host process.
    Host,
    /// The script child process.
    Script,
}

/// Discriminant of a [`Message`], as written in the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Streamed log line.
    Log,
    /// Progress report.
    Progress,
    /// Free-text input request.
    RequestInput,
    /// Yes/no confirmation request.
    RequestConfirm,
    /// Host answer to a pending request.
    Response,
    /// Structured result payload.
    Result,
    /// Script-reported failure.
    Error,
    /// Script completion with exit code.
    Done,
    /// Host cancellation request.
    Cancel,
}

impl MessageKind {
    /// Wire name used in the `type` field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Progress => "progress",
            Self::RequestInput => "request_input",
            Self::RequestConfirm => "request_confirm",
            Self::Response => "response",
            Self::Result => "result",
            Self::Error => "error",
            Self::Done => "done",
            Self::Cancel => "cancel",
        }
    }

    /// Parse a wire `type` value.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        let kind = match value {
            "log" => Self::Log,
            "progress" => Self::Progress,
            "request_input" => Self::RequestInput,
            "request_confirm" => Self::RequestConfirm,
            "response" => Self::Response,
            "result" => Self::Result,
            "error" => Self::Error,
            "done" => Self::Done,
            "cancel" => Self::Cancel,
            _ => return None,
        };
        Some(kind)
    }

    /// The endpoint permitted to send this kind.
    #[must_use]
    pub fn sender(self) -> Endpoint {
        match self {
            Self::Response | Self::Cancel => Endpoint::Host,
            _ => Endpoint::Script,
        }
    }
}

/// Severity of a `log` message, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose diagnostics; suppressed by the default host filter.
    Debug,
    /// Normal informational output.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure reported by the script.
    Error,
}

impl LogLevel {
    /// Wire name of the level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Payload of a `log` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    /// Severity.
    pub level: LogLevel,
    /// Log text. Older scripts send this as `message`.
    #[serde(alias = "message")]
    pub text: String,
}

/// Payload of a `progress` message.
///
/// `current` and `total` must be finite: JSON has no encoding for NaN or
/// infinity. Build through [`ProgressPayload::new`] to have that checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    /// Units completed so far.
    pub current: f64,
    /// Total units, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Unit label (`files`, `MB`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Short status line accompanying the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressPayload {
    /// Progress at `current` with no total, unit or message.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if `current` is NaN or infinite.
    pub fn new(current: f64) -> Result<Self> {
        Ok(Self {
            current: finite("current", current)?,
            total: None,
            unit: None,
            message: None,
        })
    }

    /// Set the total.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if `total` is NaN or infinite.
    pub fn with_total(mut self, total: f64) -> Result<Self> {
        self.total = Some(finite("total", total)?);
        Ok(self)
    }
}

fn finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::Protocol(format!(
            "progress {field} must be finite, got {value}"
        )))
    }
}

/// Body of a `request_input` message (the correlation id lives on [`Message`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRequest {
    /// Prompt text shown to the user.
    pub prompt: String,
    /// Pre-filled value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Whether the entered value should be masked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
    /// Completion suggestions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Body of a `request_confirm` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    /// Question shown to the user.
    pub prompt: String,
    /// Pre-selected answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<bool>,
}

/// Optional status attached to a `result` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Operation succeeded.
    Success,
    /// Operation completed without notable outcome.
    Ok,
    /// Completed with warnings.
    Warn,
    /// Completed with errors.
    Error,
}

impl ResultStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Ok => "ok",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Payload of a `result` message: a free-form object with two recognized keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Outcome classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResultStatus>,
    /// Every other key of the payload object.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// A single FSCP protocol message.
///
/// Messages are plain values; nothing mutates one after it has been sent or
/// recorded.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `log`
    Log(LogPayload),
    /// `progress`
    Progress(ProgressPayload),
    /// `request_input`
    RequestInput {
        /// Correlation id the matching `response` must carry.
        id: String,
        /// Request body.
        request: InputRequest,
    },
    /// `request_confirm`
    RequestConfirm {
        /// Correlation id the matching `response` must carry.
        id: String,
        /// Request body.
        request: ConfirmRequest,
    },
    /// `response`
    Response {
        /// Correlation id of the request being answered.
        id: String,
        /// Answer value (string for input, bool for confirm).
        value: Value,
    },
    /// `result`
    Result(ResultPayload),
    /// `error`
    Error {
        /// Failure description.
        message: String,
    },
    /// `done`
    Done {
        /// Exit code the script reports.
        exit_code: i32,
    },
    /// `cancel`
    Cancel,
}

/// Raw envelope shared by every wire record.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct DoneBody {
    #[serde(rename = "exitCode")]
    exit_code: i32,
}

impl Message {
    /// Kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Log(_) => MessageKind::Log,
            Self::Progress(_) => MessageKind::Progress,
            Self::RequestInput { .. } => MessageKind::RequestInput,
            Self::RequestConfirm { .. } => MessageKind::RequestConfirm,
            Self::Response { .. } => MessageKind::Response,
            Self::Result(_) => MessageKind::Result,
            Self::Error { .. } => MessageKind::Error,
            Self::Done { .. } => MessageKind::Done,
            Self::Cancel => MessageKind::Cancel,
        }
    }

    /// Correlation id, present on requests and responses only.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::RequestInput { id, .. }
            | Self::RequestConfirm { id, .. }
            | Self::Response { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Convenience constructor for a `log` message.
    #[must_use]
    pub fn log(level: LogLevel, text: impl Into<String>) -> Self {
        Self::Log(LogPayload {
            level,
            text: text.into(),
        })
    }

    /// Build the wire object for this message.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert("type".into(), Value::from(self.kind().as_str()));
        if let Some(id) = self.correlation_id() {
            record.insert("id".into(), Value::from(id));
        }
        record.insert("payload".into(), self.payload_value());
        Value::Object(record)
    }

    /// Encode as a single line of compact JSON (without the trailing `\n`).
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode one wire line.
    ///
    /// # Errors
    ///
    /// - [`AppError::Protocol`]`("malformed json: …")`: not a JSON object
    ///   with a string `type`.
    /// - [`AppError::Protocol`]`("unknown message type: …")`: unrecognized `type`.
    /// - [`AppError::Protocol`]`("missing required field: …")`: payload
    ///   absent or lacking a required field.
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed wire object.
    ///
    /// # Errors
    ///
    /// Same as [`Message::decode`].
    pub fn from_value(value: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

        let kind = MessageKind::from_wire(&envelope.kind).ok_or_else(|| {
            AppError::Protocol(format!("unknown message type: {}", envelope.kind))
        })?;

        if kind == MessageKind::Cancel {
            return match envelope.payload {
                None | Some(Value::Object(_)) => Ok(Self::Cancel),
                Some(_) => Err(AppError::Protocol(
                    "malformed json: cancel payload must be an object".into(),
                )),
            };
        }

        let mut payload = match envelope.payload {
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(AppError::Protocol(format!(
                    "malformed json: {} payload must be an object",
                    kind.as_str()
                )))
            }
            None => {
                return Err(AppError::Protocol(format!(
                    "missing required field: `payload` in {} message",
                    kind.as_str()
                )))
            }
        };

        let message = match kind {
            MessageKind::Log => Self::Log(payload_field(kind, payload)?),
            MessageKind::Progress => Self::Progress(payload_field(kind, payload)?),
            MessageKind::RequestInput => {
                let id = correlation(kind, envelope.id, &mut payload)?;
                Self::RequestInput {
                    id,
                    request: payload_field(kind, payload)?,
                }
            }
            MessageKind::RequestConfirm => {
                let id = correlation(kind, envelope.id, &mut payload)?;
                Self::RequestConfirm {
                    id,
                    request: payload_field(kind, payload)?,
                }
            }
            MessageKind::Response => {
                let id = correlation(kind, envelope.id, &mut payload)?;
                let body: ResponseBody = payload_field(kind, payload)?;
                Self::Response {
                    id,
                    value: body.value,
                }
            }
            MessageKind::Result => Self::Result(payload_field(kind, payload)?),
            MessageKind::Error => {
                let body: ErrorBody = payload_field(kind, payload)?;
                Self::Error {
                    message: body.message,
                }
            }
            MessageKind::Done => {
                let body: DoneBody = payload_field(kind, payload)?;
                Self::Done {
                    exit_code: body.exit_code,
                }
            }
            MessageKind::Cancel => Self::Cancel,
        };

        Ok(message)
    }

    fn payload_value(&self) -> Value {
        match self {
            Self::Log(log) => json!({ "level": log.level.as_str(), "text": log.text }),
            Self::Progress(progress) => {
                let mut map = Map::new();
                map.insert("current".into(), json!(progress.current));
                if let Some(total) = progress.total {
                    map.insert("total".into(), json!(total));
                }
                if let Some(ref unit) = progress.unit {
                    map.insert("unit".into(), Value::from(unit.as_str()));
                }
                if let Some(ref message) = progress.message {
                    map.insert("message".into(), Value::from(message.as_str()));
                }
                Value::Object(map)
            }
            Self::RequestInput { id, request } => {
                let mut map = Map::new();
                map.insert("id".into(), Value::from(id.as_str()));
                map.insert("prompt".into(), Value::from(request.prompt.as_str()));
                if let Some(ref default) = request.default {
                    map.insert("default".into(), Value::from(default.as_str()));
                }
                if request.secret {
                    map.insert("secret".into(), Value::Bool(true));
                }
                if !request.suggestions.is_empty() {
                    map.insert("suggestions".into(), json!(request.suggestions));
                }
                Value::Object(map)
            }
            Self::RequestConfirm { id, request } => {
                let mut map = Map::new();
                map.insert("id".into(), Value::from(id.as_str()));
                map.insert("prompt".into(), Value::from(request.prompt.as_str()));
                if let Some(default) = request.default {
                    map.insert("default".into(), Value::Bool(default));
                }
                Value::Object(map)
            }
            Self::Response { id, value } => json!({ "id": id, "value": value }),
            Self::Result(result) => {
                let mut map = result.data.clone();
                if let Some(ref title) = result.title {
                    map.insert("title".into(), Value::from(title.as_str()));
                }
                if let Some(status) = result.status {
                    map.insert("status".into(), Value::from(status.as_str()));
                }
                Value::Object(map)
            }
            Self::Error { message } => json!({ "message": message }),
            Self::Done { exit_code } => json!({ "exitCode": exit_code }),
            Self::Cancel => Value::Object(Map::new()),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

/// Deserialize a payload object into its typed body.
fn payload_field<T>(kind: MessageKind, payload: Map<String, Value>) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(Value::Object(payload)).map_err(|e| {
        AppError::Protocol(format!(
            "missing required field: {} payload: {e}",
            kind.as_str()
        ))
    })
}

/// Reconcile the envelope `id` with `payload.id`; at least one is required.
fn correlation(
    kind: MessageKind,
    envelope_id: Option<String>,
    payload: &mut Map<String, Value>,
) -> Result<String> {
    let payload_id = match payload.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id),
        Some(other) => {
            return Err(AppError::Protocol(format!(
                "malformed json: {} payload id must be a string, got {other}",
                kind.as_str()
            )))
        }
    };

    match (envelope_id, payload_id) {
        (Some(outer), Some(inner)) if outer != inner => Err(AppError::Protocol(format!(
            "malformed json: {} id mismatch ({outer} vs {inner})",
            kind.as_str()
        ))),
        (Some(id), _) | (None, Some(id)) => Ok(id),
        (None, None) => Err(AppError::Protocol(format!(
            "missing required field: `id` in {} message",
            kind.as_str()
        ))),
    }
}
