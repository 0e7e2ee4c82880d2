use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The outcome code carried in the `e` field of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ErrorCode {
    /// All went well.
    Success,

    /// The submitted password did not match.
    WrongPassword,

    /// A protected command was sent before unlocking the connection.
    Unauthenticated,

    /// The device did not answer in time.
    Timeout,

    /// The device link was down when the command was due.
    DeviceUnavailable,

    /// A reconnect was asked for but the device is fine.
    ReconnectNotNeeded,

    /// The internal command is not known.
    UnknownCommand,

    /// The device command is too long.
    CommandTooLong,

    /// No power control line is configured.
    FeatureUnavailable,

    /// A hardware or shell action failed, or the device went away.
    ActionFailed,
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::Success => 0,
            ErrorCode::WrongPassword => 1,
            ErrorCode::Unauthenticated => 2,
            ErrorCode::Timeout => 3,
            ErrorCode::DeviceUnavailable => 4,
            ErrorCode::ReconnectNotNeeded => 5,
            ErrorCode::UnknownCommand => 6,
            ErrorCode::CommandTooLong => 7,
            ErrorCode::FeatureUnavailable => 9,
            ErrorCode::ActionFailed => 10,
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => ErrorCode::Success,
            1 => ErrorCode::WrongPassword,
            2 => ErrorCode::Unauthenticated,
            3 => ErrorCode::Timeout,
            4 => ErrorCode::DeviceUnavailable,
            5 => ErrorCode::ReconnectNotNeeded,
            6 => ErrorCode::UnknownCommand,
            7 => ErrorCode::CommandTooLong,
            9 => ErrorCode::FeatureUnavailable,
            10 => ErrorCode::ActionFailed,
            other => return Err(format!("unknown error code {other}")),
        })
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// A message from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The command. Several device commands may be joined by `;`.
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Opaque tag echoed back in replies.
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<Value>,

    /// Parameter for `/PASS`.
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Truthy means the commands jump the queue.
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Value>,
}

impl Request {
    /// A request for the given command.
    pub fn new(command: &str) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }

    /// Attach a flag.
    pub fn with_flag<V: Into<Value>>(mut self, flag: V) -> Self {
        self.flag = Some(flag.into());
        self
    }

    /// Attach a value.
    pub fn with_value<V: Into<Value>>(mut self, value: V) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Ask for priority queueing.
    pub fn prioritized(mut self) -> Self {
        self.priority = Some(Value::Bool(true));
        self
    }

    /// Whether `p` was given and truthy.
    pub fn is_prioritized(&self) -> bool {
        self.priority.as_ref().map(is_truthy).unwrap_or(false)
    }

    /// The value as text, for comparing against a password.
    pub fn value_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// An example request.
    pub fn example() -> Self {
        Self::new("PL1;SE12").with_flag("t1")
    }

    /// Turn a request into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }
}

/// Javascript truthiness, which is what existing clients expect of `p`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|n| n != 0.0 && !n.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Uppercase, trim and drop line breaks.
pub fn normalize_command(raw: &str) -> String {
    raw.to_uppercase().trim().replace(['\r', '\n'], "")
}

/// Split a normalized device command line into its non-empty parts.
pub fn split_commands(normalized: &str) -> Vec<String> {
    normalized
        .split(';')
        .filter(|part| !part.is_empty())
        .map(Into::into)
        .collect()
}

/// The result field of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyValue {
    /// Text, e.g. a device answer.
    Text(String),

    /// A number, e.g. a count.
    Number(i64),

    /// A yes/no answer.
    Bool(bool),
}

impl ReplyValue {
    /// The empty string, used for failed commands.
    pub fn empty() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for ReplyValue {
    fn from(s: &str) -> Self {
        Self::Text(s.into())
    }
}

impl From<String> for ReplyValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for ReplyValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for ReplyValue {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for ReplyValue {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for ReplyValue {
    fn from(n: u64) -> Self {
        Self::Number(n as i64)
    }
}

impl From<u32> for ReplyValue {
    fn from(n: u32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u16> for ReplyValue {
    fn from(n: u16) -> Self {
        Self::Number(n.into())
    }
}

impl From<usize> for ReplyValue {
    fn from(n: usize) -> Self {
        Self::Number(n as i64)
    }
}

impl Display for ReplyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyValue::Text(s) => write!(f, "{s:?}"),
            ReplyValue::Number(n) => write!(f, "{n}"),
            ReplyValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A message to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// The command this is about.
    #[serde(rename = "c")]
    pub command: String,

    /// The flag of the originating request, if any.
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<Value>,

    /// The result.
    #[serde(rename = "r")]
    pub result: ReplyValue,

    /// The outcome.
    #[serde(rename = "e")]
    pub error: ErrorCode,
}

impl Reply {
    /// A successful reply.
    pub fn ok<R: Into<ReplyValue>>(command: &str, flag: Option<Value>, result: R) -> Self {
        Self {
            command: command.into(),
            flag,
            result: result.into(),
            error: ErrorCode::Success,
        }
    }

    /// A failed reply with an empty result.
    pub fn failed(command: &str, flag: Option<Value>, error: ErrorCode) -> Self {
        Self::with_code(command, flag, ReplyValue::empty(), error)
    }

    /// A reply with an arbitrary result and code.
    pub fn with_code<R: Into<ReplyValue>>(
        command: &str,
        flag: Option<Value>,
        result: R,
        error: ErrorCode,
    ) -> Self {
        Self {
            command: command.into(),
            flag,
            result: result.into(),
            error,
        }
    }

    /// An example reply to a device command.
    pub fn example() -> Self {
        Self::ok("PL1", Some("t1".into()), "R")
    }

    /// Turn a reply into serialized json.
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("Should serialize well")
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} (e{})", self.command, self.result, self.error)
    }
}
