//! Application error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::process::ProcessState;

/// Application error carrying a kind and a flat context payload.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The controller is not running as a VDE master
    WrongMode,
    /// No process is registered under the instance name
    InstanceNotFound,
    /// An instance with this name is already registered
    InstanceExists,
    /// Start/stop requested from a state that does not allow it
    InvalidState,
    /// Instance or role name is not a safe identifier
    InvalidName,
    /// Configuration missing or unreadable
    Config,
    /// File system error
    Io,
    /// Database role/database statement failed
    Db,
    /// Process supervision error
    Process,
    /// Waiting for a start/stop transition timed out
    WaitTimeout,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::WrongMode => 1000,
            Self::InstanceNotFound => 1001,
            Self::InstanceExists => 1002,
            Self::InvalidState => 1003,
            Self::InvalidName => 1004,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Db => 2003,
            Self::Process => 3001,
            Self::WaitTimeout => 3002,
            Self::Other => 9999,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn wrong_mode(op: &str) -> Self {
        Self::new(
            ErrorKind::WrongMode,
            HashMap::from([
                ("op".to_string(), op.to_string()),
                (
                    "detail".to_string(),
                    "node must be running as VDE master".to_string(),
                ),
            ]),
        )
    }

    pub fn instance_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceNotFound,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn instance_exists(name: &str) -> Self {
        Self::new(
            ErrorKind::InstanceExists,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn invalid_state(name: &str, state: ProcessState) -> Self {
        Self::new(
            ErrorKind::InvalidState,
            HashMap::from([
                ("name".to_string(), name.to_string()),
                ("state".to_string(), state.to_string()),
            ]),
        )
    }

    pub fn invalid_name(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidName,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn db(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Db, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn wait_timeout(name: &str, transition: &str, secs: u64) -> Self {
        Self::new(
            ErrorKind::WaitTimeout,
            HashMap::from([
                ("name".to_string(), name.to_string()),
                ("transition".to_string(), transition.to_string()),
                ("timeout_secs".to_string(), secs.to_string()),
            ]),
        )
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    /// Attach a context key, keeping an existing value for the same key.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.payload
            .entry(key.to_string())
            .or_insert_with(|| value.into());
        self
    }

    /// Tag the error with the manager operation, instance and failed step.
    pub fn during(self, op: &str, name: &str, step: &str) -> Self {
        self.with("op", op).with("name", name).with("step", step)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::db(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_sorts_payload_pairs() {
        let err = AppError::db("role exists").during("create_vde", "alpha", "create_role");
        assert_eq!(
            err.to_string(),
            "Db: detail=role exists, name=alpha, op=create_vde, step=create_role"
        );
    }

    #[test]
    fn context_does_not_override_existing_keys() {
        let err = AppError::instance_not_found("alpha").with("name", "beta");
        assert_eq!(err.get("name"), Some("alpha"));
    }

    #[test]
    fn serializes_code_and_payload() {
        let err = AppError::invalid_state("alpha", ProcessState::Stopped);
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["code"], 1003);
        assert_eq!(value["payload"]["state"], "STOPPED");
    }

    #[test]
    fn empty_detail_yields_empty_payload() {
        let err = AppError::process("");
        assert_eq!(err.to_string(), "Process");
    }
}
