//! The uniform result returned across the engine boundary.
//!
//! Engines use typed `Result`s internally and convert at the boundary, so
//! a failed command is a value (`success: false`) rather than a panic.

use serde::{Deserialize, Serialize};

/// `{success, value?, error?}` as consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    /// A successful result carrying a value.
    pub fn ok(value: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            value: Some(value.into()),
            error: None,
        }
    }

    /// A successful result with no value.
    pub fn ok_empty() -> Self {
        Self {
            success: true,
            value: None,
            error: None,
        }
    }

    /// A failed result.
    pub fn err(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(message.to_string()),
        }
    }

    /// Convert a typed result, rendering the error with its `Display` impl.
    pub fn from_result<T, E>(result: Result<T, E>) -> Self
    where
        T: Into<serde_json::Value>,
        E: std::fmt::Display,
    {
        match result {
            Ok(v) => Self::ok(v),
            Err(e) => Self::err(e),
        }
    }

    /// Convert a typed result whose success value is any serializable type.
    pub fn from_serialize<T, E>(result: Result<T, E>) -> Self
    where
        T: Serialize,
        E: std::fmt::Display,
    {
        match result {
            Ok(v) => match serde_json::to_value(v) {
                Ok(value) => Self::ok(value),
                Err(e) => Self::err(format!("failed to encode result: {e}")),
            },
            Err(e) => Self::err(e),
        }
    }

    /// The value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(|v| v.as_str())
    }

    /// The value as an integer, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        self.value.as_ref().and_then(|v| v.as_i64())
    }
}
