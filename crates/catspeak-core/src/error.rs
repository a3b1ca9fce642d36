//! Codec errors and protocol error types with suggestions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::string::FromUtf8Error;

/// A codec failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Input that should be text is not valid UTF-8.
    #[error("input is not valid UTF-8 text: {0}")]
    Encoding(#[source] std::str::Utf8Error),

    /// A complete group of four holds something other than a digit.
    ///
    /// `position` is the char index in the decoder input.
    #[error("unexpected character {ch:?} at position {position}")]
    UnexpectedCharacter { ch: char, position: usize },

    /// The decoded bytes are not valid UTF-8.
    #[error("decoded bytes are not valid UTF-8: {0}")]
    InvalidUtf8(#[source] FromUtf8Error),
}

/// Error codes for protocol responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    ServiceFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::ServiceFailed => write!(f, "SERVICE_FAILED"),
        }
    }
}

/// An error response with a hint for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    /// Create an invalid input error with a custom suggestion.
    pub fn invalid_input_with_suggestion(
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    /// Nothing left to convert after trimming whitespace.
    pub fn empty_submission() -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: "Nothing to convert: input is empty after trimming".to_string(),
            suggestion: Some("Pass some text, e.g. 'catspeak send hello'".into()),
        }
    }

    /// A collaborator such as the clipboard command failed.
    pub fn service_failed(service: &str, error: &str) -> Self {
        Self {
            code: ErrorCode::ServiceFailed,
            message: format!("{} failed: {}", service, error),
            suggestion: Some(
                "Check CATSPEAK_CLIPBOARD_CMD and the daemon log, or unset it to keep copies in memory"
                    .into(),
            ),
        }
    }

    /// The assistant is already running its quit sequence.
    pub fn shutting_down() -> Self {
        Self {
            code: ErrorCode::ServiceFailed,
            message: "The assistant is shutting down".to_string(),
            suggestion: Some("Wait a moment and retry; the daemon restarts on demand".into()),
        }
    }
}
