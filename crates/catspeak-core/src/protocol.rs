//! Protocol types for CLI-daemon communication.

use serde::{Deserialize, Serialize};

use crate::codec::Direction;
use crate::error::ApiError;

/// A request from CLI to daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub command: Command,
}

/// Commands the daemon can execute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Convert a line of text and copy the result to the clipboard.
    Submit { text: String, direction: Direction },
    /// Show the panel if hidden, hide it if visible.
    Toggle,
    /// Report panel, hotkey and clipboard state.
    Status,
    /// Return the last copied text.
    Paste,
    /// Run the quit sequence and stop the daemon.
    Quit,
}

/// A response from daemon to CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    pub fn success(id: impl Into<String>, data: ResponseData) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: ApiError) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

/// Response payload variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// Result of a submission. `output` is what was copied; when `failed`
    /// is set it holds the tagged error string.
    Submitted {
        direction: Direction,
        output: String,
        failed: bool,
    },
    /// Panel visibility after a toggle.
    Panel { visible: bool },
    /// Assistant state.
    Status(StatusInfo),
    /// Clipboard contents, if anything has been copied.
    Clipboard { content: Option<String> },
    /// Generic success message.
    Ok { message: String },
}

/// Snapshot of the assistant's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub pid: u32,
    pub started_at: String,
    pub panel_visible: bool,
    pub hotkey_registered: bool,
    pub tray_running: bool,
    pub notifications: Vec<NotificationInfo>,
}

/// A notification shown by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationInfo {
    pub title: String,
    pub message: String,
    pub shown_at: String,
}
