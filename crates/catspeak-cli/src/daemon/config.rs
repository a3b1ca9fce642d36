//! Assistant configuration from the environment.
//!
//! - `CATSPEAK_CLIPBOARD_CMD`: command that receives copied text on stdin,
//!   split on whitespace (e.g. `wl-copy` or `xclip -selection clipboard`)
//! - `CATSPEAK_NOTIFY`: `0`, `false`, `off` or `no` disables notifications

use std::env;

/// Runtime settings for the assistant daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Program and arguments for the external clipboard, if any.
    pub clipboard_command: Option<Vec<String>>,
    /// Whether confirmations are shown after a submission.
    pub notifications: bool,
}

impl Config {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(
            env::var("CATSPEAK_CLIPBOARD_CMD").ok().as_deref(),
            env::var("CATSPEAK_NOTIFY").ok().as_deref(),
        )
    }

    fn from_vars(clipboard: Option<&str>, notify: Option<&str>) -> Self {
        let clipboard_command = clipboard
            .map(|cmd| cmd.split_whitespace().map(String::from).collect::<Vec<_>>())
            .filter(|argv| !argv.is_empty());

        let notifications = !matches!(
            notify.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("0" | "false" | "off" | "no")
        );

        Self {
            clipboard_command,
            notifications,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(None, None);
        assert_eq!(config.clipboard_command, None);
        assert!(config.notifications);
    }

    #[test]
    fn test_clipboard_command_is_split() {
        let config = Config::from_vars(Some("xclip  -selection clipboard"), None);
        assert_eq!(
            config.clipboard_command,
            Some(vec![
                "xclip".to_string(),
                "-selection".to_string(),
                "clipboard".to_string()
            ])
        );
    }

    #[test]
    fn test_blank_clipboard_command_is_ignored() {
        assert_eq!(Config::from_vars(Some("   "), None).clipboard_command, None);
    }

    #[test]
    fn test_notifications_can_be_disabled() {
        for value in ["0", "false", "OFF", " no "] {
            assert!(!Config::from_vars(None, Some(value)).notifications, "{}", value);
        }
        assert!(Config::from_vars(None, Some("1")).notifications);
    }
}
