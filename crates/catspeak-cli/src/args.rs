//! CLI argument parsing with clap derive macros.

use clap::{Parser, Subcommand};

/// Talk like a cat.
///
/// Converts text to cat speak (喵 呜 咪 嗷 and ~) and back. `encode` and
/// `decode` run locally; `send` and `reverse` go through the assistant
/// daemon, which copies the result to its clipboard and confirms with a
/// notification.
#[derive(Debug, Parser)]
#[command(name = "catspeak", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert text to cat speak and print it
    #[command(after_help = "\
Examples:
  catspeak encode 'hello'               # Encode an argument
  echo hello | catspeak encode          # Encode stdin (one trailing newline is ignored)")]
    Encode(ConvertArgs),

    /// Convert cat speak back to text and print it
    #[command(after_help = "\
Examples:
  catspeak decode '呜喵喵呜'             # Prints A
  pbpaste | catspeak decode             # Decode stdin")]
    Decode(ConvertArgs),

    /// Encode text with the assistant and copy the result to its clipboard
    Send(SubmitArgs),

    /// Decode text with the assistant and copy the result to its clipboard
    Reverse(SubmitArgs),

    /// Show the panel if hidden, hide it if visible
    #[command(after_help = "\
The same toggle is bound to SIGUSR1, so a desktop shortcut can run:
  kill -USR1 \"$(cat \"${XDG_RUNTIME_DIR}/catspeak/default.pid\")\"")]
    Toggle,

    /// Show assistant state and recent notifications
    Status,

    /// Print the last text the assistant copied
    Paste,

    /// Start the assistant daemon (usually auto-started)
    Daemon,

    /// Hide the panel, release the hotkey and stop the assistant
    Quit,
}

#[derive(Debug, clap::Args)]
pub struct ConvertArgs {
    /// Text to convert. Reads stdin when omitted.
    pub text: Option<String>,
}

#[derive(Debug, clap::Args)]
pub struct SubmitArgs {
    /// Text to convert (surrounding whitespace is trimmed)
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub text: Vec<String>,
}

impl SubmitArgs {
    /// Words joined by single spaces, as if typed into the panel.
    pub fn joined(&self) -> String {
        self.text.join(" ")
    }
}
