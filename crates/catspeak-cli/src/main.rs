//! catspeak CLI and assistant daemon entry point.

mod args;
mod daemon;

use std::io::Read;

use anyhow::Context;
use catspeak_core::codec::{is_error_result, Direction};
use catspeak_core::protocol::{Command, Request, ResponseData};
use clap::Parser;
use tracing::{error, info};
use uuid::Uuid;

use crate::args::{Cli, Commands};
use crate::daemon::{DaemonClient, DaemonServer};

fn main() {
    // Logs go to stderr so converted text on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon => {
            run_daemon();
            return;
        }
        Commands::Encode(args) => run_local(Direction::Encode, args.text),
        Commands::Decode(args) => run_local(Direction::Decode, args.text),
        Commands::Quit => run_quit(),
        command => run_client_command(command),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

/// Convert locally and print the result.
///
/// Returns `Ok(false)` when the printed string is a tagged codec error.
fn run_local(direction: Direction, text: Option<String>) -> anyhow::Result<bool> {
    let rendered = match text {
        Some(text) => direction.render(&text),
        None => {
            let mut input = Vec::new();
            std::io::stdin()
                .read_to_end(&mut input)
                .context("Failed to read stdin")?;
            direction.render_bytes(strip_trailing_newline(&input))
        }
    };

    println!("{}", rendered);
    Ok(!is_error_result(&rendered))
}

/// Drop a single trailing `\n` or `\r\n`.
fn strip_trailing_newline(input: &[u8]) -> &[u8] {
    let input = input.strip_suffix(b"\n").unwrap_or(input);
    input.strip_suffix(b"\r").unwrap_or(input)
}

/// Convert CLI args to a protocol Command.
fn cli_to_command(command: Commands) -> Option<Command> {
    match command {
        Commands::Send(args) => Some(Command::Submit {
            text: args.joined(),
            direction: Direction::Encode,
        }),
        Commands::Reverse(args) => Some(Command::Submit {
            text: args.joined(),
            direction: Direction::Decode,
        }),
        Commands::Toggle => Some(Command::Toggle),
        Commands::Status => Some(Command::Status),
        Commands::Paste => Some(Command::Paste),
        Commands::Quit => Some(Command::Quit),
        Commands::Encode(_) | Commands::Decode(_) | Commands::Daemon => None,
    }
}

/// Run a command against the daemon, starting it if needed.
fn run_client_command(command: Commands) -> anyhow::Result<bool> {
    let Some(command) = cli_to_command(command) else {
        return Ok(true);
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut client = DaemonClient::connect().await?;
        send_and_print(&mut client, command).await
    })
}

/// Quit a running daemon. Does not start one.
fn run_quit() -> anyhow::Result<bool> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        match DaemonClient::connect_existing().await? {
            Some(mut client) => send_and_print(&mut client, Command::Quit).await,
            None => {
                println!("Assistant is not running");
                Ok(true)
            }
        }
    })
}

async fn send_and_print(client: &mut DaemonClient, command: Command) -> anyhow::Result<bool> {
    let request = Request {
        id: Uuid::new_v4().to_string(),
        command,
    };

    let response = client.request(request).await?;

    if !response.success {
        if let Some(err) = response.error {
            eprintln!("Error: {}", err);
        }
        return Ok(false);
    }

    let Some(data) = response.data else {
        return Ok(true);
    };

    match data {
        ResponseData::Submitted { output, failed, .. } => {
            println!("{}", output);
            Ok(!failed)
        }
        ResponseData::Panel { visible } => {
            println!("Panel {}", if visible { "shown" } else { "hidden" });
            Ok(true)
        }
        ResponseData::Clipboard { content } => match content {
            Some(content) => {
                println!("{}", content);
                Ok(true)
            }
            None => {
                eprintln!("Clipboard is empty");
                Ok(false)
            }
        },
        ResponseData::Ok { message } => {
            println!("{}", message);
            Ok(true)
        }
        status @ ResponseData::Status(_) => {
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(true)
        }
    }
}

/// Run the daemon server with graceful signal handling.
///
/// SIGINT and SIGTERM run the quit sequence before exiting. The
/// DaemonServer's Drop impl cleans up socket and PID files.
fn run_daemon() {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    runtime.block_on(async {
        let server = match DaemonServer::bind().await {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to start assistant: {:#}", e);
                std::process::exit(1);
            }
        };

        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Assistant error: {:#}", e);
                    std::process::exit(1);
                }
                return;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, shutting down gracefully");
            }
        }

        server.quit().await;
        // Server is dropped here, triggering cleanup of socket and PID files
    });
}

/// Wait for SIGTERM signal (Unix only).
///
/// If signal registration fails, logs a warning and waits indefinitely.
#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(
                "Failed to register SIGTERM handler: {}, assistant will only respond to SIGINT",
                e
            );
            std::future::pending::<()>().await;
        }
    }
}

/// SIGTERM is not available on non-Unix platforms; use a never-completing future.
#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
