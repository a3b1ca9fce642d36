//! Unix socket server for the assistant daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use catspeak_core::codec::Direction;
use catspeak_core::error::ApiError;
use catspeak_core::protocol::{Command, Request, Response, ResponseData, StatusInfo};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::daemon::assistant::{Assistant, Services};
use crate::daemon::config::Config;
use crate::daemon::paths::InstancePaths;
use crate::daemon::services::{
    ClipboardExport, HotkeyEvent, LogNotifier, MemoryClipboard, MenuGate, MenuTray, PanelSurface,
    SignalHotkey,
};

/// Maximum number of concurrent client connections.
const MAX_CONNECTIONS: usize = 16;

/// How long to wait for in-flight connections to complete during shutdown.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum request size in bytes.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// State shared by every connection handler.
struct Shared {
    assistant: Mutex<Assistant>,
    clipboard_export: Option<ClipboardExport>,
    shutdown: Notify,
    started_at: DateTime<Utc>,
}

/// The daemon server that listens for client connections.
pub struct DaemonServer {
    listener: UnixListener,
    socket_path: PathBuf,
    pid_path: PathBuf,
    shared: Arc<Shared>,
    menu: MenuGate,
    hotkey_events: Mutex<mpsc::UnboundedReceiver<HotkeyEvent>>,
    connection_semaphore: Arc<Semaphore>,
}

impl DaemonServer {
    /// Create a daemon server bound to the default socket path, configured
    /// from the environment.
    pub async fn bind() -> Result<Self> {
        let paths = InstancePaths::from_env();
        paths
            .ensure_dir()
            .context("Failed to create socket directory")?;
        Self::bind_to(paths.socket, paths.pid, Config::from_env()).await
    }

    /// Create a daemon server bound to a specific socket path.
    ///
    /// Binds first and only then inspects an existing socket:
    /// 1. Try to bind directly
    /// 2. If the socket is in use, check the PID file to see if a daemon is alive
    /// 3. If it is dead, remove the stale socket and retry
    /// 4. If it is alive, return an error
    pub async fn bind_to(socket_path: PathBuf, pid_path: PathBuf, config: Config) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory for {:?}", socket_path)
            })?;
        }

        // Written right after bind so a live daemon never has a socket
        // without a PID file.
        let write_pid = |pid_path: &PathBuf| -> Result<()> {
            std::fs::write(pid_path, std::process::id().to_string())
                .with_context(|| format!("Failed to write PID file: {:?}", pid_path))
        };

        let listener = match UnixListener::bind(&socket_path) {
            Ok(l) => {
                write_pid(&pid_path)?;
                l
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                if is_daemon_alive(&pid_path) {
                    anyhow::bail!(
                        "Assistant already running (socket {:?} in use, PID file valid)",
                        socket_path
                    );
                }

                let metadata = std::fs::symlink_metadata(&socket_path)
                    .with_context(|| format!("Failed to stat socket path: {:?}", socket_path))?;

                if metadata.file_type().is_symlink() {
                    anyhow::bail!(
                        "Socket path {:?} is a symlink, refusing to delete for safety",
                        socket_path
                    );
                }

                #[cfg(unix)]
                {
                    use std::os::unix::fs::FileTypeExt;
                    if !metadata.file_type().is_socket() {
                        anyhow::bail!(
                            "Path {:?} exists but is not a socket file (type: {:?})",
                            socket_path,
                            metadata.file_type()
                        );
                    }
                }

                info!("Removing stale socket from dead daemon");
                std::fs::remove_file(&socket_path)
                    .with_context(|| format!("Failed to remove stale socket: {:?}", socket_path))?;

                let l = UnixListener::bind(&socket_path)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path))?;
                write_pid(&pid_path)?;
                l
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to bind to socket: {:?}", socket_path));
            }
        };

        info!("Assistant listening on {:?}", socket_path);

        let (hotkey_tx, hotkey_rx) = mpsc::unbounded_channel();
        let tray = MenuTray::new();
        let menu = tray.gate();
        let assistant = Assistant::new(Services {
            surface: Box::new(PanelSurface::default()),
            hotkey: Box::new(SignalHotkey::new(hotkey_tx)),
            tray: Box::new(tray),
            clipboard: Box::new(MemoryClipboard::default()),
            notifier: Box::new(LogNotifier::new(config.notifications)),
        });

        Ok(Self {
            listener,
            socket_path,
            pid_path,
            shared: Arc::new(Shared {
                assistant: Mutex::new(assistant),
                clipboard_export: ClipboardExport::new(config.clipboard_command),
                shutdown: Notify::new(),
                started_at: Utc::now(),
            }),
            menu,
            hotkey_events: Mutex::new(hotkey_rx),
            connection_semaphore: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        })
    }

    /// Start the assistant and serve requests until it quits.
    ///
    /// Hotkey toggles are handled alongside connections. Once the menu is
    /// closed, new connections are dropped. On shutdown, in-flight
    /// connections get a bounded grace period.
    pub async fn run(&self) -> Result<()> {
        self.shared.assistant.lock().await.start();

        let mut hotkey_events = self.hotkey_events.lock().await;
        let mut connection_tasks: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            if !self.menu.is_open() {
                                debug!("Menu closed, rejecting connection");
                                drop(stream);
                                continue;
                            }

                            let permit = match self.connection_semaphore.clone().try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    warn!(
                                        "Connection limit ({}) reached, rejecting new connection",
                                        MAX_CONNECTIONS
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };

                            debug!("Accepted new connection");
                            let shared = self.shared.clone();
                            connection_tasks.spawn(async move {
                                let _permit = permit;
                                if let Err(e) = handle_connection(stream, shared).await {
                                    error!("Connection error: {:#}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                Some(event) = hotkey_events.recv() => {
                    match event {
                        HotkeyEvent::Toggle => {
                            let visible = self.shared.assistant.lock().await.toggle();
                            info!("Hotkey toggled panel, visible={}", visible);
                        }
                    }
                }
                Some(_) = connection_tasks.join_next(), if !connection_tasks.is_empty() => {
                    // Errors are logged in the handler
                }
                _ = self.shared.shutdown.notified() => {
                    info!("Shutdown signal received, waiting for in-flight connections");
                    break;
                }
            }
        }

        if !connection_tasks.is_empty() {
            info!(
                "Waiting for {} in-flight connection(s) to complete",
                connection_tasks.len()
            );

            let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
                while connection_tasks.join_next().await.is_some() {}
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Graceful shutdown timed out after {:?}, aborting {} connection(s)",
                    GRACEFUL_SHUTDOWN_TIMEOUT,
                    connection_tasks.len()
                );
                connection_tasks.abort_all();
            }
        }

        Ok(())
    }

    /// Run the assistant's quit sequence without waiting for the exit delay.
    ///
    /// Used when the process is stopped by a signal rather than a request.
    pub async fn quit(&self) {
        self.shared.assistant.lock().await.quit();
    }
}

impl Drop for DaemonServer {
    fn drop(&mut self) {
        if self.socket_path.exists() && std::fs::remove_file(&self.socket_path).is_err() {
            warn!("Failed to remove socket on shutdown");
        }
        if self.pid_path.exists() && std::fs::remove_file(&self.pid_path).is_err() {
            warn!("Failed to remove PID file on shutdown");
        }
    }
}

/// Check if a daemon process is still alive by reading its PID file.
fn is_daemon_alive(pid_path: &Path) -> bool {
    let Ok(pid_str) = std::fs::read_to_string(pid_path) else {
        return false;
    };

    let Ok(pid) = pid_str.trim().parse::<i32>() else {
        return false;
    };

    // SAFETY: kill with signal 0 only checks whether the process exists and
    // the caller may signal it. No signal is delivered.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Read a line with a maximum size limit.
///
/// Returns the number of bytes read (0 means EOF). Fails if the line grows
/// past `max_size` before a newline is found.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_size: usize,
) -> Result<usize> {
    use tokio::io::AsyncBufReadExt;

    let mut total = 0;
    let mut bytes = Vec::new();

    loop {
        let available = reader
            .fill_buf()
            .await
            .context("Failed to read from client")?;

        if available.is_empty() {
            break;
        }

        let newline_pos = available.iter().position(|&b| b == b'\n');
        let bytes_to_consume = newline_pos.map(|p| p + 1).unwrap_or(available.len());

        if total + bytes_to_consume > max_size {
            anyhow::bail!("Request too large: exceeded {} byte limit", max_size);
        }

        // UTF-8 is validated once at the end since chunks may split chars
        bytes.extend_from_slice(&available[..bytes_to_consume]);
        total += bytes_to_consume;
        reader.consume(bytes_to_consume);

        if newline_pos.is_some() {
            break;
        }
    }

    let line = std::str::from_utf8(&bytes).context("Invalid UTF-8 in request")?;
    buf.push_str(line);
    Ok(total)
}

/// Handle a single client connection.
async fn handle_connection(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        let bytes_read = read_line_bounded(&mut reader, &mut line, MAX_REQUEST_SIZE).await?;
        if bytes_read == 0 {
            debug!("Client disconnected");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!("Received: {} bytes", trimmed.len());

        let response = match serde_json::from_str::<Request>(trimmed) {
            Ok(request) => handle_request(request, &shared).await,
            Err(e) => Response::error(
                "unknown",
                ApiError::invalid_input_with_suggestion(
                    format!("Invalid JSON request: {}", e),
                    "Ensure the request is valid JSON with 'id' and 'command' fields. Example: {\"id\":\"1\",\"command\":{\"action\":\"status\"}}",
                ),
            ),
        };

        let response_json =
            serde_json::to_string(&response).context("Failed to serialize response")?;
        debug!("Sending: {}", response_json);

        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline")?;
        writer.flush().await.context("Failed to flush")?;
    }

    Ok(())
}

/// Handle a single request and return a response.
async fn handle_request(request: Request, shared: &Arc<Shared>) -> Response {
    debug!("Handling command: {:?}", request.command);

    match request.command {
        Command::Submit { text, direction } => {
            handle_submit(&request.id, shared, direction, &text).await
        }
        Command::Toggle => {
            let visible = shared.assistant.lock().await.toggle();
            Response::success(&request.id, ResponseData::Panel { visible })
        }
        Command::Status => handle_status(&request.id, shared).await,
        Command::Paste => {
            let content = shared.assistant.lock().await.clipboard_contents();
            Response::success(&request.id, ResponseData::Clipboard { content })
        }
        Command::Quit => handle_quit(&request.id, shared.clone()).await,
    }
}

/// Handle submit command.
///
/// The assistant lock is released before the external clipboard command
/// runs, so other requests are served meanwhile.
async fn handle_submit(
    request_id: &str,
    shared: &Shared,
    direction: Direction,
    text: &str,
) -> Response {
    let submitted = {
        let mut assistant = shared.assistant.lock().await;
        if assistant.is_quitting() {
            return Response::error(request_id, ApiError::shutting_down());
        }
        assistant.submit(direction, text)
    };

    let submission = match submitted {
        Ok(Some(submission)) => submission,
        Ok(None) => return Response::error(request_id, ApiError::empty_submission()),
        Err(e) => {
            warn!("Submission failed: {:#}", e);
            return Response::error(
                request_id,
                ApiError::service_failed("clipboard", &format!("{:#}", e)),
            );
        }
    };

    if let Some(export) = &shared.clipboard_export {
        if let Err(e) = export.run(&submission.output).await {
            warn!("Clipboard command failed: {:#}", e);
            return Response::error(
                request_id,
                ApiError::service_failed("clipboard", &format!("{:#}", e)),
            );
        }
    }

    Response::success(
        request_id,
        ResponseData::Submitted {
            direction: submission.direction,
            output: submission.output,
            failed: submission.failed,
        },
    )
}

/// Handle status command.
async fn handle_status(request_id: &str, shared: &Shared) -> Response {
    let status = shared.assistant.lock().await.status();
    Response::success(
        request_id,
        ResponseData::Status(StatusInfo {
            pid: std::process::id(),
            started_at: shared.started_at.to_rfc3339(),
            panel_visible: status.panel_visible,
            hotkey_registered: status.hotkey_registered,
            tray_running: status.tray_running,
            notifications: status.notifications,
        }),
    )
}

/// Handle quit command.
///
/// The assistant hides the panel, drops the hotkey and closes the menu;
/// the run loop is signalled once the exit delay has passed. The
/// DaemonServer's Drop impl then cleans up the socket and PID files.
async fn handle_quit(request_id: &str, shared: Arc<Shared>) -> Response {
    info!("Received quit command");

    let delay = shared.assistant.lock().await.quit();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // notify_one stores a permit, so the signal is not lost if the run
        // loop is busy at this moment
        shared.shutdown.notify_one();
    });

    Response::success(
        request_id,
        ResponseData::Ok {
            message: "Assistant quitting".to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use catspeak_core::error::ErrorCode;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::time::timeout;
    use uuid::Uuid;

    fn test_paths(tag: &str) -> (PathBuf, PathBuf) {
        let short_id = Uuid::new_v4().simple().to_string();
        let socket_path =
            std::env::temp_dir().join(format!("catspeak-{}-{}.sock", tag, &short_id[..8]));
        let pid_path = socket_path.with_extension("pid");
        (socket_path, pid_path)
    }

    fn test_config() -> Config {
        Config {
            clipboard_command: None,
            notifications: true,
        }
    }

    struct TestClient {
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(socket_path: &Path) -> Self {
            let stream = UnixStream::connect(socket_path)
                .await
                .expect("Failed to connect");
            let (reader, writer) = stream.into_split();
            Self {
                reader: BufReader::new(reader),
                writer,
            }
        }

        async fn send_line(&mut self, line: &str) -> Response {
            self.writer
                .write_all(line.as_bytes())
                .await
                .expect("Failed to write");
            self.writer.write_all(b"\n").await.expect("Failed to write");
            self.writer.flush().await.expect("Failed to flush");

            let mut response_line = String::new();
            let read = timeout(
                Duration::from_secs(2),
                self.reader.read_line(&mut response_line),
            )
            .await
            .expect("Timeout reading response")
            .expect("Failed to read");
            assert!(read > 0, "Should have received a response");

            serde_json::from_str(&response_line).expect("Failed to parse response")
        }

        async fn send(&mut self, command: Command) -> Response {
            let request = Request {
                id: Uuid::new_v4().to_string(),
                command,
            };
            let json = serde_json::to_string(&request).unwrap();
            let response = self.send_line(&json).await;
            assert_eq!(response.id, request.id);
            response
        }
    }

    async fn start_server(tag: &str) -> (PathBuf, tokio::task::JoinHandle<()>) {
        start_server_with(tag, test_config()).await
    }

    async fn start_server_with(
        tag: &str,
        config: Config,
    ) -> (PathBuf, tokio::task::JoinHandle<()>) {
        let (socket_path, pid_path) = test_paths(tag);
        let server = DaemonServer::bind_to(socket_path.clone(), pid_path, config)
            .await
            .expect("Failed to bind server");

        let handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(5), server.run()).await;
        });
        (socket_path, handle)
    }

    #[tokio::test]
    async fn test_submit_encodes_and_fills_clipboard() {
        let (socket_path, server_handle) = start_server("submit").await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client
            .send(Command::Submit {
                text: "  A  ".to_string(),
                direction: Direction::Encode,
            })
            .await;
        assert!(response.success);
        assert_eq!(
            response.data,
            Some(ResponseData::Submitted {
                direction: Direction::Encode,
                output: "呜喵喵呜".to_string(),
                failed: false,
            })
        );

        let response = client.send(Command::Paste).await;
        assert_eq!(
            response.data,
            Some(ResponseData::Clipboard {
                content: Some("呜喵喵呜".to_string())
            })
        );

        server_handle.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_clipboard_command_does_not_block_other_requests() {
        let config = Config {
            clipboard_command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat >/dev/null; sleep 1".to_string(),
            ]),
            notifications: true,
        };
        let (socket_path, server_handle) = start_server_with("slowclip", config).await;

        let submit_path = socket_path.clone();
        let submit = tokio::spawn(async move {
            let mut client = TestClient::connect(&submit_path).await;
            client
                .send(Command::Submit {
                    text: "A".to_string(),
                    direction: Direction::Encode,
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        let mut client = TestClient::connect(&socket_path).await;
        let started = std::time::Instant::now();
        let response = client.send(Command::Paste).await;
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(
            response.data,
            Some(ResponseData::Clipboard {
                content: Some("呜喵喵呜".to_string())
            })
        );

        let response = submit.await.expect("submit task");
        assert!(response.success);

        server_handle.abort();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_clipboard_command_is_service_failed() {
        let config = Config {
            clipboard_command: Some(vec!["false".to_string()]),
            notifications: true,
        };
        let (socket_path, server_handle) = start_server_with("badclip", config).await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client
            .send(Command::Submit {
                text: "A".to_string(),
                direction: Direction::Encode,
            })
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorCode::ServiceFailed);

        // The in-memory copy is still there for paste
        let response = client.send(Command::Paste).await;
        assert_eq!(
            response.data,
            Some(ResponseData::Clipboard {
                content: Some("呜喵喵呜".to_string())
            })
        );

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_submit_decode_failure_is_tagged() {
        let (socket_path, server_handle) = start_server("badcat").await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client
            .send(Command::Submit {
                text: "嗷~嗷".to_string(),
                direction: Direction::Decode,
            })
            .await;
        assert!(response.success);
        match response.data {
            Some(ResponseData::Submitted { output, failed, .. }) => {
                assert!(failed);
                assert!(output.starts_with("[decode error: "));
            }
            other => panic!("Expected submitted response, got {:?}", other),
        }

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_blank_submit_is_rejected() {
        let (socket_path, server_handle) = start_server("blank").await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client
            .send(Command::Submit {
                text: "   ".to_string(),
                direction: Direction::Encode,
            })
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_invalid_json_returns_invalid_input() {
        let (socket_path, server_handle) = start_server("json").await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client.send_line("{not json").await;
        assert!(!response.success);
        assert_eq!(response.id, "unknown");
        assert_eq!(response.error.unwrap().code, ErrorCode::InvalidInput);

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_toggle_and_status() {
        let (socket_path, server_handle) = start_server("toggle").await;
        let mut client = TestClient::connect(&socket_path).await;

        // The panel starts out visible
        let response = client.send(Command::Toggle).await;
        assert_eq!(response.data, Some(ResponseData::Panel { visible: false }));

        let response = client.send(Command::Status).await;
        match response.data {
            Some(ResponseData::Status(status)) => {
                assert!(!status.panel_visible);
                assert!(status.tray_running);
                assert_eq!(status.pid, std::process::id());
                assert!(status.notifications.is_empty());
            }
            other => panic!("Expected status response, got {:?}", other),
        }

        server_handle.abort();
    }

    #[tokio::test]
    async fn test_quit_stops_server_and_removes_socket() {
        let (socket_path, server_handle) = start_server("quit").await;
        let mut client = TestClient::connect(&socket_path).await;

        let response = client.send(Command::Quit).await;
        assert!(response.success);
        drop(client);

        timeout(Duration::from_secs(3), server_handle)
            .await
            .expect("Server should stop after quit")
            .expect("Server task should not panic");
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_read_line_bounded_handles_utf8_chunks() {
        let data = "hello 喵呜\n".as_bytes().to_vec();
        let cursor = std::io::Cursor::new(data);
        let mut reader = BufReader::with_capacity(1, cursor);
        let mut buf = String::new();

        let bytes = read_line_bounded(&mut reader, &mut buf, 1024)
            .await
            .expect("read line");

        assert!(bytes > 0);
        assert_eq!(buf, "hello 喵呜\n");
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_oversized_line() {
        let data = vec![b'a'; 64];
        let mut reader = BufReader::new(std::io::Cursor::new(data));
        let mut buf = String::new();

        let err = read_line_bounded(&mut reader, &mut buf, 16)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn test_bind_to_creates_socket_parent_dir() {
        let short_id = Uuid::new_v4().simple().to_string();
        let base_dir = std::env::temp_dir().join(format!("catspeak-custom-{}", &short_id[..8]));
        let socket_dir = base_dir.join("nested");
        let socket_path = socket_dir.join("catspeak.sock");
        let pid_path = socket_path.with_extension("pid");

        let server = DaemonServer::bind_to(socket_path.clone(), pid_path.clone(), test_config())
            .await
            .expect("Failed to bind server");

        assert!(socket_dir.exists());
        assert!(pid_path.exists());

        drop(server);
        assert!(!socket_path.exists());
        let _ = std::fs::remove_dir_all(&base_dir);
    }
}
