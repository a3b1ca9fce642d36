//! Client side of the assistant socket.
//!
//! One request is written per line and one response is read back per line
//! over a connection that stays open, so a client can send several commands.

use std::io;
use std::path::Path;
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use catspeak_core::protocol::{Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::daemon::paths::InstancePaths;

/// How long a freshly spawned daemon gets to create its socket.
const DAEMON_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default time to wait for a response.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DaemonClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DaemonClient {
    fn from_stream(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    /// Connect to the instance's daemon, spawning it when nothing listens.
    pub async fn connect() -> Result<Self> {
        let socket = InstancePaths::from_env().socket;

        if let Ok(stream) = UnixStream::connect(&socket).await {
            debug!("Connected to running assistant at {:?}", socket);
            return Ok(Self::from_stream(stream));
        }

        info!("Assistant not running, starting it");
        let daemon = spawn_daemon()?;
        let stream = wait_for_socket(&socket, daemon).await?;
        Ok(Self::from_stream(stream))
    }

    /// Connect only if a daemon is already listening.
    pub async fn connect_existing() -> Result<Option<Self>> {
        let socket = InstancePaths::from_env().socket;
        match UnixStream::connect(&socket).await {
            Ok(stream) => Ok(Some(Self::from_stream(stream))),
            Err(e) if is_not_listening(&e) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to connect to {:?}", socket)),
        }
    }

    pub async fn request(&mut self, request: Request) -> Result<Response> {
        self.request_with_timeout(request, REQUEST_TIMEOUT).await
    }

    /// Send one request line and wait up to `limit` for its response line.
    pub async fn request_with_timeout(
        &mut self,
        request: Request,
        limit: Duration,
    ) -> Result<Response> {
        let mut line = serde_json::to_string(&request).context("Failed to serialize request")?;
        debug!("Sending: {}", line);
        line.push('\n');

        self.writer
            .write_all(line.as_bytes())
            .await
            .context("Failed to write request")?;
        self.writer.flush().await.context("Failed to flush")?;

        line.clear();
        let read = timeout(limit, self.reader.read_line(&mut line))
            .await
            .with_context(|| format!("No response within {:?}", limit))?
            .context("Failed to read response")?;
        if read == 0 {
            bail!("Assistant closed the connection before responding");
        }

        debug!("Received: {}", line.trim_end());
        serde_json::from_str(&line).context("Failed to parse response")
    }
}

fn is_not_listening(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
    )
}

/// Run `catspeak daemon` detached from the calling terminal.
fn spawn_daemon() -> Result<Child> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe().context("Failed to locate the catspeak executable")?;
    std::process::Command::new(exe)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        // Own process group: closing the terminal does not kill the daemon
        .process_group(0)
        .spawn()
        .context("Failed to spawn daemon process")
}

/// Poll until the socket accepts, giving up early if the daemon exits.
async fn wait_for_socket(socket: &Path, mut daemon: Child) -> Result<UnixStream> {
    let started = Instant::now();

    while started.elapsed() < DAEMON_STARTUP_TIMEOUT {
        if let Ok(Some(status)) = daemon.try_wait() {
            bail!(
                "Assistant exited with {} during startup (run 'catspeak daemon' to see why)",
                status
            );
        }

        if let Ok(stream) = UnixStream::connect(socket).await {
            info!("Assistant ready after {:?}", started.elapsed());
            return Ok(stream);
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }

    bail!(
        "Assistant did not start within {:?}",
        DAEMON_STARTUP_TIMEOUT
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use crate::daemon::config::Config;
    use crate::daemon::DaemonServer;
    use catspeak_core::codec::Direction;
    use catspeak_core::protocol::{Command, ResponseData};

    #[tokio::test]
    async fn test_client_round_trips_through_daemon() {
        let temp_dir = std::env::temp_dir();
        let socket_path =
            temp_dir.join(format!("catspeak-client-test-{}.sock", std::process::id()));
        let pid_path = socket_path.with_extension("pid");

        let server = DaemonServer::bind_to(socket_path.clone(), pid_path.clone(), Config::default())
            .await
            .expect("Failed to bind server");

        let server_handle = tokio::spawn(async move {
            let _ = timeout(Duration::from_secs(2), server.run()).await;
        });

        // Connect directly, bypassing auto-start since the socket is temporary
        let stream = UnixStream::connect(&socket_path)
            .await
            .expect("Failed to connect");
        let mut client = DaemonClient::from_stream(stream);

        let response = client
            .request(Request {
                id: "client-test-1".to_string(),
                command: Command::Submit {
                    text: "猫".to_string(),
                    direction: Direction::Encode,
                },
            })
            .await
            .expect("Request failed");
        assert!(response.success);
        assert_eq!(response.id, "client-test-1");

        let Some(ResponseData::Submitted { output, .. }) = response.data else {
            panic!("Expected submitted response");
        };

        let response = client
            .request(Request {
                id: "client-test-2".to_string(),
                command: Command::Submit {
                    text: output,
                    direction: Direction::Decode,
                },
            })
            .await
            .expect("Request failed");
        assert_eq!(
            response.data,
            Some(ResponseData::Submitted {
                direction: Direction::Decode,
                output: "猫".to_string(),
                failed: false,
            })
        );

        server_handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }

    #[test]
    fn test_missing_socket_is_not_listening() {
        assert!(is_not_listening(&io::Error::from(ErrorKind::NotFound)));
        assert!(is_not_listening(&io::Error::from(ErrorKind::ConnectionRefused)));
        assert!(!is_not_listening(&io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_request_fails_when_daemon_hangs_up() {
        let (ours, theirs) = UnixStream::pair().expect("socket pair");
        drop(theirs);
        let mut client = DaemonClient::from_stream(ours);

        let result = client
            .request(Request {
                id: "hangup".to_string(),
                command: Command::Status,
            })
            .await;
        assert!(result.is_err());
    }
}
