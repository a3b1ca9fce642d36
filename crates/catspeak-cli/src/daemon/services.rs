//! Service implementations used by the daemon.
//!
//! - [`PanelSurface`]: visibility state of the input panel
//! - [`SignalHotkey`]: SIGUSR1 as the global toggle (bind `kill -USR1` to a
//!   desktop shortcut)
//! - [`MenuTray`]: the daemon's request menu; closing it stops new
//!   connections from being served
//! - [`MemoryClipboard`]: the last copied text
//! - [`ClipboardExport`]: optional external clipboard command, run
//!   asynchronously with a timeout
//! - [`LogNotifier`]: notifications as log lines, with a short history

use std::collections::VecDeque;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use catspeak_core::protocol::NotificationInfo;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::daemon::assistant::{Clipboard, Hotkey, Notifier, Surface, Tray};

/// Number of notifications kept for `status`.
const MAX_RECENT_NOTIFICATIONS: usize = 16;

/// How long an external clipboard command may run.
pub const CLIPBOARD_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Default)]
pub struct PanelSurface {
    visible: bool,
}

impl Surface for PanelSurface {
    fn show(&mut self) {
        self.visible = true;
        info!("Panel shown");
    }

    fn hide(&mut self) {
        self.visible = false;
        info!("Panel hidden");
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn clear_input(&mut self) {
        debug!("Panel input cleared");
    }
}

/// Events raised by the global hotkey.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    Toggle,
}

/// Forwards SIGUSR1 as [`HotkeyEvent::Toggle`].
///
/// `register` must be called from within a tokio runtime.
pub struct SignalHotkey {
    events: mpsc::UnboundedSender<HotkeyEvent>,
    listener: Option<JoinHandle<()>>,
}

impl SignalHotkey {
    pub fn new(events: mpsc::UnboundedSender<HotkeyEvent>) -> Self {
        Self {
            events,
            listener: None,
        }
    }
}

impl Hotkey for SignalHotkey {
    #[cfg(unix)]
    fn register(&mut self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        if self.listener.is_some() {
            return Ok(());
        }

        let mut stream =
            signal(SignalKind::user_defined1()).context("Failed to listen for SIGUSR1")?;
        let events = self.events.clone();
        self.listener = Some(tokio::spawn(async move {
            while stream.recv().await.is_some() {
                debug!("SIGUSR1 received, toggling panel");
                if events.send(HotkeyEvent::Toggle).is_err() {
                    break;
                }
            }
        }));
        info!("Hotkey registered (send SIGUSR1 to pid {} to toggle)", std::process::id());
        Ok(())
    }

    #[cfg(not(unix))]
    fn register(&mut self) -> Result<()> {
        bail!("signal hotkey is only available on Unix")
    }

    fn unregister(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            info!("Hotkey unregistered");
        }
    }

    fn is_registered(&self) -> bool {
        self.listener.is_some()
    }
}

/// Shared open/closed state of a [`MenuTray`].
#[derive(Debug, Clone, Default)]
pub struct MenuGate(Arc<AtomicBool>);

impl MenuGate {
    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MenuTray {
    gate: MenuGate,
}

impl MenuTray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle the server checks before serving a connection.
    pub fn gate(&self) -> MenuGate {
        self.gate.clone()
    }
}

impl Tray for MenuTray {
    fn start(&mut self) {
        self.gate.0.store(true, Ordering::SeqCst);
        info!("Menu open");
    }

    /// Closes the menu on a spawned task after yielding once, so the
    /// response to the request that triggered it is written first.
    fn stop_async(&mut self) {
        let gate = self.gate.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    gate.0.store(false, Ordering::SeqCst);
                    info!("Menu closed");
                });
            }
            Err(_) => {
                gate.0.store(false, Ordering::SeqCst);
                info!("Menu closed");
            }
        }
    }

    fn is_running(&self) -> bool {
        self.gate.is_open()
    }
}

/// Keeps the last copied text for `paste`.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    last: Option<String>,
}

impl Clipboard for MemoryClipboard {
    fn copy(&mut self, text: &str) -> Result<()> {
        self.last = Some(text.to_string());
        Ok(())
    }

    fn contents(&self) -> Option<String> {
        self.last.clone()
    }
}

/// Mirrors copied text into an external clipboard tool such as `wl-copy`.
///
/// Runs outside the assistant lock, so a slow tool only delays the
/// submitting client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardExport {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ClipboardExport {
    /// `None` when no command is configured.
    pub fn new(command: Option<Vec<String>>) -> Option<Self> {
        let mut argv = command?.into_iter();
        let program = argv.next()?;
        Some(Self {
            program,
            args: argv.collect(),
            timeout: CLIPBOARD_TIMEOUT,
        })
    }

    /// Pipe `text` to the command and wait for it to exit successfully.
    ///
    /// The child is killed if it outlives the timeout.
    pub async fn run(&self, text: &str) -> Result<()> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn clipboard command '{}'", self.program))?;

        let status = match tokio::time::timeout(self.timeout, self.feed(&mut child, text)).await {
            Ok(status) => status?,
            Err(_) => bail!(
                "Clipboard command '{}' timed out after {:?}",
                self.program,
                self.timeout
            ),
        };

        if !status.success() {
            bail!("Clipboard command '{}' exited with {}", self.program, status);
        }
        debug!("Copied {} bytes via '{}'", text.len(), self.program);
        Ok(())
    }

    async fn feed(&self, child: &mut Child, text: &str) -> Result<ExitStatus> {
        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(text.as_bytes()).await {
                // A tool may exit without reading; its status decides
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
                result => {
                    result.with_context(|| format!("Failed to write to '{}'", self.program))?
                }
            }
        }

        child
            .wait()
            .await
            .with_context(|| format!("Failed to wait for '{}'", self.program))
    }
}

#[derive(Debug)]
pub struct LogNotifier {
    enabled: bool,
    recent: VecDeque<NotificationInfo>,
}

impl LogNotifier {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            recent: VecDeque::with_capacity(MAX_RECENT_NOTIFICATIONS),
        }
    }
}

impl Notifier for LogNotifier {
    fn notify(&mut self, title: &str, message: &str) {
        if !self.enabled {
            debug!("Notifications disabled, dropping: {}", message);
            return;
        }

        info!("[{}] {}", title, message);
        if self.recent.len() == MAX_RECENT_NOTIFICATIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(NotificationInfo {
            title: title.to_string(),
            message: message.to_string(),
            shown_at: Utc::now().to_rfc3339(),
        });
    }

    fn recent(&self) -> Vec<NotificationInfo> {
        self.recent.iter().cloned().collect()
    }
}
