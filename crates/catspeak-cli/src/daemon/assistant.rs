//! The assistant: wires the codec to its collaborators.
//!
//! The panel, hotkey, tray, clipboard and notifier are injected as trait
//! objects so the daemon can supply real implementations and tests can
//! supply recorders.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use catspeak_core::codec::{is_error_result, Direction};
use catspeak_core::protocol::NotificationInfo;
use tracing::{debug, info, warn};

/// Title used for notifications.
pub const APP_TITLE: &str = "catspeak";

/// How long the process lingers after the quit sequence before exiting.
pub const EXIT_DELAY: Duration = Duration::from_millis(200);

/// The input panel.
pub trait Surface: Send {
    fn show(&mut self);
    fn hide(&mut self);
    fn is_visible(&self) -> bool;
    /// Discard whatever was typed into the panel.
    fn clear_input(&mut self);
}

/// The global toggle trigger.
pub trait Hotkey: Send {
    fn register(&mut self) -> Result<()>;
    fn unregister(&mut self);
    fn is_registered(&self) -> bool;
}

/// The menu with toggle and quit entries.
pub trait Tray: Send {
    fn start(&mut self);
    /// Request the tray to stop. Returns before it has stopped.
    fn stop_async(&mut self);
    fn is_running(&self) -> bool;
}

pub trait Clipboard: Send {
    fn copy(&mut self, text: &str) -> Result<()>;
    fn contents(&self) -> Option<String>;
}

pub trait Notifier: Send {
    fn notify(&mut self, title: &str, message: &str);
    fn recent(&self) -> Vec<NotificationInfo>;
}

/// The collaborators an [`Assistant`] drives.
pub struct Services {
    pub surface: Box<dyn Surface>,
    pub hotkey: Box<dyn Hotkey>,
    pub tray: Box<dyn Tray>,
    pub clipboard: Box<dyn Clipboard>,
    pub notifier: Box<dyn Notifier>,
}

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub direction: Direction,
    /// The copied string: the converted text or a tagged error.
    pub output: String,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantStatus {
    pub panel_visible: bool,
    pub hotkey_registered: bool,
    pub tray_running: bool,
    pub notifications: Vec<NotificationInfo>,
}

pub struct Assistant {
    services: Services,
    quitting: bool,
}

impl Assistant {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            quitting: false,
        }
    }

    /// Show the panel, register the hotkey and start the tray.
    ///
    /// A hotkey that cannot be registered is logged and skipped; the panel
    /// and tray still work without it.
    pub fn start(&mut self) {
        self.services.surface.show();
        if let Err(e) = self.services.hotkey.register() {
            warn!("Hotkey unavailable, continuing without it: {:#}", e);
        }
        self.services.tray.start();
        info!("Assistant started");
    }

    /// Flip panel visibility and return the new state.
    pub fn toggle(&mut self) -> bool {
        let surface = &mut self.services.surface;
        if surface.is_visible() {
            surface.hide();
        } else {
            surface.show();
        }
        let visible = surface.is_visible();
        debug!("Panel toggled, visible={}", visible);
        visible
    }

    /// Convert `input` and copy the result to the clipboard.
    ///
    /// Leading and trailing whitespace is trimmed first; nothing left means
    /// nothing happens and `Ok(None)` is returned. A codec failure is not an
    /// error here: its tagged string is copied and reported like a result.
    pub fn submit(&mut self, direction: Direction, input: &str) -> Result<Option<Submission>> {
        if self.quitting {
            bail!("assistant is shutting down");
        }

        let text = input.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let output = direction.render(text);
        let failed = is_error_result(&output);

        self.services
            .clipboard
            .copy(&output)
            .context("Failed to copy result to clipboard")?;
        self.services.surface.clear_input();

        if self.services.tray.is_running() {
            let message = if failed {
                output.as_str()
            } else {
                direction.confirmation()
            };
            self.services.notifier.notify(APP_TITLE, message);
        }

        info!(
            "Submitted {} chars for {}, failed={}",
            text.chars().count(),
            direction,
            failed
        );
        Ok(Some(Submission {
            direction,
            output,
            failed,
        }))
    }

    /// Run the quit sequence and return how long to wait before exiting.
    ///
    /// Order matters: hide the panel, unregister the hotkey, then ask the
    /// tray to stop without waiting for it. The caller terminates the
    /// process once the returned delay has passed. Calling this again is a
    /// no-op.
    pub fn quit(&mut self) -> Duration {
        if self.quitting {
            return EXIT_DELAY;
        }
        self.quitting = true;

        info!("Quitting assistant");
        self.services.surface.hide();
        self.services.hotkey.unregister();
        self.services.tray.stop_async();
        EXIT_DELAY
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    pub fn clipboard_contents(&self) -> Option<String> {
        self.services.clipboard.contents()
    }

    pub fn status(&self) -> AssistantStatus {
        AssistantStatus {
            panel_visible: self.services.surface.is_visible(),
            hotkey_registered: self.services.hotkey.is_registered(),
            tray_running: self.services.tray.is_running(),
            notifications: self.services.notifier.recent(),
        }
    }
}
