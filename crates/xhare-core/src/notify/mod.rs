//! User-facing notifications.
//!
//! The coordinator never renders anything itself. It hands short-lived
//! messages to a [`NotificationSink`], which the host application turns into
//! toasts, log lines, or whatever fits its surface.
//!
//! Two sinks ship with the crate:
//!
//! - [`TracingSink`] writes every notification to the `tracing` log
//! - [`ChannelSink`] fans notifications out to any number of UI subscribers

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::NotificationConfig;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    /// Neutral information (e.g. an offer was declined)
    Info,
    /// Something finished well
    Success,
    /// Non-fatal trouble that retries on its own
    Warning,
    /// A transfer or command failed
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// An ephemeral message for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Severity
    pub level: NotificationLevel,
    /// Message text
    pub message: String,
}

impl Notification {
    /// Create a notification with an explicit level.
    #[must_use]
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    /// Create an informational notification.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    /// Create a success notification.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    /// Create a warning notification.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, message)
    }

    /// Create an error notification.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    /// How long this notification should stay on screen.
    #[must_use]
    pub const fn display_duration(&self, config: &NotificationConfig) -> Duration {
        match self.level {
            NotificationLevel::Info => config.info_duration,
            NotificationLevel::Success => config.success_duration,
            NotificationLevel::Warning => config.warning_duration,
            NotificationLevel::Error => config.error_duration,
        }
    }
}

/// Destination for user-facing notifications.
///
/// Implementations must not block: the coordinator calls `notify` while it
/// holds exclusive access to the session state.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification.
    fn notify(&self, notification: Notification);
}

/// Sink that writes notifications to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => tracing::error!("{}", notification.message),
            NotificationLevel::Warning => tracing::warn!("{}", notification.message),
            NotificationLevel::Info | NotificationLevel::Success => {
                tracing::info!(level = %notification.level, "{}", notification.message);
            }
        }
    }
}

/// Sink that broadcasts notifications to subscribers.
///
/// Notifications sent while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: broadcast::Sender<Notification>,
}

impl ChannelSink {
    /// Create a sink buffering up to `capacity` undelivered notifications
    /// per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to notifications sent from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new(32)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification dropped, no subscribers");
        }
    }
}
