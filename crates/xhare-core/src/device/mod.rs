//! Device registry for Xhare.
//!
//! Holds the most recently observed set of reachable peers. The set is
//! refreshed by polling the [`CommandGateway`] on a fixed cadence (every
//! 2 seconds by default) and is always replaced wholesale: a device that is
//! not re-observed in a refresh disappears.
//!
//! Publication goes through a `tokio::sync::watch` channel, so readers see
//! either the previous set or the new one, never a mix.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::gateway::CommandGateway;
use crate::notify::{Notification, NotificationSink};

/// A reachable peer.
///
/// Identity is the `ip`: two devices with the same address are the same
/// device, whatever hostname they report.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Network address of the peer
    pub ip: String,
    /// Host name the peer announced
    pub hostname: String,
}

impl Device {
    /// Create a device record.
    #[must_use]
    pub fn new(ip: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            hostname: hostname.into(),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip
    }
}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
    }
}

/// Registry of currently reachable devices.
#[derive(Debug)]
pub struct DeviceRegistry {
    /// Published device set
    devices_tx: watch::Sender<Vec<Device>>,
    /// Failed refreshes since the last success
    failure_streak: AtomicU32,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        let (devices_tx, _) = watch::channel(Vec::new());
        Self {
            devices_tx,
            failure_streak: AtomicU32::new(0),
        }
    }

    /// Poll the gateway and republish the device set.
    ///
    /// A gateway that has not answered within `limit` counts as a failure.
    /// On failure the previous set stays published and a warning goes to
    /// `sink`; the next refresh retries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the gateway could not list devices in time.
    pub async fn refresh(
        &self,
        gateway: &dyn CommandGateway,
        sink: &dyn NotificationSink,
        limit: Duration,
    ) -> Result<Vec<Device>> {
        let listed = tokio::time::timeout(limit, gateway.list_devices())
            .await
            .unwrap_or_else(|_| {
                Err(Error::Discovery(format!(
                    "no answer within {}ms",
                    limit.as_millis()
                )))
            });

        match listed {
            Ok(devices) => {
                let previous_failures = self.failure_streak.swap(0, Ordering::SeqCst);
                if previous_failures > 0 {
                    tracing::info!(
                        failures = previous_failures,
                        "Device discovery recovered"
                    );
                }
                Ok(self.replace(devices))
            }
            Err(e) => {
                let failures = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
                let err = match e {
                    Error::Discovery(_) => e,
                    other => Error::Discovery(other.to_string()),
                };
                tracing::warn!(failures, "Failed to refresh devices: {}", err);
                sink.notify(Notification::warning(format!(
                    "Could not refresh nearby devices: {err}"
                )));
                Err(err)
            }
        }
    }

    /// Replace the published set, dropping duplicate addresses.
    ///
    /// The first record for an address wins. Returns the set as published.
    pub fn replace(&self, devices: Vec<Device>) -> Vec<Device> {
        let mut seen = HashSet::with_capacity(devices.len());
        let unique: Vec<Device> = devices
            .into_iter()
            .filter(|device| seen.insert(device.ip.clone()))
            .collect();

        tracing::trace!(count = unique.len(), "Publishing device set");
        self.devices_tx.send_replace(unique.clone());
        unique
    }

    /// Subscribe to device set updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<Device>> {
        self.devices_tx.subscribe()
    }

    /// Get the currently published devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.devices_tx.borrow().clone()
    }

    /// Look up a published device by address.
    #[must_use]
    pub fn find(&self, ip: &str) -> Option<Device> {
        self.devices_tx.borrow().iter().find(|d| d.ip == ip).cloned()
    }

    /// Number of consecutive failed refreshes.
    #[must_use]
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak.load(Ordering::SeqCst)
    }
}
