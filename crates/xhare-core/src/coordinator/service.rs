//! Actor loop that owns a [`Coordinator`].
//!
//! User commands, backend events and stall checks all funnel through one
//! tokio task, so the session model has exactly one writer and no locks.
//! Callers talk to the task through a cloneable [`CoordinatorHandle`] and
//! read state from a `watch` channel that is republished after every change.
//!
//! Device polling runs in a task of its own. It only touches the
//! [`DeviceRegistry`], so a slow gateway never holds up a session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::Coordinator;
use crate::device::{Device, DeviceRegistry};
use crate::error::{Error, Result};
use crate::gateway::CommandGateway;
use crate::notify::NotificationSink;
use crate::session::{LocalFile, SessionSnapshot};

/// Capacity of the command mailbox.
const COMMAND_CAPACITY: usize = 32;

/// Shortest interval between stall checks.
const MIN_STALL_CHECK: Duration = Duration::from_millis(250);

enum Command {
    SelectDevice {
        device: Option<Device>,
        reply: oneshot::Sender<()>,
    },
    SelectFile {
        file: Option<LocalFile>,
        reply: oneshot::Sender<()>,
    },
    Send {
        reply: oneshot::Sender<Result<()>>,
    },
    Accept {
        reply: oneshot::Sender<Result<()>>,
    },
    Reject {
        reply: oneshot::Sender<Result<()>>,
    },
    Dismiss {
        reply: oneshot::Sender<usize>,
    },
    OpenDestination {
        reply: oneshot::Sender<Result<PathBuf>>,
    },
}

/// Polls the gateway and publishes into the registry.
#[derive(Clone)]
struct Discovery {
    registry: Arc<DeviceRegistry>,
    gateway: Arc<dyn CommandGateway>,
    sink: Arc<dyn NotificationSink>,
    interval: Duration,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("registry", &self.registry)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Discovery {
    /// One refresh, bounded by the polling interval.
    async fn refresh(&self) -> Result<Vec<Device>> {
        self.registry
            .refresh(self.gateway.as_ref(), self.sink.as_ref(), self.interval)
            .await
    }

    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::debug!("Device refresh failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!("Device polling stopped");
    }
}

/// Background task running a [`Coordinator`].
pub struct CoordinatorService {
    coordinator: Coordinator,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    shutdown_rx: broadcast::Receiver<()>,
    discovery_task: JoinHandle<()>,
}

impl CoordinatorService {
    /// Start the service on the current tokio runtime.
    ///
    /// The join handle yields the coordinator back once the service stops,
    /// either through [`CoordinatorHandle::shutdown`] or because every
    /// handle was dropped.
    #[must_use]
    pub fn spawn(
        coordinator: Coordinator,
        registry: Arc<DeviceRegistry>,
    ) -> (CoordinatorHandle, JoinHandle<Coordinator>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(coordinator.snapshot());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let discovery = Discovery {
            registry,
            gateway: coordinator.gateway(),
            sink: coordinator.sink(),
            interval: coordinator.config().discovery.refresh_interval,
        };
        let discovery_task = tokio::spawn(discovery.clone().run(shutdown_tx.subscribe()));

        let handle = CoordinatorHandle {
            commands: command_tx,
            snapshot_rx,
            discovery,
            shutdown_tx,
        };

        let service = Self {
            coordinator,
            commands,
            snapshot_tx,
            shutdown_rx,
            discovery_task,
        };

        (handle, tokio::spawn(service.run()))
    }

    async fn run(self) -> Coordinator {
        let Self {
            mut coordinator,
            mut commands,
            snapshot_tx,
            mut shutdown_rx,
            discovery_task,
        } = self;

        let mut events = coordinator.gateway().subscribe();
        let mut events_open = true;

        let stall_timeout = coordinator.config().transfer.stall_timeout;
        let stall_period = stall_timeout.map_or(Duration::from_secs(1), |timeout| {
            (timeout / 4).max(MIN_STALL_CHECK)
        });
        let mut stall_check = tokio::time::interval(stall_period);
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(
            refresh_interval = ?coordinator.config().discovery.refresh_interval,
            stall_timeout = ?stall_timeout,
            "Coordinator service started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    tracing::debug!("Coordinator service shutdown requested");
                    break;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All coordinator handles dropped");
                        break;
                    };
                    execute(&mut coordinator, &snapshot_tx, command).await;
                }
                event = events.next(), if events_open => {
                    match event {
                        Some(event) => coordinator.handle_event(event).await,
                        None => {
                            tracing::warn!("Backend event stream ended");
                            events_open = false;
                        }
                    }
                }
                now = stall_check.tick(), if stall_timeout.is_some() => {
                    coordinator.expire_stalled(now);
                }
            }

            publish(&snapshot_tx, &coordinator);
        }

        // Abort a poll still waiting on the gateway.
        discovery_task.abort();
        tracing::debug!("Coordinator service stopped");
        coordinator
    }
}

async fn execute(
    coordinator: &mut Coordinator,
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    command: Command,
) {
    match command {
        Command::SelectDevice { device, reply } => {
            match device {
                Some(device) => coordinator.select_device(device),
                None => coordinator.deselect_device(),
            }
            respond(snapshot_tx, coordinator, reply, ());
        }
        Command::SelectFile { file, reply } => {
            coordinator.select_file(file);
            respond(snapshot_tx, coordinator, reply, ());
        }
        Command::Send { reply } => {
            let result = coordinator.send().await;
            respond(snapshot_tx, coordinator, reply, result);
        }
        Command::Accept { reply } => {
            let result = coordinator.accept().await;
            respond(snapshot_tx, coordinator, reply, result);
        }
        Command::Reject { reply } => {
            let result = coordinator.reject().await;
            respond(snapshot_tx, coordinator, reply, result);
        }
        Command::Dismiss { reply } => {
            let cleared = coordinator.dismiss();
            respond(snapshot_tx, coordinator, reply, cleared);
        }
        Command::OpenDestination { reply } => {
            let result = coordinator.open_destination();
            respond(snapshot_tx, coordinator, reply, result);
        }
    }
}

/// Publish the new state, then answer the caller, so a caller that reads the
/// snapshot after its reply sees its own command applied.
fn respond<T>(
    snapshot_tx: &watch::Sender<SessionSnapshot>,
    coordinator: &Coordinator,
    reply: oneshot::Sender<T>,
    value: T,
) {
    publish(snapshot_tx, coordinator);
    // A dropped receiver only means the caller stopped waiting.
    let _ = reply.send(value);
}

fn publish(snapshot_tx: &watch::Sender<SessionSnapshot>, coordinator: &Coordinator) {
    let next = coordinator.snapshot();
    snapshot_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}

/// Cloneable client for a running [`CoordinatorService`].
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    discovery: Discovery,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SelectDevice { .. } => "SelectDevice",
            Self::SelectFile { .. } => "SelectFile",
            Self::Send { .. } => "Send",
            Self::Accept { .. } => "Accept",
            Self::Reject { .. } => "Reject",
            Self::Dismiss { .. } => "Dismiss",
            Self::OpenDestination { .. } => "OpenDestination",
        };
        f.write_str(name)
    }
}

impl CoordinatorHandle {
    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| Error::ServiceStopped)?;
        rx.await.map_err(|_| Error::ServiceStopped)
    }

    /// Choose the device `send()` targets.
    pub async fn select_device(&self, device: Device) -> Result<()> {
        self.request(|reply| Command::SelectDevice {
            device: Some(device),
            reply,
        })
        .await
    }

    /// Forget the selected device.
    pub async fn deselect_device(&self) -> Result<()> {
        self.request(|reply| Command::SelectDevice {
            device: None,
            reply,
        })
        .await
    }

    /// Select the device published under `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDeviceSelected`] if no such device is published.
    pub async fn select_device_by_ip(&self, ip: &str) -> Result<()> {
        let device = self.discovery.registry.find(ip).ok_or(Error::NoDeviceSelected)?;
        self.select_device(device).await
    }

    /// Choose the file `send()` pushes, or clear the choice.
    pub async fn select_file(&self, file: Option<LocalFile>) -> Result<()> {
        self.request(|reply| Command::SelectFile { file, reply })
            .await
    }

    /// See [`Coordinator::send`].
    pub async fn send(&self) -> Result<()> {
        self.request(|reply| Command::Send { reply }).await?
    }

    /// See [`Coordinator::accept`].
    pub async fn accept(&self) -> Result<()> {
        self.request(|reply| Command::Accept { reply }).await?
    }

    /// See [`Coordinator::reject`].
    pub async fn reject(&self) -> Result<()> {
        self.request(|reply| Command::Reject { reply }).await?
    }

    /// See [`Coordinator::dismiss`].
    pub async fn dismiss(&self) -> Result<usize> {
        self.request(|reply| Command::Dismiss { reply }).await
    }

    /// See [`Coordinator::open_destination`].
    pub async fn open_destination(&self) -> Result<PathBuf> {
        self.request(|reply| Command::OpenDestination { reply })
            .await?
    }

    /// Refresh the device registry now instead of waiting for the next tick.
    ///
    /// Runs on the caller's task, so it never queues behind session work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if the gateway failed or did not answer
    /// within the refresh interval.
    pub async fn refresh_devices(&self) -> Result<Vec<Device>> {
        self.discovery.refresh().await
    }

    /// Latest published session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to session snapshots.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Currently published devices.
    #[must_use]
    pub fn devices(&self) -> Vec<Device> {
        self.discovery.registry.devices()
    }

    /// Subscribe to device set updates.
    #[must_use]
    pub fn watch_devices(&self) -> watch::Receiver<Vec<Device>> {
        self.discovery.registry.subscribe()
    }

    /// Ask the service to stop after the current step.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the service task has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::{BackendEvent, CommandGateway, EventBridge, EventStream, TransferId};
    use crate::notify::TracingSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct BridgeGateway {
        stream: Mutex<Option<EventStream>>,
    }

    #[async_trait]
    impl CommandGateway for BridgeGateway {
        async fn list_devices(&self) -> Result<Vec<Device>> {
            Ok(vec![Device::new("10.0.0.2", "bob")])
        }

        async fn send_file(&self, _device: &Device, _file: &LocalFile) -> Result<()> {
            Ok(())
        }

        async fn respond_to_request(&self, _id: &TransferId, _accepted: bool) -> Result<()> {
            Ok(())
        }

        fn subscribe(&self) -> EventStream {
            self.stream
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| EventBridge::new().1)
        }
    }

    fn spawn_service() -> (CoordinatorHandle, JoinHandle<Coordinator>, EventBridge) {
        let (bridge, stream) = EventBridge::new();
        let gateway = Arc::new(BridgeGateway {
            stream: Mutex::new(Some(stream)),
        });
        let coordinator = Coordinator::new(gateway, Arc::new(TracingSink), Config::default());
        let (handle, join) = CoordinatorService::spawn(coordinator, Arc::new(DeviceRegistry::new()));
        (handle, join, bridge)
    }

    #[tokio::test]
    async fn test_commands_round_trip() {
        let (handle, join, _bridge) = spawn_service();

        assert!(matches!(handle.send().await, Err(Error::NoDeviceSelected)));

        handle.refresh_devices().await.unwrap();
        handle.select_device_by_ip("10.0.0.2").await.unwrap();
        handle
            .select_file(Some(LocalFile::new("/tmp/f.txt", "f.txt", 10)))
            .await
            .unwrap();
        handle.send().await.unwrap();

        let snapshot = handle.snapshot();
        assert!(snapshot.is_sending);
        assert_eq!(snapshot.outgoing.unwrap().receiver_device_name, "bob");

        handle.shutdown();
        let coordinator = join.await.unwrap();
        assert!(coordinator.model().is_sending());
    }

    #[tokio::test]
    async fn test_events_reach_the_coordinator() {
        let (handle, join, bridge) = spawn_service();
        let mut snapshots = handle.watch_snapshot();

        bridge
            .publish(BackendEvent::IncomingOffer {
                transfer_id: TransferId::from("t1"),
                file_name: "a.png".to_string(),
                file_size: 2048,
                sender: Device::new("10.0.0.5", "alice"),
            })
            .unwrap();

        let snapshot = snapshots
            .wait_for(|s| s.incoming_request.is_some())
            .await
            .unwrap()
            .clone();
        assert_eq!(
            snapshot.incoming_request.unwrap().transfer_id,
            TransferId::from("t1")
        );

        handle.accept().await.unwrap();
        assert!(handle.snapshot().incoming.is_some());

        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_stopped_service_reports_error() {
        let (handle, join, _bridge) = spawn_service();
        handle.shutdown();
        join.await.unwrap();

        assert!(matches!(handle.dismiss().await, Err(Error::ServiceStopped)));
        assert!(handle.is_closed());
    }
}
