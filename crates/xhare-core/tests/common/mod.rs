//! Common test utilities for `Xhare` integration tests.
//!
//! Provides a recording gateway and sink that stand in for the transfer
//! engine and the UI.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use xhare_core::config::HistoryConfig;
use xhare_core::{
    BackendEvent, CommandGateway, Config, Coordinator, Device, Error, EventBridge, EventStream,
    HistoryStore, LocalFile, Notification, NotificationLevel, NotificationSink, Result,
    TransferId,
};

/// A call the coordinator made on the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    ListDevices,
    SendFile { ip: String, file: String },
    Respond { transfer_id: TransferId, accepted: bool },
}

/// Gateway that records every call and can be told to fail.
pub struct MockGateway {
    calls: Mutex<Vec<GatewayCall>>,
    devices: Mutex<Vec<Device>>,
    stream: Mutex<Option<EventStream>>,
    bridge: EventBridge,
    pub fail_discovery: AtomicBool,
    pub hang_discovery: AtomicBool,
    pub fail_sends: AtomicBool,
    pub fail_responses: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        let (bridge, stream) = EventBridge::new();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            devices: Mutex::new(Vec::new()),
            stream: Mutex::new(Some(stream)),
            bridge,
            fail_discovery: AtomicBool::new(false),
            hang_discovery: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            fail_responses: AtomicBool::new(false),
        })
    }

    /// Devices returned by the next `list_devices` calls.
    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    /// Push an event onto the stream handed out by `subscribe`.
    pub fn emit(&self, event: BackendEvent) {
        self.bridge.publish(event).expect("event stream dropped");
    }

    /// Push a raw engine event onto the stream.
    pub fn emit_wire(&self, name: &str, payload: serde_json::Value) {
        self.bridge
            .publish_wire(name, payload)
            .expect("event rejected");
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than device listing.
    pub fn commands(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|c| *c != GatewayCall::ListDevices)
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CommandGateway for MockGateway {
    async fn list_devices(&self) -> Result<Vec<Device>> {
        self.record(GatewayCall::ListDevices);
        if self.hang_discovery.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_discovery.load(Ordering::SeqCst) {
            return Err(Error::Discovery("mdns unavailable".to_string()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn send_file(&self, device: &Device, file: &LocalFile) -> Result<()> {
        self.record(GatewayCall::SendFile {
            ip: device.ip.clone(),
            file: file.name.clone(),
        });
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Gateway(format!("{} unreachable", device.ip)));
        }
        Ok(())
    }

    async fn respond_to_request(&self, transfer_id: &TransferId, accepted: bool) -> Result<()> {
        self.record(GatewayCall::Respond {
            transfer_id: transfer_id.clone(),
            accepted,
        });
        if self.fail_responses.load(Ordering::SeqCst) {
            return Err(Error::Gateway("sender went away".to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> EventStream {
        self.stream
            .lock()
            .unwrap()
            .take()
            .expect("subscribed twice")
    }
}

/// Sink that keeps every notification.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn count(&self, level: NotificationLevel) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.level == level)
            .count()
    }

    pub fn last(&self) -> Option<Notification> {
        self.notifications.lock().unwrap().last().cloned()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Destination directory used by test coordinators.
pub fn test_destination() -> PathBuf {
    PathBuf::from("/tmp/xhare-downloads")
}

/// Configuration with a fixed destination.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.general.download_dir = Some(test_destination());
    config
}

/// A coordinator wired to fresh mocks with in-memory history.
pub fn test_coordinator() -> (Coordinator, Arc<MockGateway>, Arc<RecordingSink>) {
    test_coordinator_with(test_config())
}

/// A coordinator wired to fresh mocks with the given configuration.
pub fn test_coordinator_with(
    config: Config,
) -> (Coordinator, Arc<MockGateway>, Arc<RecordingSink>) {
    let gateway = MockGateway::new();
    let sink = RecordingSink::new();
    let history = HistoryStore::in_memory(HistoryConfig::default());
    let coordinator =
        Coordinator::new(gateway.clone(), sink.clone(), config).with_history(history);
    (coordinator, gateway, sink)
}

pub fn bob() -> Device {
    Device::new("10.0.0.2", "bob")
}

pub fn alice() -> Device {
    Device::new("10.0.0.5", "alice")
}

pub fn small_file() -> LocalFile {
    LocalFile::new("/f", "f.txt", 100)
}

/// The offer from alice used across scenarios.
pub fn offer(transfer_id: &str) -> BackendEvent {
    BackendEvent::IncomingOffer {
        transfer_id: TransferId::from(transfer_id),
        file_name: "a.png".to_string(),
        file_size: 2048,
        sender: alice(),
    }
}

pub fn outgoing_progress(percent: u8) -> BackendEvent {
    BackendEvent::OutgoingProgress {
        transfer_id: None,
        percent,
    }
}

pub fn incoming_progress(transfer_id: &str, percent: u8) -> BackendEvent {
    BackendEvent::IncomingProgress {
        transfer_id: TransferId::from(transfer_id),
        percent,
    }
}

/// Install a tracing subscriber once so failing tests show the log.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("xhare_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
