//! Command gateway to the transfer engine.
//!
//! The engine that moves bytes and discovers peers lives outside this crate.
//! The coordinator reaches it through two channels:
//!
//! - request/response calls on [`CommandGateway`]
//! - an asynchronous [`EventStream`] of [`BackendEvent`]s
//!
//! Calls are acknowledged as soon as the engine has taken the request. The
//! business outcome of a transfer (progress, completion, rejection, failure)
//! always arrives later on the event stream.
//!
//! Hosts that receive engine events as named JSON messages can feed them
//! through an [`EventBridge`], which decodes them and hands the coordinator a
//! ready-made stream.

pub mod event;

pub use event::{clamp_percent, names, BackendEvent, TransferId};

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::device::Device;
use crate::error::{Error, Result};
use crate::session::LocalFile;

/// Stream of backend events delivered to the coordinator.
pub type EventStream = BoxStream<'static, BackendEvent>;

/// Request/response surface of the transfer engine.
#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// List the devices the engine currently sees.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Discovery`] if discovery is unavailable.
    async fn list_devices(&self) -> Result<Vec<Device>>;

    /// Ask the engine to push `file` to `device`.
    ///
    /// Returns once the request is dispatched, not when the transfer ends.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] if the request cannot be dispatched.
    async fn send_file(&self, device: &Device, file: &LocalFile) -> Result<()>;

    /// Answer a pending incoming offer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] if the answer cannot be delivered.
    async fn respond_to_request(&self, transfer_id: &TransferId, accepted: bool) -> Result<()>;

    /// Subscribe to the engine's event stream.
    ///
    /// The coordinator service subscribes once at startup.
    fn subscribe(&self) -> EventStream;
}

/// Producer side of an in-process event stream.
///
/// Cloneable; every clone feeds the same stream.
#[derive(Debug, Clone)]
pub struct EventBridge {
    tx: mpsc::UnboundedSender<BackendEvent>,
}

impl EventBridge {
    /// Create a bridge and the stream it feeds.
    #[must_use]
    pub fn new() -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx).boxed())
    }

    /// Forward a decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceStopped`] if the stream was dropped.
    pub fn publish(&self, event: BackendEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| Error::ServiceStopped)
    }

    /// Decode a raw engine event and forward it.
    ///
    /// Events that need no action are dropped silently.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] for undecodable events and
    /// [`Error::ServiceStopped`] if the stream was dropped.
    pub fn publish_wire(&self, name: &str, payload: serde_json::Value) -> Result<()> {
        match BackendEvent::from_wire(name, payload) {
            Ok(Some(event)) => self.publish(event),
            Ok(None) => {
                tracing::trace!(event = name, "Dropping non-actionable engine event");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(event = name, "Failed to decode engine event: {}", e);
                Err(e)
            }
        }
    }

    /// Check whether the consuming stream is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
