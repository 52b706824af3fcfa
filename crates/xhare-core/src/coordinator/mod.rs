//! Transfer session coordinator for Xhare.
//!
//! The [`Coordinator`] is the single writer of the [`SessionModel`]. It turns
//! user intent (select, send, accept, reject, dismiss) and backend facts
//! (offers, progress, failures, rejections) into session transitions, raises
//! notifications for the outcomes a user must see, and records finished
//! sessions in the transfer history.
//!
//! ## Outgoing
//!
//! ```text
//! Idle -> Waiting -> Sending -> Completed
//!            \          \----> Failed
//!             \--------------> Failed
//! ```
//!
//! ## Incoming
//!
//! ```text
//! NoRequest -> RequestPending -> (accept) Waiting -> Receiving -> Completed/Failed
//!                           \--> (reject) NoRequest
//! ```
//!
//! The coordinator itself is not shared. [`service::CoordinatorService`]
//! owns one inside a tokio task and serialises commands, backend events and
//! timers through it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use xhare_core::{Config, Coordinator, TracingSink};
//!
//! let mut coordinator = Coordinator::new(gateway, Arc::new(TracingSink), Config::default());
//! coordinator.select_device(device);
//! coordinator.select_file(Some(file));
//! coordinator.send().await?;
//! ```

pub mod service;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::time::Instant;

use crate::config::{Config, OfferPolicy};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::gateway::{BackendEvent, CommandGateway, TransferId};
use crate::history::{HistoryStore, TransferHistoryEntry};
use crate::notify::{Notification, NotificationSink};
use crate::session::{
    Direction, EventOutcome, IncomingRequest, LocalFile, OutgoingTransfer, SessionModel,
    SessionSnapshot,
};

/// Shown when a transfer in either direction fails.
pub const MSG_TRANSFER_FAILED: &str = "File transfer failed.";
/// Shown when the receiver declines our file.
pub const MSG_TRANSFER_REJECTED: &str = "File transfer rejected.";
/// Shown after the user declines an offer.
pub const MSG_REQUEST_REJECTED: &str = "Incoming file transfer request rejected.";
/// Shown when an active transfer stops reporting progress.
pub const MSG_TRANSFER_TIMED_OUT: &str = "File transfer timed out.";

/// The transfer session state machine.
pub struct Coordinator {
    gateway: Arc<dyn CommandGateway>,
    sink: Arc<dyn NotificationSink>,
    config: Config,
    destination: PathBuf,
    model: SessionModel,
    selected_device: Option<Device>,
    selected_file: Option<LocalFile>,
    history: Option<HistoryStore>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("destination", &self.destination)
            .field("model", &self.model)
            .field("selected_device", &self.selected_device)
            .field("selected_file", &self.selected_file)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator with an empty session and no history.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn CommandGateway>,
        sink: Arc<dyn NotificationSink>,
        config: Config,
    ) -> Self {
        let destination = config.general.download_dir();
        Self {
            gateway,
            sink,
            config,
            destination,
            model: SessionModel::new(),
            selected_device: None,
            selected_file: None,
            history: None,
        }
    }

    /// Record finished sessions in `history`.
    #[must_use]
    pub fn with_history(mut self, history: HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    /// Choose the device `send()` targets.
    pub fn select_device(&mut self, device: Device) {
        tracing::debug!(ip = %device.ip, hostname = %device.hostname, "Device selected");
        self.selected_device = Some(device);
    }

    /// Forget the selected device.
    pub fn deselect_device(&mut self) {
        self.selected_device = None;
    }

    /// Choose the file `send()` pushes, or clear the choice.
    pub fn select_file(&mut self, file: Option<LocalFile>) {
        if let Some(file) = &file {
            tracing::debug!(file = %file.name, size = file.size, "File selected");
        }
        self.selected_file = file;
    }

    /// Push the selected file to the selected device.
    ///
    /// A dispatch failure is not an `Err`: the session moves to Failed and an
    /// error notification is raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoDeviceSelected`], [`Error::NoFileSelected`] or
    /// [`Error::TransferInProgress`] without touching any state.
    pub async fn send(&mut self) -> Result<()> {
        let device = self.selected_device.clone().ok_or(Error::NoDeviceSelected)?;
        let file = self.selected_file.clone().ok_or(Error::NoFileSelected)?;
        if self.model.is_sending() {
            return Err(Error::TransferInProgress);
        }

        self.model.clear_incoming_if_terminal();
        self.model
            .set_outgoing(OutgoingTransfer::new(&device, &file), Instant::now());

        tracing::info!(
            file = %file.name,
            size = file.size,
            receiver = %device.hostname,
            ip = %device.ip,
            "Sending file"
        );

        if let Err(e) = self.gateway.send_file(&device, &file).await {
            tracing::warn!(receiver = %device.hostname, "Failed to dispatch send: {}", e);
            self.fail_outgoing(None, MSG_TRANSFER_FAILED, Some(e.to_string()));
        }

        Ok(())
    }

    /// Accept the pending offer and start receiving.
    ///
    /// Any earlier outgoing session is cleared, finished or not; its id is
    /// retired so late events for it are ignored.
    ///
    /// If the answer cannot be delivered the new session is failed and an
    /// error notification is raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingRequest`] if no offer is pending.
    pub async fn accept(&mut self) -> Result<()> {
        let request = self
            .model
            .incoming_request()
            .cloned()
            .ok_or(Error::NoPendingRequest)?;

        let answered = self
            .gateway
            .respond_to_request(&request.transfer_id, true)
            .await;

        if let Some(previous) = self.model.clear_outgoing().filter(|t| t.is_active()) {
            tracing::warn!(
                file = %previous.file_name,
                receiver = %previous.receiver_device_name,
                "Dropping an outgoing transfer that is still running"
            );
        }
        if let Some(previous) = self.model.incoming().filter(|t| t.is_active()) {
            tracing::warn!(
                transfer_id = %previous.transfer_id,
                "Replacing an incoming transfer that is still running"
            );
        }
        self.model.accept_request(Instant::now());

        tracing::info!(
            transfer_id = %request.transfer_id,
            file = %request.file_name,
            sender = %request.sender_device.hostname,
            "Accepted incoming transfer"
        );

        if let Err(e) = answered {
            tracing::warn!(transfer_id = %request.transfer_id, "Failed to accept: {}", e);
            self.fail_incoming(Some(&request.transfer_id), MSG_TRANSFER_FAILED, Some(e.to_string()));
        }

        Ok(())
    }

    /// Decline the pending offer.
    ///
    /// Never creates an incoming session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingRequest`] if no offer is pending.
    pub async fn reject(&mut self) -> Result<()> {
        let request = self
            .model
            .incoming_request()
            .cloned()
            .ok_or(Error::NoPendingRequest)?;

        let answered = self
            .gateway
            .respond_to_request(&request.transfer_id, false)
            .await;
        self.model.clear_incoming_request();

        match answered {
            Ok(()) => {
                tracing::info!(transfer_id = %request.transfer_id, "Rejected incoming transfer");
                self.sink.notify(Notification::info(MSG_REQUEST_REJECTED));
            }
            Err(e) => {
                tracing::warn!(transfer_id = %request.transfer_id, "Failed to reject: {}", e);
                self.sink.notify(Notification::error(format!(
                    "Could not deliver the rejection: {e}"
                )));
            }
        }

        Ok(())
    }

    /// Clear every completed or failed session. Active sessions stay.
    ///
    /// Returns how many sessions were cleared.
    pub fn dismiss(&mut self) -> usize {
        let cleared = self.model.dismiss_terminal();
        if cleared > 0 {
            tracing::debug!(cleared, "Dismissed finished transfers");
        }
        cleared
    }

    /// Directory the completed incoming file was saved in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NothingToOpen`] unless an incoming transfer completed.
    pub fn open_destination(&self) -> Result<PathBuf> {
        self.model
            .incoming()
            .and_then(|t| t.saved_path.clone())
            .ok_or(Error::NothingToOpen)
    }

    /// Directory received files are saved to.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        &self.destination
    }

    /// Apply one backend event.
    pub async fn handle_event(&mut self, event: BackendEvent) {
        tracing::trace!(event = event.wire_name(), "Handling backend event");

        match event {
            BackendEvent::IncomingOffer {
                transfer_id,
                file_name,
                file_size,
                sender,
            } => {
                let request = IncomingRequest {
                    transfer_id,
                    sender_device: sender,
                    file_name,
                    file_size,
                };
                self.offer_received(request).await;
            }
            BackendEvent::IncomingProgress {
                transfer_id,
                percent,
            } => {
                let outcome = self.model.update_incoming_progress(
                    &transfer_id,
                    percent,
                    &self.destination,
                    Instant::now(),
                );
                match outcome {
                    EventOutcome::Completed => {
                        tracing::info!(
                            transfer_id = %transfer_id,
                            destination = %self.destination.display(),
                            "Incoming transfer completed"
                        );
                        self.record_incoming(None);
                        let file = self
                            .model
                            .incoming()
                            .map(|t| t.file_name.clone())
                            .unwrap_or_default();
                        self.sink
                            .notify(Notification::success(format!("File received: {file}")));
                    }
                    EventOutcome::Ignored(reason) => {
                        tracing::debug!(transfer_id = %transfer_id, ?reason, "Ignoring incoming progress");
                    }
                    EventOutcome::Updated { progress } => {
                        tracing::trace!(transfer_id = %transfer_id, progress, "Incoming progress");
                    }
                    EventOutcome::Failed => {}
                }
            }
            BackendEvent::IncomingFailed {
                transfer_id,
                reason,
            } => {
                let withdrawn = transfer_id.as_ref().is_some_and(|id| {
                    self.model
                        .incoming_request()
                        .is_some_and(|r| &r.transfer_id == id)
                        && self.model.incoming().is_none_or(|t| &t.transfer_id != id)
                });
                if withdrawn {
                    self.model.clear_incoming_request();
                    tracing::info!(?transfer_id, ?reason, "Incoming offer withdrawn");
                    self.sink.notify(Notification::error(MSG_TRANSFER_FAILED));
                } else {
                    self.fail_incoming(transfer_id.as_ref(), MSG_TRANSFER_FAILED, reason);
                }
            }
            BackendEvent::OutgoingProgress {
                transfer_id,
                percent,
            } => {
                let outcome =
                    self.model
                        .update_outgoing_progress(transfer_id.as_ref(), percent, Instant::now());
                match outcome {
                    EventOutcome::Completed => {
                        tracing::info!(?transfer_id, "Outgoing transfer completed");
                        self.record_outgoing(None);
                    }
                    EventOutcome::Ignored(reason) => {
                        tracing::debug!(?transfer_id, ?reason, "Ignoring outgoing progress");
                    }
                    EventOutcome::Updated { progress } => {
                        tracing::trace!(?transfer_id, progress, "Outgoing progress");
                    }
                    EventOutcome::Failed => {}
                }
            }
            BackendEvent::OutgoingRejected { transfer_id } => {
                self.fail_outgoing(
                    transfer_id.as_ref(),
                    MSG_TRANSFER_REJECTED,
                    Some("rejected by receiver".to_string()),
                );
            }
            BackendEvent::OutgoingFailed {
                transfer_id,
                reason,
            } => {
                self.fail_outgoing(transfer_id.as_ref(), MSG_TRANSFER_FAILED, reason);
            }
        }
    }

    /// Fail active sessions that have been silent for the configured stall
    /// timeout. Does nothing when no timeout is configured.
    ///
    /// Returns the directions that were failed.
    pub fn expire_stalled(&mut self, now: Instant) -> Vec<Direction> {
        let Some(timeout) = self.config.transfer.stall_timeout else {
            return Vec::new();
        };

        let expired = self.model.expire_stalled(now, timeout);
        for direction in &expired {
            tracing::warn!(%direction, timeout = ?timeout, "Transfer stalled");
            match direction {
                Direction::Outgoing => self.record_outgoing(Some("timed out")),
                Direction::Incoming => self.record_incoming(Some("timed out")),
            }
            self.sink.notify(Notification::error(MSG_TRANSFER_TIMED_OUT));
        }
        expired
    }

    /// Current read model.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            selected_device: self.selected_device.clone(),
            selected_file: self.selected_file.clone(),
            incoming_request: self.model.incoming_request().cloned(),
            outgoing: self.model.outgoing().cloned(),
            incoming: self.model.incoming().cloned(),
            is_sending: self.model.is_sending(),
        }
    }

    /// The session model.
    #[must_use]
    pub const fn model(&self) -> &SessionModel {
        &self.model
    }

    /// The transfer history, if one is attached.
    #[must_use]
    pub const fn history(&self) -> Option<&HistoryStore> {
        self.history.as_ref()
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn gateway(&self) -> Arc<dyn CommandGateway> {
        Arc::clone(&self.gateway)
    }

    pub(crate) fn sink(&self) -> Arc<dyn NotificationSink> {
        Arc::clone(&self.sink)
    }

    async fn offer_received(&mut self, request: IncomingRequest) {
        let pending = self.model.incoming_request().map(|r| r.transfer_id.clone());
        let receiving = self.model.incoming().map(|t| &t.transfer_id);
        if pending.as_ref() == Some(&request.transfer_id)
            || receiving == Some(&request.transfer_id)
        {
            tracing::debug!(transfer_id = %request.transfer_id, "Ignoring repeated offer");
            return;
        }

        tracing::info!(
            transfer_id = %request.transfer_id,
            file = %request.file_name,
            size = request.file_size,
            sender = %request.sender_device.hostname,
            "Incoming transfer offered"
        );

        if pending.is_some() && self.config.transfer.offer_policy == OfferPolicy::RejectNew {
            tracing::info!(transfer_id = %request.transfer_id, "Declining offer, another is pending");
            self.decline(&request.transfer_id).await;
            return;
        }

        if let Some(superseded) = self.model.set_incoming_request(request) {
            tracing::info!(transfer_id = %superseded.transfer_id, "Declining superseded offer");
            self.decline(&superseded.transfer_id).await;
        }
    }

    async fn decline(&self, transfer_id: &TransferId) {
        if let Err(e) = self.gateway.respond_to_request(transfer_id, false).await {
            tracing::warn!(transfer_id = %transfer_id, "Failed to decline offer: {}", e);
        }
    }

    fn fail_outgoing(&mut self, id: Option<&TransferId>, message: &str, reason: Option<String>) {
        match self.model.fail_outgoing(id) {
            EventOutcome::Failed => {
                tracing::info!(transfer_id = ?id, ?reason, "Outgoing transfer failed");
                self.record_outgoing(Some(reason.as_deref().unwrap_or(message)));
                self.sink.notify(Notification::error(message));
            }
            outcome => {
                tracing::debug!(transfer_id = ?id, ?outcome, "Ignoring outgoing failure");
            }
        }
    }

    fn fail_incoming(&mut self, id: Option<&TransferId>, message: &str, reason: Option<String>) {
        match self.model.fail_incoming(id) {
            EventOutcome::Failed => {
                tracing::info!(transfer_id = ?id, ?reason, "Incoming transfer failed");
                self.record_incoming(Some(reason.as_deref().unwrap_or(message)));
                self.sink.notify(Notification::error(message));
            }
            outcome => {
                tracing::debug!(transfer_id = ?id, ?outcome, "Ignoring incoming failure");
            }
        }
    }

    fn record_outgoing(&mut self, error: Option<&str>) {
        let Some(transfer) = self.model.outgoing() else {
            return;
        };
        let entry = TransferHistoryEntry::from_outgoing(transfer);
        self.record(match error {
            Some(message) => entry.with_error(message),
            None => entry,
        });
    }

    fn record_incoming(&mut self, error: Option<&str>) {
        let Some(transfer) = self.model.incoming() else {
            return;
        };
        let entry = TransferHistoryEntry::from_incoming(transfer);
        self.record(match error {
            Some(message) => entry.with_error(message),
            None => entry,
        });
    }

    fn record(&mut self, entry: TransferHistoryEntry) {
        if let Some(history) = self.history.as_mut() {
            if let Err(e) = history.add(entry) {
                tracing::warn!("Failed to record transfer history: {}", e);
            }
        }
    }
}
