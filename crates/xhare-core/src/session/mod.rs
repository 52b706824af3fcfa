//! Session model for Xhare.
//!
//! Value types for the two transfer directions and the pending incoming
//! offer, plus the [`SessionModel`] container that owns them. The model only
//! exposes invariant-preserving mutators; the coordinator is its single
//! writer.
//!
//! ## State Machines
//!
//! ```text
//! outgoing:  Waiting -> Sending   -> Completed
//!                 \          \---> Failed
//!                  \-------------> Failed
//! incoming:  Waiting -> Receiving -> Completed
//!                 \          \---> Failed
//!                  \-------------> Failed
//! ```
//!
//! Status never moves backwards and progress never decreases within one
//! session.

mod model;

pub use model::{EventOutcome, IgnoreReason, SessionModel, RETIRED_ID_CAPACITY};

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::gateway::TransferId;

/// Direction of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// We are sending
    Outgoing,
    /// We are receiving
    Incoming,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outgoing => write!(f, "outgoing"),
            Self::Incoming => write!(f, "incoming"),
        }
    }
}

/// A file picked by the local user for sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFile {
    /// Full path handed to the engine
    pub path: PathBuf,
    /// Display name
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

impl LocalFile {
    /// Create a file record.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            size,
        }
    }

    /// Create a file record named after the last path component.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>, size: u64) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self::new(path, name, size)
    }
}

/// An unanswered offer from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingRequest {
    /// Engine transfer identifier
    pub transfer_id: TransferId,
    /// Device offering the file
    pub sender_device: Device,
    /// Offered file name
    pub file_name: String,
    /// Offered file size in bytes
    pub file_size: u64,
}

/// Status of an outgoing transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingStatus {
    /// Dispatched, nothing sent yet
    Waiting,
    /// Bytes are flowing
    Sending,
    /// Receiver has everything
    Completed,
    /// Failed or rejected
    Failed,
}

impl OutgoingStatus {
    /// Whether the session only leaves this state by dismissal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position along the state machine; never decreases.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Sending => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for OutgoingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Sending => write!(f, "sending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status of an incoming transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomingStatus {
    /// Accepted, nothing received yet
    Waiting,
    /// Bytes are flowing
    Receiving,
    /// File saved
    Completed,
    /// Transfer failed
    Failed,
}

impl IncomingStatus {
    /// Whether the session only leaves this state by dismissal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position along the state machine; never decreases.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Receiving => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for IncomingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Receiving => write!(f, "receiving"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The file we are pushing to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingTransfer {
    /// Engine transfer identifier, adopted from the first correlated event
    pub transfer_id: Option<TransferId>,
    /// File name
    pub file_name: String,
    /// Host name of the receiving device
    pub receiver_device_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Whole percent sent (0-100)
    pub progress: u8,
    /// Current status
    pub status: OutgoingStatus,
}

impl OutgoingTransfer {
    /// Start a session for `file` going to `receiver`.
    #[must_use]
    pub fn new(receiver: &Device, file: &LocalFile) -> Self {
        Self {
            transfer_id: None,
            file_name: file.name.clone(),
            receiver_device_name: receiver.hostname.clone(),
            file_size: file.size,
            progress: 0,
            status: OutgoingStatus::Waiting,
        }
    }

    /// Whether the session is waiting or sending.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// A file a peer is pushing to us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingTransfer {
    /// Engine transfer identifier
    pub transfer_id: TransferId,
    /// File name
    pub file_name: String,
    /// Host name of the sending device
    pub sender_device_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Whole percent received (0-100)
    pub progress: u8,
    /// Current status
    pub status: IncomingStatus,
    /// Directory the file was saved in, once completed
    pub saved_path: Option<PathBuf>,
}

impl IncomingTransfer {
    /// Start a session for an accepted request.
    #[must_use]
    pub fn from_request(request: &IncomingRequest) -> Self {
        Self {
            transfer_id: request.transfer_id.clone(),
            file_name: request.file_name.clone(),
            sender_device_name: request.sender_device.hostname.clone(),
            file_size: request.file_size,
            progress: 0,
            status: IncomingStatus::Waiting,
            saved_path: None,
        }
    }

    /// Whether the session is waiting or receiving.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Read-only view of everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Device chosen as the send target
    pub selected_device: Option<Device>,
    /// File chosen for sending
    pub selected_file: Option<LocalFile>,
    /// Unanswered incoming offer
    pub incoming_request: Option<IncomingRequest>,
    /// Outgoing session
    pub outgoing: Option<OutgoingTransfer>,
    /// Incoming session
    pub incoming: Option<IncomingTransfer>,
    /// Whether the outgoing session is waiting or sending
    pub is_sending: bool,
}

impl SessionSnapshot {
    /// Whether `send()` would pass its preconditions.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        self.selected_device.is_some() && self.selected_file.is_some() && !self.is_sending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_file_from_path() {
        let file = LocalFile::from_path("/home/me/report.pdf", 42);
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size, 42);
    }

    #[test]
    fn test_outgoing_transfer_starts_waiting() {
        let device = Device::new("10.0.0.2", "bob");
        let file = LocalFile::new("/f", "f.txt", 100);
        let transfer = OutgoingTransfer::new(&device, &file);

        assert_eq!(transfer.file_name, "f.txt");
        assert_eq!(transfer.receiver_device_name, "bob");
        assert_eq!(transfer.progress, 0);
        assert_eq!(transfer.status, OutgoingStatus::Waiting);
        assert!(transfer.transfer_id.is_none());
    }

    #[test]
    fn test_status_ranks_and_terminality() {
        assert!(OutgoingStatus::Waiting.rank() < OutgoingStatus::Sending.rank());
        assert!(OutgoingStatus::Sending.rank() < OutgoingStatus::Failed.rank());
        assert!(IncomingStatus::Completed.is_terminal());
        assert!(!IncomingStatus::Receiving.is_terminal());
    }

    #[test]
    fn test_snapshot_can_send() {
        let mut snapshot = SessionSnapshot::default();
        assert!(!snapshot.can_send());

        snapshot.selected_device = Some(Device::new("10.0.0.2", "bob"));
        snapshot.selected_file = Some(LocalFile::new("/f", "f.txt", 100));
        assert!(snapshot.can_send());

        snapshot.is_sending = true;
        assert!(!snapshot.can_send());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let request = IncomingRequest {
            transfer_id: TransferId::from("t1"),
            sender_device: Device::new("10.0.0.5", "alice"),
            file_name: "a.png".to_string(),
            file_size: 2048,
        };
        let snapshot = SessionSnapshot {
            incoming: Some(IncomingTransfer::from_request(&request)),
            incoming_request: Some(request),
            ..SessionSnapshot::default()
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["incomingRequest"]["transferId"], "t1");
        assert_eq!(json["incoming"]["senderDeviceName"], "alice");
        assert_eq!(json["incoming"]["status"], "waiting");
        assert_eq!(json["isSending"], false);
    }
}
