//! Backend events and their wire format.
//!
//! The transfer engine reports progress as named events with JSON payloads.
//! [`BackendEvent`] is the closed union the coordinator consumes;
//! [`BackendEvent::from_wire`] turns the engine's raw `(name, payload)` pairs
//! into it.
//!
//! ## Wire Events
//!
//! | Name | Payload |
//! |------|---------|
//! | `INCOMING_TRANSFER` | `{ transferId, filename, fileSize, senderHostname, senderIp }` |
//! | `INCOMING_TRANSFER_PROGRESS` | `{ transferId, percent }` |
//! | `INCOMING_TRANSFER_FAILED` | `{ transferId?, reason? }` or a reason string |
//! | `OUTGOING_TRANSFER_PROGRESS` | `{ transferId?, percent }` |
//! | `OUTGOING_TRANSFER_REJECTED` | `{ transferId? }` |
//! | `OUTGOING_TRANSFER_FAILED` | `{ transferId?, reason? }` or a reason string |
//!
//! `percent` may be fractional; it is floored and clamped to `0..=100`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::{Error, Result};

/// Engine event names.
pub mod names {
    /// A peer offered a file
    pub const INCOMING_TRANSFER: &str = "INCOMING_TRANSFER";
    /// Receive progress
    pub const INCOMING_TRANSFER_PROGRESS: &str = "INCOMING_TRANSFER_PROGRESS";
    /// Receive failed
    pub const INCOMING_TRANSFER_FAILED: &str = "INCOMING_TRANSFER_FAILED";
    /// Send progress
    pub const OUTGOING_TRANSFER_PROGRESS: &str = "OUTGOING_TRANSFER_PROGRESS";
    /// Receiver declined the offer
    pub const OUTGOING_TRANSFER_REJECTED: &str = "OUTGOING_TRANSFER_REJECTED";
    /// Send failed
    pub const OUTGOING_TRANSFER_FAILED: &str = "OUTGOING_TRANSFER_FAILED";
    /// Receiver finished writing; completion is already implied by progress
    pub const TRANSFER_COMPLETE: &str = "TRANSFER_COMPLETE";
}

/// Opaque identifier correlating the events of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(String);

impl TransferId {
    /// Wrap an engine-issued identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransferId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransferId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Convert an engine percentage into a whole percent in `0..=100`.
///
/// NaN and negative values map to 0.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= 100.0 {
        100
    } else {
        value.floor() as u8
    }
}

/// An event reported by the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// A peer wants to send us a file
    IncomingOffer {
        /// Transfer identifier
        transfer_id: TransferId,
        /// Offered file name
        file_name: String,
        /// Offered file size in bytes
        file_size: u64,
        /// The sending device
        sender: Device,
    },
    /// Bytes of an accepted incoming transfer arrived
    IncomingProgress {
        /// Transfer identifier
        transfer_id: TransferId,
        /// Whole percent received
        percent: u8,
    },
    /// An incoming transfer failed
    IncomingFailed {
        /// Transfer identifier, when the engine knows it
        transfer_id: Option<TransferId>,
        /// Engine-provided reason
        reason: Option<String>,
    },
    /// Bytes of the outgoing transfer were sent
    OutgoingProgress {
        /// Transfer identifier, when the engine reports one
        transfer_id: Option<TransferId>,
        /// Whole percent sent
        percent: u8,
    },
    /// The receiver declined the outgoing transfer
    OutgoingRejected {
        /// Transfer identifier, when the engine reports one
        transfer_id: Option<TransferId>,
    },
    /// The outgoing transfer failed
    OutgoingFailed {
        /// Transfer identifier, when the engine reports one
        transfer_id: Option<TransferId>,
        /// Engine-provided reason
        reason: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferPayload {
    transfer_id: String,
    filename: String,
    file_size: u64,
    sender_hostname: String,
    sender_ip: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressPayload {
    #[serde(default)]
    transfer_id: Option<String>,
    percent: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutcomePayload {
    Detail {
        #[serde(default, rename = "transferId")]
        transfer_id: Option<String>,
        #[serde(default, alias = "message")]
        reason: Option<String>,
    },
    Reason(String),
}

impl OutcomePayload {
    fn parse(name: &str, payload: serde_json::Value) -> Result<(Option<TransferId>, Option<String>)> {
        if payload.is_null() {
            return Ok((None, None));
        }
        match decode::<Self>(name, payload)? {
            Self::Detail {
                transfer_id,
                reason,
            } => Ok((transfer_id.map(TransferId::from), reason)),
            Self::Reason(reason) => Ok((None, Some(reason))),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(name: &str, payload: serde_json::Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| Error::InvalidEvent {
        event: name.to_string(),
        reason: e.to_string(),
    })
}

impl BackendEvent {
    /// Decode a raw engine event.
    ///
    /// Returns `Ok(None)` for events the coordinator knows about but does not
    /// act on (`TRANSFER_COMPLETE`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] for unknown names or malformed payloads.
    pub fn from_wire(name: &str, payload: serde_json::Value) -> Result<Option<Self>> {
        let event = match name {
            names::INCOMING_TRANSFER => {
                let offer: OfferPayload = decode(name, payload)?;
                Self::IncomingOffer {
                    transfer_id: offer.transfer_id.into(),
                    file_name: offer.filename,
                    file_size: offer.file_size,
                    sender: Device::new(offer.sender_ip, offer.sender_hostname),
                }
            }
            names::INCOMING_TRANSFER_PROGRESS => {
                let progress: ProgressPayload = decode(name, payload)?;
                let transfer_id = progress.transfer_id.ok_or_else(|| Error::InvalidEvent {
                    event: name.to_string(),
                    reason: "missing field `transferId`".to_string(),
                })?;
                Self::IncomingProgress {
                    transfer_id: transfer_id.into(),
                    percent: clamp_percent(progress.percent),
                }
            }
            names::INCOMING_TRANSFER_FAILED => {
                let (transfer_id, reason) = OutcomePayload::parse(name, payload)?;
                Self::IncomingFailed {
                    transfer_id,
                    reason,
                }
            }
            names::OUTGOING_TRANSFER_PROGRESS => {
                let progress: ProgressPayload = decode(name, payload)?;
                Self::OutgoingProgress {
                    transfer_id: progress.transfer_id.map(TransferId::from),
                    percent: clamp_percent(progress.percent),
                }
            }
            names::OUTGOING_TRANSFER_REJECTED => {
                let (transfer_id, _) = OutcomePayload::parse(name, payload)?;
                Self::OutgoingRejected { transfer_id }
            }
            names::OUTGOING_TRANSFER_FAILED => {
                let (transfer_id, reason) = OutcomePayload::parse(name, payload)?;
                Self::OutgoingFailed {
                    transfer_id,
                    reason,
                }
            }
            names::TRANSFER_COMPLETE => return Ok(None),
            other => {
                return Err(Error::InvalidEvent {
                    event: other.to_string(),
                    reason: "unknown event".to_string(),
                })
            }
        };

        Ok(Some(event))
    }

    /// The engine name of this event.
    #[must_use]
    pub const fn wire_name(&self) -> &'static str {
        match self {
            Self::IncomingOffer { .. } => names::INCOMING_TRANSFER,
            Self::IncomingProgress { .. } => names::INCOMING_TRANSFER_PROGRESS,
            Self::IncomingFailed { .. } => names::INCOMING_TRANSFER_FAILED,
            Self::OutgoingProgress { .. } => names::OUTGOING_TRANSFER_PROGRESS,
            Self::OutgoingRejected { .. } => names::OUTGOING_TRANSFER_REJECTED,
            Self::OutgoingFailed { .. } => names::OUTGOING_TRANSFER_FAILED,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(-3.0), 0);
        assert_eq!(clamp_percent(f64::NAN), 0);
        assert_eq!(clamp_percent(45.9), 45);
        assert_eq!(clamp_percent(99.99), 99);
        assert_eq!(clamp_percent(100.0), 100);
        assert_eq!(clamp_percent(250.0), 100);
    }

    #[test]
    fn test_decode_incoming_offer() {
        let event = BackendEvent::from_wire(
            names::INCOMING_TRANSFER,
            json!({
                "transferId": "t1",
                "filename": "a.png",
                "fileSize": 2048,
                "senderHostname": "alice",
                "senderIp": "10.0.0.5"
            }),
        )
        .expect("decode")
        .expect("actionable");

        assert_eq!(
            event,
            BackendEvent::IncomingOffer {
                transfer_id: TransferId::from("t1"),
                file_name: "a.png".to_string(),
                file_size: 2048,
                sender: Device::new("10.0.0.5", "alice"),
            }
        );
    }

    #[test]
    fn test_decode_fractional_progress() {
        let event = BackendEvent::from_wire(
            names::OUTGOING_TRANSFER_PROGRESS,
            json!({ "transferId": "abc", "percent": 33.3333 }),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            event,
            BackendEvent::OutgoingProgress {
                transfer_id: Some(TransferId::from("abc")),
                percent: 33,
            }
        );
    }

    #[test]
    fn test_decode_failure_with_reason_string() {
        let event = BackendEvent::from_wire(
            names::OUTGOING_TRANSFER_FAILED,
            json!("Connection reset by peer: 10.0.0.2"),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            event,
            BackendEvent::OutgoingFailed {
                transfer_id: None,
                reason: Some("Connection reset by peer: 10.0.0.2".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_rejection_ignores_extra_fields() {
        let event = BackendEvent::from_wire(
            names::OUTGOING_TRANSFER_REJECTED,
            json!({ "transferId": "t9", "accepted": false }),
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            event,
            BackendEvent::OutgoingRejected {
                transfer_id: Some(TransferId::from("t9"))
            }
        );
    }

    #[test]
    fn test_decode_null_payload() {
        let event = BackendEvent::from_wire(names::INCOMING_TRANSFER_FAILED, json!(null))
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            BackendEvent::IncomingFailed {
                transfer_id: None,
                reason: None
            }
        );
    }

    #[test]
    fn test_incoming_progress_requires_id() {
        let err = BackendEvent::from_wire(
            names::INCOMING_TRANSFER_PROGRESS,
            json!({ "percent": 10.0 }),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent { .. }));
    }

    #[test]
    fn test_transfer_complete_is_not_actionable() {
        let event = BackendEvent::from_wire(names::TRANSFER_COMPLETE, json!("t1")).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let err = BackendEvent::from_wire("DEVICE_RENAMED", json!({})).unwrap_err();
        assert!(
            matches!(err, Error::InvalidEvent { ref event, .. } if event == "DEVICE_RENAMED")
        );
    }

    #[test]
    fn test_malformed_offer_is_rejected() {
        let err = BackendEvent::from_wire(names::INCOMING_TRANSFER, json!({ "transferId": "t1" }))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEvent { .. }));
    }

    #[test]
    fn test_wire_name() {
        let event = BackendEvent::OutgoingRejected { transfer_id: None };
        assert_eq!(event.wire_name(), names::OUTGOING_TRANSFER_REJECTED);
    }
}
