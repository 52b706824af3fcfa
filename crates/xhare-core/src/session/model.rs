//! The session container and its mutators.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;

use super::{
    Direction, IncomingRequest, IncomingStatus, IncomingTransfer, OutgoingStatus,
    OutgoingTransfer,
};
use crate::gateway::TransferId;

/// How many finished outgoing transfer ids are remembered.
pub const RETIRED_ID_CAPACITY: usize = 16;

/// Why an event left the model untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No session in that direction
    NoSession,
    /// The event names a different transfer than the live session
    StaleId,
    /// The session already completed or failed
    Terminal,
    /// The event names a transfer that was already dismissed
    Retired,
}

/// Result of applying a backend fact to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Session is still running at this progress
    Updated {
        /// Progress after the update
        progress: u8,
    },
    /// Session reached 100%
    Completed,
    /// Session moved to Failed
    Failed,
    /// Nothing changed
    Ignored(IgnoreReason),
}

impl EventOutcome {
    /// Whether the session entered a terminal state.
    #[must_use]
    pub const fn is_terminal_transition(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Owner of the outgoing session, the pending offer and the incoming session.
///
/// Every mutation keeps status moving forward and progress non-decreasing.
#[derive(Debug, Default)]
pub struct SessionModel {
    outgoing: Option<OutgoingTransfer>,
    outgoing_touched: Option<Instant>,
    incoming_request: Option<IncomingRequest>,
    incoming: Option<IncomingTransfer>,
    incoming_touched: Option<Instant>,
    retired: VecDeque<TransferId>,
}

impl SessionModel {
    /// Create an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The outgoing session, if any.
    #[must_use]
    pub const fn outgoing(&self) -> Option<&OutgoingTransfer> {
        self.outgoing.as_ref()
    }

    /// The pending incoming offer, if any.
    #[must_use]
    pub const fn incoming_request(&self) -> Option<&IncomingRequest> {
        self.incoming_request.as_ref()
    }

    /// The incoming session, if any.
    #[must_use]
    pub const fn incoming(&self) -> Option<&IncomingTransfer> {
        self.incoming.as_ref()
    }

    /// Whether an outgoing session is waiting or sending.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.outgoing.as_ref().is_some_and(OutgoingTransfer::is_active)
    }

    /// Whether `id` belongs to an outgoing session that was cleared.
    #[must_use]
    pub fn is_retired(&self, id: &TransferId) -> bool {
        self.retired.contains(id)
    }

    /// Install a new outgoing session, replacing any previous one.
    pub fn set_outgoing(&mut self, transfer: OutgoingTransfer, now: Instant) {
        self.clear_outgoing();
        self.outgoing = Some(transfer);
        self.outgoing_touched = Some(now);
    }

    /// Remove the outgoing session.
    ///
    /// Its transfer id is remembered so late events for it are not adopted
    /// by a later session.
    pub fn clear_outgoing(&mut self) -> Option<OutgoingTransfer> {
        self.outgoing_touched = None;
        let cleared = self.outgoing.take()?;
        if let Some(id) = &cleared.transfer_id {
            self.retire(id.clone());
        }
        Some(cleared)
    }

    /// Install a pending offer, returning the one it replaced.
    pub fn set_incoming_request(&mut self, request: IncomingRequest) -> Option<IncomingRequest> {
        self.incoming_request.replace(request)
    }

    /// Remove the pending offer.
    pub fn clear_incoming_request(&mut self) -> Option<IncomingRequest> {
        self.incoming_request.take()
    }

    /// Install a new incoming session, replacing any previous one.
    pub fn set_incoming_transfer(&mut self, transfer: IncomingTransfer, now: Instant) {
        self.incoming = Some(transfer);
        self.incoming_touched = Some(now);
    }

    /// Remove the incoming session.
    pub fn clear_incoming_transfer(&mut self) -> Option<IncomingTransfer> {
        self.incoming_touched = None;
        self.incoming.take()
    }

    /// Consume the pending offer and start its incoming session in one step.
    ///
    /// Returns `None` when no offer is pending.
    pub fn accept_request(&mut self, now: Instant) -> Option<&IncomingTransfer> {
        let request = self.incoming_request.take()?;
        self.set_incoming_transfer(IncomingTransfer::from_request(&request), now);
        self.incoming.as_ref()
    }

    /// Apply send progress.
    ///
    /// An id-less session adopts the first id it sees unless that id was
    /// retired. Events without an id apply to whatever session is live.
    pub fn update_outgoing_progress(
        &mut self,
        id: Option<&TransferId>,
        percent: u8,
        now: Instant,
    ) -> EventOutcome {
        let Some(transfer) = self.outgoing.as_mut() else {
            return EventOutcome::Ignored(IgnoreReason::NoSession);
        };
        if transfer.status.is_terminal() {
            return EventOutcome::Ignored(IgnoreReason::Terminal);
        }
        if let Err(reason) = correlate(&mut transfer.transfer_id, id, &self.retired) {
            return EventOutcome::Ignored(reason);
        }

        self.outgoing_touched = Some(now);
        if percent >= 100 {
            transfer.progress = 100;
            transfer.status = OutgoingStatus::Completed;
            EventOutcome::Completed
        } else {
            transfer.progress = transfer.progress.max(percent);
            transfer.status = OutgoingStatus::Sending;
            EventOutcome::Updated {
                progress: transfer.progress,
            }
        }
    }

    /// Apply receive progress.
    ///
    /// On completion the session records `destination` as its saved path.
    pub fn update_incoming_progress(
        &mut self,
        id: &TransferId,
        percent: u8,
        destination: &Path,
        now: Instant,
    ) -> EventOutcome {
        let Some(transfer) = self.incoming.as_mut() else {
            return EventOutcome::Ignored(IgnoreReason::NoSession);
        };
        if &transfer.transfer_id != id {
            return EventOutcome::Ignored(IgnoreReason::StaleId);
        }
        if transfer.status.is_terminal() {
            return EventOutcome::Ignored(IgnoreReason::Terminal);
        }

        self.incoming_touched = Some(now);
        if percent >= 100 {
            transfer.progress = 100;
            transfer.status = IncomingStatus::Completed;
            transfer.saved_path = Some(destination.to_path_buf());
            EventOutcome::Completed
        } else {
            transfer.progress = transfer.progress.max(percent);
            transfer.status = IncomingStatus::Receiving;
            EventOutcome::Updated {
                progress: transfer.progress,
            }
        }
    }

    /// Move the outgoing session to Failed, leaving progress where it is.
    pub fn fail_outgoing(&mut self, id: Option<&TransferId>) -> EventOutcome {
        let Some(transfer) = self.outgoing.as_mut() else {
            return EventOutcome::Ignored(IgnoreReason::NoSession);
        };
        if transfer.status.is_terminal() {
            return EventOutcome::Ignored(IgnoreReason::Terminal);
        }
        if let Err(reason) = correlate(&mut transfer.transfer_id, id, &self.retired) {
            return EventOutcome::Ignored(reason);
        }

        transfer.status = OutgoingStatus::Failed;
        EventOutcome::Failed
    }

    /// Move the incoming session to Failed, leaving progress where it is.
    pub fn fail_incoming(&mut self, id: Option<&TransferId>) -> EventOutcome {
        let Some(transfer) = self.incoming.as_mut() else {
            return EventOutcome::Ignored(IgnoreReason::NoSession);
        };
        if id.is_some_and(|id| id != &transfer.transfer_id) {
            return EventOutcome::Ignored(IgnoreReason::StaleId);
        }
        if transfer.status.is_terminal() {
            return EventOutcome::Ignored(IgnoreReason::Terminal);
        }

        transfer.status = IncomingStatus::Failed;
        EventOutcome::Failed
    }

    /// Clear the outgoing session if it is terminal.
    pub fn clear_outgoing_if_terminal(&mut self) -> Option<OutgoingTransfer> {
        if self.outgoing.as_ref().is_some_and(|t| t.status.is_terminal()) {
            self.clear_outgoing()
        } else {
            None
        }
    }

    /// Clear the incoming session if it is terminal.
    pub fn clear_incoming_if_terminal(&mut self) -> Option<IncomingTransfer> {
        if self.incoming.as_ref().is_some_and(|t| t.status.is_terminal()) {
            self.clear_incoming_transfer()
        } else {
            None
        }
    }

    /// Clear every terminal session. Returns how many were cleared.
    pub fn dismiss_terminal(&mut self) -> usize {
        usize::from(self.clear_outgoing_if_terminal().is_some())
            + usize::from(self.clear_incoming_if_terminal().is_some())
    }

    /// Fail every active session idle for at least `timeout`.
    ///
    /// Returns the directions that were failed.
    pub fn expire_stalled(&mut self, now: Instant, timeout: Duration) -> Vec<Direction> {
        let stalled = |touched: Option<Instant>| {
            touched.is_some_and(|t| now.saturating_duration_since(t) >= timeout)
        };

        let mut expired = Vec::new();
        if self.is_sending() && stalled(self.outgoing_touched) {
            if let Some(transfer) = self.outgoing.as_mut() {
                transfer.status = OutgoingStatus::Failed;
                expired.push(Direction::Outgoing);
            }
        }
        if self.incoming.as_ref().is_some_and(IncomingTransfer::is_active)
            && stalled(self.incoming_touched)
        {
            if let Some(transfer) = self.incoming.as_mut() {
                transfer.status = IncomingStatus::Failed;
                expired.push(Direction::Incoming);
            }
        }
        expired
    }

    fn retire(&mut self, id: TransferId) {
        if self.retired.contains(&id) {
            return;
        }
        if self.retired.len() == RETIRED_ID_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
    }
}

/// Match an event id against a session's id, adopting it if the session has
/// none yet.
fn correlate(
    current: &mut Option<TransferId>,
    incoming: Option<&TransferId>,
    retired: &VecDeque<TransferId>,
) -> Result<(), IgnoreReason> {
    let Some(incoming) = incoming else {
        return Ok(());
    };
    match current {
        Some(current) if current == incoming => Ok(()),
        Some(_) => Err(IgnoreReason::StaleId),
        None if retired.contains(incoming) => Err(IgnoreReason::Retired),
        None => {
            *current = Some(incoming.clone());
            Ok(())
        }
    }
}
