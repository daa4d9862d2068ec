//! Session state machine
//!
//! Two small machines plus flags:
//! connection `disconnected -> connecting -> open -> closed` (closed
//! reachable from any state on error or teardown), capture
//! `idle -> armed -> idle` (armable only once the connection is open;
//! arming while disconnected connects lazily first).
//! Mutual exclusion is structural: there are no locks here, just state
//! checks at each operation boundary.

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection; the next capture request will connect
    #[default]
    Disconnected,
    /// Connection establishment in flight
    Connecting,
    /// Duplex connection open and identified
    Open,
    /// Connection closed by us; transient until state reset
    Closed,
}

/// Microphone capture state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureState {
    /// Not recording
    #[default]
    Idle,
    /// Recording; outbound frames are flowing
    Armed,
}

/// What the service last told us about the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnerStatus {
    /// No status received yet
    #[default]
    Unknown,
    /// First contact; onboarding in progress
    New,
    /// Known owner with a remembered profile
    Returning,
}

/// Aggregate session state
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionState {
    /// Connection lifecycle
    pub connection: ConnectionState,
    /// Capture gate
    pub capture: CaptureState,
    /// Set when an utterance has been sent and no `turn_complete` received
    pub response_pending: bool,
    /// Onboarding status of the owner
    pub owner_status: OwnerStatus,
}

impl SessionState {
    /// What blocks arming a new capture right now, if anything.
    ///
    /// Connection state is never a blocker: arming while disconnected
    /// triggers a lazy connect first.
    #[must_use]
    pub fn arm_blocker(&self) -> Option<&'static str> {
        if self.capture == CaptureState::Armed {
            return Some("a recording is already in progress");
        }
        if self.response_pending {
            return Some("the assistant is still responding, wait for it to finish");
        }
        None
    }

    /// Reset to initial values (session teardown)
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
