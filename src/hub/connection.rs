//! Server-side state for one participant's socket
//!
//! A [`Connection`] owns the sending half of a bounded outbound queue; the
//! receiving half is drained by the connection's writer task. Teardown is
//! guarded by an atomic state transition so that the reader loop, the writer
//! loop and the registry can all request a close and exactly one of them
//! performs it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use uuid::Uuid;

/// Receiving half of a connection's outbound queue
pub type OutboundQueue = mpsc::Receiver<String>;

/// Who is on the other end of a connection
///
/// `contact` is display metadata supplied by the client and is never used
/// for authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: String,
    pub display_name: String,
    pub contact: String,
}

impl Identity {
    pub fn new(
        participant_id: impl Into<String>,
        display_name: impl Into<String>,
        contact: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            contact: contact.into(),
        }
    }
}

/// Result of binding an identity to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// First identify; the connection may now be registered
    Bound,
    /// Same participant identified again; display fields refreshed
    AlreadyBound,
    /// A different participant id was presented; ignored
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closing,
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_CLOSING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Why an enqueue was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue at capacity; the recipient is treated as dead
    Full,
    /// Connection already closed
    Closed,
}

impl fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Full => write!(f, "outbound queue full"),
            EnqueueError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for EnqueueError {}

/// Display fields that a repeated identify may refresh
#[derive(Debug, Default)]
struct Profile {
    display_name: String,
    contact: String,
}

pub struct Connection {
    id: Uuid,
    meeting_id: String,
    participant_id: OnceLock<String>,
    profile: RwLock<Profile>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    state: AtomicU8,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Create a connection bound to `meeting_id` with a queue of `capacity`
    pub fn new(meeting_id: impl Into<String>, capacity: usize) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown, _) = watch::channel(false);

        let conn = Arc::new(Self {
            id: Uuid::new_v4(),
            meeting_id: meeting_id.into(),
            participant_id: OnceLock::new(),
            profile: RwLock::new(Profile::default()),
            outbound: Mutex::new(Some(tx)),
            state: AtomicU8::new(STATE_OPEN),
            shutdown,
        });

        (conn, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }

    /// Snapshot of the bound identity
    pub fn identity(&self) -> Option<Identity> {
        let participant_id = self.participant_id.get()?;
        let profile = self.profile.read();
        Some(Identity::new(
            participant_id.as_str(),
            profile.display_name.as_str(),
            profile.contact.as_str(),
        ))
    }

    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.get().map(String::as_str)
    }

    /// Bind an identity; the participant id can never change afterwards.
    ///
    /// Identifying again as the same participant refreshes the display name
    /// and contact; empty values leave the current ones in place.
    pub fn identify(&self, identity: Identity) -> IdentifyOutcome {
        let Identity {
            participant_id,
            display_name,
            contact,
        } = identity;

        let outcome = match self.participant_id.set(participant_id) {
            Ok(()) => IdentifyOutcome::Bound,
            Err(presented) if self.participant_id.get() == Some(&presented) => {
                IdentifyOutcome::AlreadyBound
            }
            Err(_) => return IdentifyOutcome::Conflict,
        };

        let mut profile = self.profile.write();
        if outcome == IdentifyOutcome::Bound || !display_name.is_empty() {
            profile.display_name = display_name;
        }
        if outcome == IdentifyOutcome::Bound || !contact.is_empty() {
            profile.contact = contact;
        }
        outcome
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => ConnectionState::Open,
            STATE_CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_OPEN
    }

    /// Non-blocking enqueue onto the outbound queue
    pub fn try_enqueue(&self, payload: String) -> Result<(), EnqueueError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(EnqueueError::Closed)?;

        tx.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Request teardown. Returns `true` only for the caller that performed it.
    ///
    /// Never blocks on I/O: it closes the queue and signals both loops, and
    /// the writer loop releases the transport when it observes the signal.
    pub fn close(&self) -> bool {
        if self
            .state
            .compare_exchange(STATE_OPEN, STATE_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Dropping the only sender closes the queue
        drop(self.outbound.lock().take());
        self.shutdown.send_replace(true);
        self.state.store(STATE_CLOSED, Ordering::Release);

        debug!(
            connection_id = %self.id,
            meeting_id = %self.meeting_id,
            participant_id = self.participant_id().unwrap_or("-"),
            "Connection closed"
        );
        true
    }

    /// Resolves once `close` has run
    pub async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("meeting_id", &self.meeting_id)
            .field("participant_id", &self.participant_id())
            .field("state", &self.state())
            .finish()
    }
}
