//! Meeting membership table and broadcast fan-out
//!
//! The table maps meeting id -> participant id -> connection. Membership
//! changes take the write lock; broadcast only reads the table and pushes into
//! per-connection queues, which are synchronized on their own. No I/O ever
//! happens while the lock is held.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::connection::Connection;
use crate::error::{HuddleError, Result};

type Members = HashMap<String, Arc<Connection>>;

/// A single fan-out request; consumed once
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub meeting_id: String,
    pub payload: String,
    /// Participant that must not receive the payload (normally the sender)
    pub exclude: Option<String>,
    /// Logical message kind, for logging
    pub kind: String,
}

impl BroadcastRequest {
    pub fn new(
        meeting_id: impl Into<String>,
        payload: impl Into<String>,
        exclude: Option<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            payload: payload.into(),
            exclude,
            kind: kind.into(),
        }
    }
}

/// Per-call delivery summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub evicted: Vec<String>,
}

/// Result of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub evicted: usize,
    pub pruned_meetings: usize,
}

/// Process-wide registry of live connections, grouped by meeting
#[derive(Default)]
pub struct Registry {
    meetings: RwLock<HashMap<String, Members>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an identified connection into its meeting slot.
    ///
    /// A connection already holding the same (meeting, participant) slot is
    /// closed and replaced under the same write lock. A connection that is
    /// no longer live is refused and the slot is left untouched.
    pub fn register(&self, conn: Arc<Connection>) -> Result<()> {
        let participant_id = conn
            .participant_id()
            .ok_or(HuddleError::Unidentified)?
            .to_string();
        let meeting_id = conn.meeting_id().to_string();

        let mut meetings = self.meetings.write();
        if !conn.is_live() {
            debug!(
                meeting_id = %meeting_id,
                participant_id = %participant_id,
                connection_id = %conn.id(),
                "Refusing to register closed connection"
            );
            return Err(HuddleError::ConnectionClosed);
        }
        let members = meetings.entry(meeting_id.clone()).or_default();

        if let Some(previous) = members.insert(participant_id.clone(), conn.clone()) {
            if !Arc::ptr_eq(&previous, &conn) {
                info!(
                    meeting_id = %meeting_id,
                    participant_id = %participant_id,
                    superseded = %previous.id(),
                    "Closing superseded connection"
                );
                previous.close();
            }
        }

        info!(
            meeting_id = %meeting_id,
            participant_id = %participant_id,
            connection_id = %conn.id(),
            connections = members.len(),
            "Participant connected"
        );
        Ok(())
    }

    /// Remove and close `conn`, but only if it still owns its slot.
    ///
    /// Returns `true` when the slot was cleared. A stale unregister from a
    /// superseded connection leaves the current occupant alone.
    pub fn unregister(&self, conn: &Arc<Connection>) -> bool {
        let removed = {
            let mut meetings = self.meetings.write();
            Self::remove_locked(&mut meetings, conn)
        };
        conn.close();
        removed
    }

    fn remove_locked(meetings: &mut HashMap<String, Members>, conn: &Arc<Connection>) -> bool {
        let Some(participant_id) = conn.participant_id() else {
            return false;
        };
        let Some(members) = meetings.get_mut(conn.meeting_id()) else {
            return false;
        };

        let owns_slot = members
            .get(participant_id)
            .is_some_and(|current| Arc::ptr_eq(current, conn));
        if !owns_slot {
            return false;
        }

        members.remove(participant_id);
        info!(
            meeting_id = %conn.meeting_id(),
            participant_id = %participant_id,
            remaining = members.len(),
            "Participant disconnected"
        );

        if members.is_empty() {
            meetings.remove(conn.meeting_id());
            info!(meeting_id = %conn.meeting_id(), "Meeting has no active connections");
        }
        true
    }

    /// Enqueue `request.payload` on every other connection in the meeting.
    ///
    /// Enqueue never blocks. A recipient whose queue is full (or already
    /// closed) is evicted and closed; the rest of the meeting is unaffected.
    pub fn broadcast(&self, request: &BroadcastRequest) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut dead = Vec::new();

        {
            let meetings = self.meetings.read();
            let Some(members) = meetings.get(&request.meeting_id) else {
                debug!(meeting_id = %request.meeting_id, kind = %request.kind, "Broadcast to empty meeting");
                return outcome;
            };

            for (participant_id, conn) in members {
                if request.exclude.as_deref() == Some(participant_id.as_str()) {
                    continue;
                }
                match conn.try_enqueue(request.payload.clone()) {
                    Ok(()) => outcome.delivered += 1,
                    Err(e) => {
                        warn!(
                            meeting_id = %request.meeting_id,
                            participant_id = %participant_id,
                            kind = %request.kind,
                            "Evicting recipient: {}",
                            e
                        );
                        dead.push(conn.clone());
                    }
                }
            }
        }

        // Close first so nothing else lands in a dead queue, then drop the slot.
        for conn in &dead {
            conn.close();
        }
        if !dead.is_empty() {
            let mut meetings = self.meetings.write();
            for conn in &dead {
                Self::remove_locked(&mut meetings, conn);
            }
        }

        outcome.evicted = dead
            .iter()
            .filter_map(|c| c.participant_id().map(str::to_string))
            .collect();

        debug!(
            meeting_id = %request.meeting_id,
            kind = %request.kind,
            delivered = outcome.delivered,
            evicted = outcome.evicted.len(),
            "Broadcast complete"
        );
        outcome
    }

    /// Evict connections that are no longer live and prune empty meetings
    pub fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut meetings = self.meetings.write();

        for (meeting_id, members) in meetings.iter_mut() {
            members.retain(|participant_id, conn| {
                if conn.is_live() {
                    return true;
                }
                debug!(
                    meeting_id = %meeting_id,
                    participant_id = %participant_id,
                    "Sweeping dead connection"
                );
                conn.close();
                stats.evicted += 1;
                false
            });
        }

        let before = meetings.len();
        meetings.retain(|_, members| !members.is_empty());
        stats.pruned_meetings = before - meetings.len();

        stats
    }

    /// Close every connection and empty the table
    pub fn close_all(&self) -> usize {
        let drained: Vec<Members> = self.meetings.write().drain().map(|(_, m)| m).collect();

        let mut closed = 0;
        for conn in drained.into_iter().flat_map(|m| m.into_values()) {
            conn.close();
            closed += 1;
        }
        closed
    }

    pub fn meeting_count(&self) -> usize {
        self.meetings.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.meetings.read().values().map(HashMap::len).sum()
    }

    /// Participant ids currently connected to a meeting, sorted
    pub fn participants(&self, meeting_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .meetings
            .read()
            .get(meeting_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn connection(&self, meeting_id: &str, participant_id: &str) -> Option<Arc<Connection>> {
        self.meetings
            .read()
            .get(meeting_id)
            .and_then(|m| m.get(participant_id))
            .cloned()
    }
}
