//! Persistence seam used by the hub
//!
//! The hub only needs two things from storage: whether a meeting can be
//! joined, and a way to durably record a chat message.

use async_trait::async_trait;

use crate::database::Database;
use crate::error::Result;
use crate::models::{ChatMessage, NewChatMessage};
use crate::repository::{ChatRepository, MeetingRepository};

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Whether an active meeting with this id exists
    async fn meeting_exists(&self, meeting_id: &str) -> Result<bool>;

    /// Store a chat message, returning it with its server-assigned id
    async fn persist_chat(&self, message: NewChatMessage) -> Result<ChatMessage>;
}

/// Postgres-backed gateway
#[derive(Clone)]
pub struct PgGateway {
    meetings: MeetingRepository,
    chat: ChatRepository,
}

impl PgGateway {
    pub fn new(db: &Database) -> Self {
        Self {
            meetings: MeetingRepository::new(db.pool().clone()),
            chat: ChatRepository::new(db.pool().clone()),
        }
    }
}

#[async_trait]
impl PersistenceGateway for PgGateway {
    async fn meeting_exists(&self, meeting_id: &str) -> Result<bool> {
        self.meetings.exists_active(meeting_id).await
    }

    async fn persist_chat(&self, message: NewChatMessage) -> Result<ChatMessage> {
        self.chat.create(message).await
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashSet;
    use std::time::Duration;

    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::*;
    use crate::error::HuddleError;

    /// In-memory gateway for tests
    #[derive(Default)]
    pub struct MemoryGateway {
        meetings: Mutex<HashSet<String>>,
        saved: Mutex<Vec<ChatMessage>>,
        fail_writes: bool,
        write_delay: Option<Duration>,
    }

    impl MemoryGateway {
        pub fn with_meetings(ids: &[&str]) -> Self {
            Self {
                meetings: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Self::default()
            }
        }

        pub fn failing(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.write_delay = Some(delay);
            self
        }

        pub fn saved(&self) -> Vec<ChatMessage> {
            self.saved.lock().clone()
        }
    }

    #[async_trait]
    impl PersistenceGateway for MemoryGateway {
        async fn meeting_exists(&self, meeting_id: &str) -> Result<bool> {
            Ok(self.meetings.lock().contains(meeting_id))
        }

        async fn persist_chat(&self, message: NewChatMessage) -> Result<ChatMessage> {
            if let Some(delay) = self.write_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes {
                return Err(HuddleError::Internal("write rejected".to_string()));
            }
            let stored = message.assign_id(Uuid::new_v4());
            self.saved.lock().push(stored.clone());
            Ok(stored)
        }
    }
}
