//! Message and part persistence.
//!
//! Every write is an idempotent upsert keyed by ID; there are no
//! multi-row transactions. `list` returns a session's messages in ID order,
//! which for ascending IDs is creation order, each with its parts in ID order.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use helm_core::ids::{MessageId, PartId, SessionId};
use helm_core::messages::{Message, MessageWithParts, Part};
use parking_lot::RwLock;

use crate::errors::Result;

/// Durable storage for conversation state.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert or replace a message.
    async fn upsert_message(&self, message: &Message) -> Result<()>;

    /// Insert or replace a part.
    async fn upsert_part(&self, part: &Part) -> Result<()>;

    /// Fetch one message with its parts.
    async fn get(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<Option<MessageWithParts>>;

    /// Every message of a session, oldest first.
    async fn list(&self, session_id: &SessionId) -> Result<Vec<MessageWithParts>>;
}

#[derive(Default)]
struct SessionRows {
    messages: BTreeMap<MessageId, Message>,
    parts: HashMap<MessageId, BTreeMap<PartId, Part>>,
}

impl SessionRows {
    fn assemble(&self, message: &Message) -> MessageWithParts {
        let parts = self
            .parts
            .get(message.id())
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default();
        MessageWithParts {
            info: message.clone(),
            parts,
        }
    }
}

/// In-process store, used by tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, SessionRows>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn upsert_message(&self, message: &Message) -> Result<()> {
        let mut sessions = self.sessions.write();
        let rows = sessions.entry(message.session_id().clone()).or_default();
        let _ = rows.messages.insert(message.id().clone(), message.clone());
        Ok(())
    }

    async fn upsert_part(&self, part: &Part) -> Result<()> {
        let mut sessions = self.sessions.write();
        let rows = sessions.entry(part.session_id.clone()).or_default();
        let _ = rows
            .parts
            .entry(part.message_id.clone())
            .or_default()
            .insert(part.id.clone(), part.clone());
        Ok(())
    }

    async fn get(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<Option<MessageWithParts>> {
        let sessions = self.sessions.read();
        Ok(sessions.get(session_id).and_then(|rows| {
            rows.messages
                .get(message_id)
                .map(|message| rows.assemble(message))
        }))
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<MessageWithParts>> {
        let sessions = self.sessions.read();
        Ok(sessions
            .get(session_id)
            .map(|rows| rows.messages.values().map(|m| rows.assemble(m)).collect())
            .unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::user;
    use super::*;

    #[tokio::test]
    async fn list_orders_messages_and_parts() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        let first = user(&session);
        let second = user(&session);
        store.upsert_message(&second).await.unwrap();
        store.upsert_message(&first).await.unwrap();

        let a = Part::text(&session, first.id(), "a");
        let b = Part::text(&session, first.id(), "b");
        store.upsert_part(&b).await.unwrap();
        store.upsert_part(&a).await.unwrap();

        let listed = store.list(&session).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].info.id(), first.id());
        assert_eq!(listed[0].text(), "a\nb");
        assert!(listed[1].parts.is_empty());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = MemoryStore::new();
        let session = SessionId::new();
        let message = user(&session);
        let mut part = Part::text(&session, message.id(), "draft");
        store.upsert_message(&message).await.unwrap();
        store.upsert_part(&part).await.unwrap();
        part.kind = Part::text(&session, message.id(), "final").kind;
        store.upsert_part(&part).await.unwrap();
        store.upsert_part(&part).await.unwrap();

        let got = store.get(&session, message.id()).await.unwrap().unwrap();
        assert_eq!(got.parts.len(), 1);
        assert_eq!(got.text(), "final");
    }

    #[tokio::test]
    async fn unknown_session_lists_empty() {
        let store = MemoryStore::new();
        assert!(store.list(&SessionId::new()).await.unwrap().is_empty());
    }
}
