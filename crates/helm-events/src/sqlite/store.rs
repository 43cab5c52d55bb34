//! [`MessageStore`] over `SQLite`, storing each record as a JSON row.

use async_trait::async_trait;
use helm_core::ids::{MessageId, SessionId};
use helm_core::messages::{Message, MessageWithParts, Part};
use rusqlite::{OptionalExtension, params};

use super::connection::ConnectionPool;
use super::migrations::{Migration, run_migrations};
use crate::errors::Result;
use crate::store::MessageStore;

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "messages and parts",
    sql: "CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            data        TEXT NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);
          CREATE TABLE IF NOT EXISTS parts (
            id          TEXT PRIMARY KEY,
            session_id  TEXT NOT NULL,
            message_id  TEXT NOT NULL,
            data        TEXT NOT NULL
          );
          CREATE INDEX IF NOT EXISTS idx_parts_message ON parts(session_id, message_id, id);",
}];

/// `SQLite`-backed message store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: ConnectionPool,
}

impl SqliteStore {
    /// Wrap a pool, creating the schema if needed.
    pub fn open(pool: ConnectionPool) -> Result<Self> {
        let _ = run_migrations(&*pool.get()?, "messages", MIGRATIONS)?;
        Ok(Self { pool })
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn parts_of(conn: &rusqlite::Connection, session_id: &str) -> Result<Vec<Part>> {
        let mut stmt = conn.prepare(
            "SELECT data FROM parts WHERE session_id = ?1 ORDER BY message_id, id",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut parts = Vec::new();
        for row in rows {
            parts.push(serde_json::from_str(&row?)?);
        }
        Ok(parts)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn upsert_message(&self, message: &Message) -> Result<()> {
        let data = serde_json::to_string(message)?;
        let _ = self.pool.get()?.execute(
            "INSERT INTO messages (id, session_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![message.id().as_str(), message.session_id().as_str(), data],
        )?;
        Ok(())
    }

    async fn upsert_part(&self, part: &Part) -> Result<()> {
        let data = serde_json::to_string(part)?;
        let _ = self.pool.get()?.execute(
            "INSERT INTO parts (id, session_id, message_id, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![
                part.id.as_str(),
                part.session_id.as_str(),
                part.message_id.as_str(),
                data
            ],
        )?;
        Ok(())
    }

    async fn get(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
    ) -> Result<Option<MessageWithParts>> {
        let conn = self.pool.get()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM messages WHERE session_id = ?1 AND id = ?2",
                params![session_id.as_str(), message_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(data) = data else {
            return Ok(None);
        };
        let info: Message = serde_json::from_str(&data)?;
        let mut stmt =
            conn.prepare("SELECT data FROM parts WHERE message_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![message_id.as_str()], |row| row.get::<_, String>(0))?;
        let mut parts = Vec::new();
        for row in rows {
            parts.push(serde_json::from_str(&row?)?);
        }
        Ok(Some(MessageWithParts { info, parts }))
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<MessageWithParts>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT data FROM messages WHERE session_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![session_id.as_str()], |row| row.get::<_, String>(0))?;
        let mut messages = Vec::new();
        for row in rows {
            let info: Message = serde_json::from_str(&row?)?;
            messages.push(MessageWithParts {
                info,
                parts: Vec::new(),
            });
        }

        // Parts arrive grouped by message in the same order as `messages`.
        let mut index = 0;
        for part in Self::parts_of(&conn, session_id.as_str())? {
            while index < messages.len() && messages[index].info.id() < &part.message_id {
                index += 1;
            }
            if let Some(entry) = messages
                .get_mut(index)
                .filter(|entry| entry.info.id() == &part.message_id)
            {
                entry.parts.push(part);
            }
        }
        Ok(messages)
    }
}
