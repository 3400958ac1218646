use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Error as SqlError, OptionalExtension, Result as SqlResult, Row, params};
use std::path::Path;
use uuid::Uuid;

use crate::common::{Chat, Message, MessageStatus};

use super::database::Database;

/// Conversations and messages served by the chat backend.
pub struct ChatDatabase {
    db: Database,
}

impl ChatDatabase {
    pub fn with_path<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        Self::init(Database::new(path)?)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::init(Database::in_memory()?)
    }

    fn init(db: Database) -> SqlResult<Self> {
        let chat_db = Self { db };
        chat_db.init_schema()?;
        Ok(chat_db)
    }

    fn init_schema(&self) -> SqlResult<()> {
        let conn = self.db.connection();

        // Một cuộc trò chuyện cho mỗi cặp user (user_a < user_b)
        conn.execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_a TEXT NOT NULL,
                user_b TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_activity INTEGER,
                UNIQUE (user_a, user_b)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id TEXT NOT NULL,
                body TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'SENT'
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation
             ON messages(conversation_id, timestamp)",
            [],
        )?;

        Ok(())
    }

    // ========== Conversations ==========

    /// Returns the conversation between two users, creating it on first use.
    pub fn get_or_create_conversation(&self, user_a: &str, user_b: &str) -> SqlResult<Chat> {
        let (first, second) = ordered_pair(user_a, user_b);
        let conn = self.db.connection();
        conn.execute(
            "INSERT OR IGNORE INTO conversations (id, user_a, user_b, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                Uuid::new_v4().to_string(),
                first,
                second,
                Utc::now().timestamp_millis()
            ],
        )?;

        conn.query_row(
            "SELECT id, user_a, user_b, last_activity
             FROM conversations
             WHERE user_a = ?1 AND user_b = ?2",
            params![first, second],
            chat_from_row,
        )
    }

    pub fn get_conversation(&self, conversation_id: &str) -> SqlResult<Option<Chat>> {
        self.db
            .connection()
            .query_row(
                "SELECT id, user_a, user_b, last_activity FROM conversations WHERE id = ?1",
                params![conversation_id],
                chat_from_row,
            )
            .optional()
    }

    /// Conversations of a user, most recently active first.
    pub fn conversations_for_user(
        &self,
        user_id: &str,
        limit: u32,
        offset: u64,
    ) -> SqlResult<Vec<Chat>> {
        let Some(offset) = sql_offset(offset) else {
            return Ok(Vec::new());
        };
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, user_a, user_b, last_activity
             FROM conversations
             WHERE user_a = ?1 OR user_b = ?1
             ORDER BY COALESCE(last_activity, created_at) DESC, rowid DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let chats = stmt
            .query_map(params![user_id, limit, offset], chat_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(chats)
    }

    pub fn has_conversations(&self, user_id: &str) -> SqlResult<bool> {
        self.db.connection().query_row(
            "SELECT EXISTS (SELECT 1 FROM conversations WHERE user_a = ?1 OR user_b = ?1)",
            params![user_id],
            |row| row.get(0),
        )
    }

    // ========== Messages ==========

    /// Stores a new message and bumps the conversation's last activity.
    pub fn insert_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        body: &str,
    ) -> SqlResult<Message> {
        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            timestamp: Utc::now().timestamp_millis(),
            status: MessageStatus::Sent,
        };

        let conn = self.db.connection();
        conn.execute(
            "INSERT INTO messages (id, conversation_id, sender_id, body, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                message.id,
                message.conversation_id,
                message.sender_id,
                message.body,
                message.timestamp,
                message.status.as_str()
            ],
        )?;
        conn.execute(
            "UPDATE conversations SET last_activity = ?1 WHERE id = ?2",
            params![message.timestamp, conversation_id],
        )?;

        Ok(message)
    }

    /// Get messages with pagination, oldest first.
    pub fn messages_for_conversation(
        &self,
        conversation_id: &str,
        limit: u32,
        offset: u64,
    ) -> SqlResult<Vec<Message>> {
        let Some(offset) = sql_offset(offset) else {
            return Ok(Vec::new());
        };
        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sender_id, body, timestamp, status
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY timestamp ASC, rowid ASC
             LIMIT ?2 OFFSET ?3",
        )?;

        let messages = stmt
            .query_map(params![conversation_id, limit, offset], message_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(messages)
    }

    /// Messages sent to `user_id` in the conversation that are not read yet.
    pub fn unread_count(&self, conversation_id: &str, user_id: &str) -> SqlResult<u64> {
        let count: i64 = self.db.connection().query_row(
            "SELECT COUNT(*) FROM messages
             WHERE conversation_id = ?1 AND sender_id != ?2 AND status != 'READ'",
            params![conversation_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Marks everything `reader_id` received in the conversation as read.
    pub fn mark_read(&self, conversation_id: &str, reader_id: &str) -> SqlResult<usize> {
        self.db.connection().execute(
            "UPDATE messages SET status = 'READ'
             WHERE conversation_id = ?1 AND sender_id != ?2 AND status != 'READ'",
            params![conversation_id, reader_id],
        )
    }
}

fn ordered_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}

/// SQLite reads a negative OFFSET as 0; anything past `i64::MAX` has no rows.
fn sql_offset(offset: u64) -> Option<i64> {
    i64::try_from(offset).ok()
}

fn chat_from_row(row: &Row<'_>) -> SqlResult<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        participants: vec![row.get(1)?, row.get(2)?],
        last_activity: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> SqlResult<Message> {
    let raw: String = row.get(5)?;
    let status = MessageStatus::parse(&raw).ok_or_else(|| {
        SqlError::FromSqlConversionFailure(
            5,
            Type::Text,
            format!("unknown message status `{raw}`").into(),
        )
    })?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        timestamp: row.get(4)?,
        status,
    })
}
