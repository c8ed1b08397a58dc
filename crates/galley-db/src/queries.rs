use crate::Database;
use crate::models::{
    ConversationRow, MessageRow, NewConversation, NewMessage, format_timestamp,
};
use anyhow::{Result, bail};
use chrono::{SubsecRound, Utc};
use galley_types::models::{ChatRole, Conversation, Message, SenderRole};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, application_id, chef_id, manager_id, location_id, \
     last_message_at, unread_chef_count, unread_manager_count, created_at";

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, sender_role, content, kind, file_url, file_name, created_at";

impl Database {
    // -- Conversations --

    /// Returns the conversation bound to `new.application_id`, creating it on
    /// first use. Never creates a second conversation for the same application.
    pub fn get_or_create_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO conversations
                    (id, application_id, chef_id, manager_id, location_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    new.application_id,
                    new.chef_id,
                    new.manager_id,
                    new.location_id,
                    format_timestamp(Utc::now()),
                ],
            )?;
            if inserted > 0 {
                info!("Opened conversation for application {}", new.application_id);
            }

            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE application_id = ?1"
            );
            let row = conn.query_row(&sql, [new.application_id], conversation_row)?;
            row.into_model()
        })
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        self.with_conn(|conn| query_conversation(conn, id))
    }

    /// Conversations where `user_id` holds `role`, most recently active first.
    pub fn list_conversations(&self, user_id: i64, role: ChatRole) -> Result<Vec<Conversation>> {
        let column = match role {
            ChatRole::Chef => "chef_id",
            ChatRole::Manager => "manager_id",
        };

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                 WHERE {column} = ?1
                 ORDER BY last_message_at IS NULL, last_message_at DESC, created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], conversation_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(ConversationRow::into_model).collect()
        })
    }

    /// Zero the counter owned by `role`. The counterpart's counter is untouched.
    pub fn mark_read(&self, conversation_id: &str, role: ChatRole) -> Result<Conversation> {
        let column = match role {
            ChatRole::Chef => "unread_chef_count",
            ChatRole::Manager => "unread_manager_count",
        };

        self.with_conn(|conn| {
            let updated = conn.execute(
                &format!("UPDATE conversations SET {column} = 0 WHERE id = ?1"),
                [conversation_id],
            )?;
            if updated == 0 {
                bail!("Conversation not found: {}", conversation_id);
            }
            match query_conversation(conn, conversation_id)? {
                Some(conversation) => Ok(conversation),
                None => bail!("Conversation not found: {}", conversation_id),
            }
        })
    }

    // -- Messages --

    /// Append a message and, in the same transaction, bump `last_message_at`
    /// and the unread counter of every role that did not send it.
    pub fn insert_message(&self, new: &NewMessage) -> Result<(Message, Conversation)> {
        let id = Uuid::new_v4().to_string();
        // Stored with microsecond precision; keep the returned value identical.
        let now = Utc::now().trunc_subsecs(6);
        let created_at = format_timestamp(now);

        let counters = match new.sender_role {
            SenderRole::Chef => "unread_manager_count = unread_manager_count + 1",
            SenderRole::Manager => "unread_chef_count = unread_chef_count + 1",
            SenderRole::System => {
                "unread_chef_count = unread_chef_count + 1, \
                 unread_manager_count = unread_manager_count + 1"
            }
        };

        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let updated = tx.execute(
                &format!("UPDATE conversations SET last_message_at = ?1, {counters} WHERE id = ?2"),
                rusqlite::params![created_at, new.conversation_id],
            )?;
            if updated == 0 {
                bail!("Conversation not found: {}", new.conversation_id);
            }

            tx.execute(
                "INSERT INTO messages
                    (id, conversation_id, sender_id, sender_role, content, kind, file_url, file_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id,
                    new.conversation_id,
                    new.sender_id,
                    new.sender_role.as_str(),
                    new.content,
                    new.kind().as_str(),
                    new.file_url,
                    new.file_name,
                    created_at,
                ],
            )?;

            let conversation = match query_conversation(&tx, &new.conversation_id)? {
                Some(c) => c,
                None => bail!("Conversation not found: {}", new.conversation_id),
            };
            tx.commit()?;

            let message = Message {
                id,
                conversation_id: new.conversation_id.clone(),
                sender_id: new.sender_id,
                sender_role: new.sender_role,
                content: new.content.clone(),
                kind: new.kind(),
                file_url: new.file_url.clone(),
                file_name: new.file_name.clone(),
                created_at: now,
            };
            Ok((message, conversation))
        })
    }

    /// Full history of a conversation, oldest first.
    pub fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, conversation_id))
    }
}

fn conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        application_id: row.get(1)?,
        chef_id: row.get(2)?,
        manager_id: row.get(3)?,
        location_id: row.get(4)?,
        last_message_at: row.get(5)?,
        unread_chef_count: row.get(6)?,
        unread_manager_count: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_conversation(conn: &Connection, id: &str) -> Result<Option<Conversation>> {
    let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([id], conversation_row).optional()?;
    row.map(ConversationRow::into_model).transpose()
}

fn query_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE conversation_id = ?1
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                sender_id: row.get(2)?,
                sender_role: row.get(3)?,
                content: row.get(4)?,
                kind: row.get(5)?,
                file_url: row.get(6)?,
                file_name: row.get(7)?,
                created_at: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_model).collect()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
