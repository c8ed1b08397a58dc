use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (conversations, messages)");
        conn.execute_batch(
            "
            CREATE TABLE conversations (
                id                    TEXT PRIMARY KEY,
                application_id        INTEGER NOT NULL UNIQUE,
                chef_id               INTEGER NOT NULL,
                manager_id            INTEGER NOT NULL,
                location_id           INTEGER NOT NULL,
                last_message_at       TEXT,
                unread_chef_count     INTEGER NOT NULL DEFAULT 0 CHECK (unread_chef_count >= 0),
                unread_manager_count  INTEGER NOT NULL DEFAULT 0 CHECK (unread_manager_count >= 0),
                created_at            TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_chef ON conversations(chef_id);
            CREATE INDEX idx_conversations_manager ON conversations(manager_id);

            CREATE TABLE messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                sender_id        INTEGER,
                sender_role      TEXT NOT NULL CHECK (sender_role IN ('chef', 'manager', 'system')),
                content          TEXT NOT NULL,
                kind             TEXT NOT NULL CHECK (kind IN ('text', 'file')),
                file_url         TEXT,
                file_name        TEXT,
                created_at       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation
                ON messages(conversation_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
