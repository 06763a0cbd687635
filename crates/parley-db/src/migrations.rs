use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS direct_messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL,
            receiver_id  TEXT NOT NULL,
            content      TEXT NOT NULL,
            timestamp    TEXT NOT NULL,
            reply_to_id  TEXT REFERENCES direct_messages(id) ON DELETE SET NULL,
            was_reply    INTEGER NOT NULL DEFAULT 0,
            image_url    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_direct_pair
            ON direct_messages(sender_id, receiver_id, timestamp);

        CREATE TABLE IF NOT EXISTS group_messages (
            id           TEXT PRIMARY KEY,
            sender_id    TEXT NOT NULL,
            group_id     TEXT NOT NULL,
            content      TEXT NOT NULL,
            timestamp    TEXT NOT NULL,
            reply_to_id  TEXT REFERENCES group_messages(id) ON DELETE SET NULL,
            was_reply    INTEGER NOT NULL DEFAULT 0,
            image_url    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_group_messages
            ON group_messages(group_id, timestamp);

        -- Read markers. Absence of a row means unread; the sender of a
        -- message never holds a marker for it.
        CREATE TABLE IF NOT EXISTS direct_reads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  TEXT NOT NULL REFERENCES direct_messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            read_at     TEXT,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS group_reads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  TEXT NOT NULL REFERENCES group_messages(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            read_at     TEXT,
            UNIQUE(message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id        TEXT PRIMARY KEY,
            name      TEXT NOT NULL UNIQUE,
            owner_id  TEXT NOT NULL
        );

        -- Membership row id doubles as join order: the lowest id among the
        -- remaining members is the earliest joined, which is the tie-break
        -- for ownership transfer.
        CREATE TABLE IF NOT EXISTS group_members (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id  TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
            user_id   TEXT NOT NULL,
            UNIQUE(group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
