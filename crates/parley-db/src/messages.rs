use anyhow::Result;
use rusqlite::{Connection, params};

use crate::models::{DirectMessageRow, GroupMessageRow};
use crate::{Database, OptionalExt};

const DIRECT_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.timestamp,
        m.reply_to_id, m.was_reply, m.image_url, r.sender_id, r.content
     FROM direct_messages m
     LEFT JOIN direct_messages r ON m.reply_to_id = r.id";

const GROUP_SELECT: &str = "SELECT m.id, m.sender_id, m.group_id, m.content, m.timestamp,
        m.reply_to_id, m.was_reply, m.image_url, r.sender_id, r.content
     FROM group_messages m
     LEFT JOIN group_messages r ON m.reply_to_id = r.id";

impl Database {
    /// Insert a direct message. `was_reply` records that a reply reference
    /// was set at creation even if the target never existed or is later
    /// deleted; in both cases rendering degrades to the sentinel preview.
    pub fn insert_direct_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        timestamp: &str,
        reply_to_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let stored_reply = existing_reply_target(conn, "direct_messages", reply_to_id)?;
            conn.execute(
                "INSERT INTO direct_messages
                    (id, sender_id, receiver_id, content, timestamp, reply_to_id, was_reply, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    sender_id,
                    receiver_id,
                    content,
                    timestamp,
                    stored_reply,
                    reply_to_id.is_some(),
                    image_url
                ],
            )?;
            Ok(())
        })
    }

    pub fn insert_group_message(
        &self,
        id: &str,
        sender_id: &str,
        group_id: &str,
        content: &str,
        timestamp: &str,
        reply_to_id: Option<&str>,
        image_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let stored_reply = existing_reply_target(conn, "group_messages", reply_to_id)?;
            conn.execute(
                "INSERT INTO group_messages
                    (id, sender_id, group_id, content, timestamp, reply_to_id, was_reply, image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    sender_id,
                    group_id,
                    content,
                    timestamp,
                    stored_reply,
                    reply_to_id.is_some(),
                    image_url
                ],
            )?;
            Ok(())
        })
    }

    /// Full conversation between two users, either direction, oldest first.
    pub fn direct_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{DIRECT_SELECT}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.timestamp ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_a, user_b], direct_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn group_messages(&self, group_id: &str) -> Result<Vec<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{GROUP_SELECT}
                 WHERE m.group_id = ?1
                 ORDER BY m.timestamp ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([group_id], group_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_direct_message(&self, id: &str) -> Result<Option<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{DIRECT_SELECT} WHERE m.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], direct_row).optional()
        })
    }

    pub fn get_group_message(&self, id: &str) -> Result<Option<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!("{GROUP_SELECT} WHERE m.id = ?1");
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([id], group_row).optional()
        })
    }

    /// Hard delete. Read markers cascade; replies pointing here get their
    /// reference nulled and render the sentinel. Returns rows affected, so
    /// deleting an already-absent message is not an error.
    pub fn delete_direct_message(&self, id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM direct_messages WHERE id = ?1", [id])?)
        })
    }

    pub fn delete_group_message(&self, id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM group_messages WHERE id = ?1", [id])?)
        })
    }

    /// Bulk delete of an entire direct conversation.
    pub fn delete_direct_conversation(&self, user_a: &str, user_b: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM direct_messages
                  WHERE (sender_id = ?1 AND receiver_id = ?2)
                     OR (sender_id = ?2 AND receiver_id = ?1)",
                params![user_a, user_b],
            )?)
        })
    }

    pub fn delete_group_conversation(&self, group_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM group_messages WHERE group_id = ?1", [group_id])?)
        })
    }

    pub fn last_direct_message(&self, user_a: &str, user_b: &str) -> Result<Option<DirectMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{DIRECT_SELECT}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.timestamp DESC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row(params![user_a, user_b], direct_row).optional()
        })
    }

    pub fn last_group_message(&self, group_id: &str) -> Result<Option<GroupMessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{GROUP_SELECT}
                 WHERE m.group_id = ?1
                 ORDER BY m.timestamp DESC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_row([group_id], group_row).optional()
        })
    }

    /// Distinct counterpart ids this user has a direct conversation with.
    pub fn direct_partners(&self, user_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END
                   FROM direct_messages
                  WHERE sender_id = ?1 OR receiver_id = ?1",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

/// A reply reference is only stored if its target row still exists at write
/// time; otherwise the column stays NULL while `was_reply` records the intent.
fn existing_reply_target(
    conn: &Connection,
    table: &str,
    reply_to_id: Option<&str>,
) -> Result<Option<String>> {
    let Some(target) = reply_to_id else {
        return Ok(None);
    };
    let found: Option<String> = conn
        .query_row(
            &format!("SELECT id FROM {table} WHERE id = ?1"),
            [target],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found)
}

fn direct_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DirectMessageRow> {
    Ok(DirectMessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        reply_to_id: row.get(5)?,
        was_reply: row.get(6)?,
        image_url: row.get(7)?,
        reply_sender_id: row.get(8)?,
        reply_content: row.get(9)?,
    })
}

fn group_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupMessageRow> {
    Ok(GroupMessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        group_id: row.get(2)?,
        content: row.get(3)?,
        timestamp: row.get(4)?,
        reply_to_id: row.get(5)?,
        was_reply: row.get(6)?,
        image_url: row.get(7)?,
        reply_sender_id: row.get(8)?,
        reply_content: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn conversation_is_pair_scoped_and_ordered() {
        let db = db();
        db.insert_direct_message("m1", "alice", "bob", "hi", "2026-01-01T10:00:00Z", None, None)
            .unwrap();
        db.insert_direct_message("m2", "bob", "alice", "hey", "2026-01-01T10:00:05Z", None, None)
            .unwrap();
        db.insert_direct_message("m3", "alice", "carol", "other", "2026-01-01T09:00:00Z", None, None)
            .unwrap();

        let convo = db.direct_conversation("bob", "alice").unwrap();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].id, "m1");
        assert_eq!(convo[1].id, "m2");
    }

    #[test]
    fn deleting_reply_target_degrades_not_deletes() {
        let db = db();
        db.insert_direct_message("m1", "alice", "bob", "original", "2026-01-01T10:00:00Z", None, None)
            .unwrap();
        db.insert_direct_message(
            "m2",
            "bob",
            "alice",
            "reply",
            "2026-01-01T10:01:00Z",
            Some("m1"),
            None,
        )
        .unwrap();

        assert_eq!(db.delete_direct_message("m1").unwrap(), 1);

        let convo = db.direct_conversation("alice", "bob").unwrap();
        assert_eq!(convo.len(), 1, "the replying message must survive");
        let reply = &convo[0];
        assert!(reply.was_reply);
        assert!(reply.reply_to_id.is_none(), "no dangling id");
        assert!(reply.reply_content.is_none());
    }

    #[test]
    fn reply_to_unknown_target_stores_null_reference() {
        let db = db();
        db.insert_direct_message(
            "m1",
            "alice",
            "bob",
            "reply to nothing",
            "2026-01-01T10:00:00Z",
            Some("ghost"),
            None,
        )
        .unwrap();
        let row = db.get_direct_message("m1").unwrap().unwrap();
        assert!(row.was_reply);
        assert!(row.reply_to_id.is_none());
    }

    #[test]
    fn delete_absent_message_is_not_an_error() {
        let db = db();
        assert_eq!(db.delete_direct_message("nope").unwrap(), 0);
        assert_eq!(db.delete_group_message("nope").unwrap(), 0);
    }

    #[test]
    fn bulk_conversation_delete() {
        let db = db();
        db.insert_direct_message("m1", "a", "b", "1", "2026-01-01T10:00:00Z", None, None)
            .unwrap();
        db.insert_direct_message("m2", "b", "a", "2", "2026-01-01T10:01:00Z", None, None)
            .unwrap();
        db.insert_direct_message("m3", "a", "c", "3", "2026-01-01T10:02:00Z", None, None)
            .unwrap();

        assert_eq!(db.delete_direct_conversation("a", "b").unwrap(), 2);
        assert!(db.direct_conversation("a", "b").unwrap().is_empty());
        assert_eq!(db.direct_conversation("a", "c").unwrap().len(), 1);
    }

    #[test]
    fn group_history_and_last_message() {
        let db = db();
        db.insert_group_message("g1", "alice", "grp", "first", "2026-01-01T10:00:00Z", None, None)
            .unwrap();
        db.insert_group_message("g2", "bob", "grp", "second", "2026-01-01T10:00:01Z", None, None)
            .unwrap();

        let msgs = db.group_messages("grp").unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].id, "g1");

        let last = db.last_group_message("grp").unwrap().unwrap();
        assert_eq!(last.id, "g2");
    }

    #[test]
    fn direct_partners_are_distinct_both_directions() {
        let db = db();
        db.insert_direct_message("m1", "a", "b", "1", "2026-01-01T10:00:00Z", None, None)
            .unwrap();
        db.insert_direct_message("m2", "b", "a", "2", "2026-01-01T10:01:00Z", None, None)
            .unwrap();
        db.insert_direct_message("m3", "c", "a", "3", "2026-01-01T10:02:00Z", None, None)
            .unwrap();

        let mut partners = db.direct_partners("a").unwrap();
        partners.sort();
        assert_eq!(partners, vec!["b".to_string(), "c".to_string()]);
    }
}
