use anyhow::Result;
use rusqlite::params;

use crate::Database;

impl Database {
    /// One unread marker per group member except the sender, created at
    /// group-message write time. Membership comes from the caller (resolved
    /// through the membership port), so a resolver outage simply seeds zero
    /// markers while the message itself still persists.
    pub fn seed_group_read_markers(
        &self,
        message_id: &str,
        sender_id: &str,
        member_ids: &[String],
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let mut seeded = 0;
            for member in member_ids {
                if member == sender_id {
                    continue;
                }
                seeded += conn.execute(
                    "INSERT OR IGNORE INTO group_reads (message_id, user_id, read) VALUES (?1, ?2, 0)",
                    params![message_id, member],
                )?;
            }
            Ok(seeded)
        })
    }

    /// Flip every message from `counterpart` to `reader` to read. Messages
    /// with no marker yet get one inserted already read. Idempotent: the
    /// UPDATE only touches unread rows and the INSERT skips existing markers,
    /// so a concurrent or repeated call can never revert read=1.
    pub fn mark_direct_read(&self, reader_id: &str, counterpart_id: &str, read_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE direct_reads SET read = 1, read_at = ?3
                  WHERE user_id = ?1 AND read = 0
                    AND message_id IN (SELECT id FROM direct_messages
                                        WHERE sender_id = ?2 AND receiver_id = ?1)",
                params![reader_id, counterpart_id, read_at],
            )?;
            conn.execute(
                "INSERT INTO direct_reads (message_id, user_id, read, read_at)
                 SELECT m.id, ?1, 1, ?3
                   FROM direct_messages m
                  WHERE m.sender_id = ?2 AND m.receiver_id = ?1
                    AND NOT EXISTS (SELECT 1 FROM direct_reads r
                                     WHERE r.message_id = m.id AND r.user_id = ?1)",
                params![reader_id, counterpart_id, read_at],
            )?;
            Ok(())
        })
    }

    pub fn mark_group_read(&self, reader_id: &str, group_id: &str, read_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE group_reads SET read = 1, read_at = ?3
                  WHERE user_id = ?1 AND read = 0
                    AND message_id IN (SELECT id FROM group_messages
                                        WHERE group_id = ?2 AND sender_id != ?1)",
                params![reader_id, group_id, read_at],
            )?;
            conn.execute(
                "INSERT INTO group_reads (message_id, user_id, read, read_at)
                 SELECT m.id, ?1, 1, ?3
                   FROM group_messages m
                  WHERE m.group_id = ?2 AND m.sender_id != ?1
                    AND NOT EXISTS (SELECT 1 FROM group_reads r
                                     WHERE r.message_id = m.id AND r.user_id = ?1)",
                params![reader_id, group_id, read_at],
            )?;
            Ok(())
        })
    }

    /// counterpart_id -> count of messages to `user_id` with no marker or an
    /// unread one.
    pub fn direct_unread_counts(&self, user_id: &str) -> Result<Vec<(String, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.sender_id, COUNT(m.id)
                   FROM direct_messages m
                   LEFT JOIN direct_reads r
                     ON r.message_id = m.id AND r.user_id = ?1
                  WHERE m.receiver_id = ?1
                    AND m.sender_id != ?1
                    AND (r.id IS NULL OR r.read = 0)
                  GROUP BY m.sender_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// group_id -> unread count, restricted to the groups the user belongs
    /// to per resolved membership (empty slice short-circuits to empty).
    pub fn group_unread_counts(
        &self,
        user_id: &str,
        group_ids: &[String],
    ) -> Result<Vec<(String, i64)>> {
        if group_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=group_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT m.group_id, COUNT(m.id)
                   FROM group_messages m
                   LEFT JOIN group_reads r
                     ON r.message_id = m.id AND r.user_id = ?1
                  WHERE m.group_id IN ({})
                    AND m.sender_id != ?1
                    AND (r.id IS NULL OR r.read = 0)
                  GROUP BY m.group_id",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut bound: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            for id in group_ids {
                bound.push(id);
            }
            let rows = stmt
                .query_map(bound.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
