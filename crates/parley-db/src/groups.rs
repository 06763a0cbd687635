use anyhow::Result;
use rusqlite::params;

use parley_types::api::CleanupReport;

use crate::models::{GroupMemberRow, GroupRow};
use crate::{Database, OptionalExt};

/// What a member's departure does to the group, decided by the rule table in
/// [`resolve_departure`] and applied by [`Database::leave_group`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepartureOutcome {
    /// Last member left; the group is gone.
    GroupDeleted,
    /// The owner left; ownership moved to the earliest-joined remaining
    /// member. The `owner_transferred` event must be delivered before the
    /// generic `group_left` event.
    OwnershipTransferred { new_owner: String },
    /// A non-owner left; membership row removed, nothing else changes.
    MemberLeft,
}

/// Departure rule table. `remaining` is the membership after the leaver's row
/// was removed, ordered by membership row id ascending (earliest joined
/// first), which is the ownership-transfer tie-break.
pub fn resolve_departure(leaver_id: &str, owner_id: &str, remaining: &[String]) -> DepartureOutcome {
    if remaining.is_empty() {
        DepartureOutcome::GroupDeleted
    } else if leaver_id == owner_id {
        DepartureOutcome::OwnershipTransferred {
            new_owner: remaining[0].clone(),
        }
    } else {
        DepartureOutcome::MemberLeft
    }
}

impl Database {
    pub fn create_group(&self, id: &str, name: &str, owner_id: &str, member_ids: &[String]) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO groups (id, name, owner_id) VALUES (?1, ?2, ?3)",
                params![id, name, owner_id],
            )?;
            for member in member_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                    params![id, member],
                )?;
            }
            Ok(())
        })
    }

    pub fn group_by_id(&self, id: &str) -> Result<Option<GroupRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, owner_id FROM groups WHERE id = ?1",
                [id],
                |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner_id: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Group names are unique; used for the Conflict check before create.
    pub fn group_name_exists(&self, name: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row("SELECT id FROM groups WHERE name = ?1", [name], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Returns false when the user was already a member (Conflict upstream).
    pub fn add_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
                params![group_id, user_id],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
            )?;
            Ok(removed == 1)
        })
    }

    pub fn is_member(&self, group_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                    params![group_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Member ids ordered by membership row id (earliest joined first).
    pub fn group_member_ids(&self, group_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([group_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn groups_for_user(&self, user_id: &str) -> Result<Vec<GroupRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.owner_id
                   FROM groups g
                   JOIN group_members gm ON gm.group_id = g.id
                  WHERE gm.user_id = ?1
                  ORDER BY gm.id ASC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(GroupRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        owner_id: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn memberships_for_user(&self, user_id: &str) -> Result<Vec<GroupMemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, group_id, user_id FROM group_members WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(GroupMemberRow {
                        id: row.get(0)?,
                        group_id: row.get(1)?,
                        user_id: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_group_owner(&self, group_id: &str, owner_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE groups SET owner_id = ?2 WHERE id = ?1",
                params![group_id, owner_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_group(&self, group_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM groups WHERE id = ?1", [group_id])?;
            Ok(removed == 1)
        })
    }

    /// Remove one member and apply the departure rules. Returns `None` when
    /// the group does not exist or the user was not a member.
    pub fn leave_group(&self, group_id: &str, user_id: &str) -> Result<Option<DepartureOutcome>> {
        let Some(group) = self.group_by_id(group_id)? else {
            return Ok(None);
        };
        if !self.remove_member(group_id, user_id)? {
            return Ok(None);
        }

        let remaining = self.group_member_ids(group_id)?;
        let outcome = resolve_departure(user_id, &group.owner_id, &remaining);
        match &outcome {
            DepartureOutcome::GroupDeleted => {
                self.delete_group(group_id)?;
            }
            DepartureOutcome::OwnershipTransferred { new_owner } => {
                self.set_group_owner(group_id, new_owner)?;
            }
            DepartureOutcome::MemberLeft => {}
        }
        Ok(Some(outcome))
    }

    /// Remove a departing or deleted user from every group, transferring or
    /// dissolving ownership per the departure rules. Each group is handled
    /// independently; a failure partway through leaves earlier groups
    /// cleaned. Idempotent: a second invocation finds no memberships and
    /// reports zeros.
    pub fn cleanup_user(&self, user_id: &str) -> Result<(CleanupReport, Vec<(String, DepartureOutcome)>)> {
        let memberships = self.memberships_for_user(user_id)?;
        let mut report = CleanupReport {
            groups_cleaned: 0,
            ownerships_transferred: 0,
        };
        let mut outcomes = Vec::new();

        for membership in memberships {
            match self.leave_group(&membership.group_id, user_id)? {
                Some(outcome) => {
                    report.groups_cleaned += 1;
                    if matches!(outcome, DepartureOutcome::OwnershipTransferred { .. }) {
                        report.ownerships_transferred += 1;
                    }
                    outcomes.push((membership.group_id, outcome));
                }
                // Group vanished between listing and cleanup; nothing to do.
                None => {}
            }
        }

        Ok((report, outcomes))
    }
}
