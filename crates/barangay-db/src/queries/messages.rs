use anyhow::Result;
use rusqlite::Row;

use super::OptionalExt;
use crate::models::MessageRow;
use crate::Database;

const MESSAGE_COLUMNS: &str =
    "id, sender_id, sender_name, receiver_id, receiver_name, body, read, created_at";

impl Database {
    // -- Messages --

    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, sender_name, receiver_id, receiver_name, body, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    message.id,
                    message.sender_id,
                    message.sender_name,
                    message.receiver_id,
                    message.receiver_name,
                    message.body,
                    message.read,
                    message.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                    [id],
                    map_message,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Both directions between two users, oldest first, capped at the most
    /// recent `limit`.
    pub fn list_conversation(&self, user_a: &str, user_b: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM (
                     SELECT * FROM messages
                     WHERE (sender_id = ?1 AND receiver_id = ?2)
                        OR (sender_id = ?2 AND receiver_id = ?1)
                     ORDER BY created_at DESC
                     LIMIT ?3
                 ) ORDER BY created_at ASC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user_a, user_b, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages received by `user_id`, newest first.
    pub fn list_inbox(&self, user_id: &str, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE receiver_id = ?1 ORDER BY created_at DESC LIMIT ?2",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip the read flag. Only matches when `receiver_id` is the receiver.
    pub fn mark_message_read(&self, id: &str, receiver_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1 WHERE id = ?1 AND receiver_id = ?2",
                (id, receiver_id),
            )?;
            Ok(changed > 0)
        })
    }
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_name: row.get(2)?,
        receiver_id: row.get(3)?,
        receiver_name: row.get(4)?,
        body: row.get(5)?,
        read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::models::MessageRow;
    use crate::queries::test_support::{db, resident};

    fn message(id: &str, from: &str, to: &str, at: &str) -> MessageRow {
        MessageRow {
            id: id.to_string(),
            sender_id: from.to_string(),
            sender_name: format!("Resident {}", from),
            receiver_id: to.to_string(),
            receiver_name: format!("Resident {}", to),
            body: format!("body {}", id),
            read: false,
            created_at: at.to_string(),
        }
    }

    #[test]
    fn test_conversation_ordering_and_scope() {
        let db = db();
        db.create_user(&resident("a", "a@example.com")).unwrap();
        db.create_user(&resident("b", "b@example.com")).unwrap();
        db.create_user(&resident("c", "c@example.com")).unwrap();

        db.insert_message(&message("m1", "a", "b", "2024-01-01T00:00:01+00:00")).unwrap();
        db.insert_message(&message("m2", "b", "a", "2024-01-01T00:00:02+00:00")).unwrap();
        db.insert_message(&message("m3", "c", "a", "2024-01-01T00:00:03+00:00")).unwrap();
        db.insert_message(&message("m4", "a", "b", "2024-01-01T00:00:04+00:00")).unwrap();

        let convo = db.list_conversation("a", "b", 50).unwrap();
        let ids: Vec<&str> = convo.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m4"]);

        let recent = db.list_conversation("b", "a", 2).unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m4"]);

        let inbox = db.list_inbox("a", 50).unwrap();
        let ids: Vec<&str> = inbox.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m2"]);
    }

    #[test]
    fn test_only_receiver_marks_read() {
        let db = db();
        db.create_user(&resident("a", "a@example.com")).unwrap();
        db.create_user(&resident("b", "b@example.com")).unwrap();
        db.insert_message(&message("m1", "a", "b", "2024-01-01T00:00:01+00:00")).unwrap();

        assert!(!db.mark_message_read("m1", "a").unwrap());
        assert!(!db.get_message("m1").unwrap().unwrap().read);

        assert!(db.mark_message_read("m1", "b").unwrap());
        assert!(db.get_message("m1").unwrap().unwrap().read);
    }

    #[test]
    fn test_message_requires_known_users() {
        let db = db();
        db.create_user(&resident("a", "a@example.com")).unwrap();
        assert!(db.insert_message(&message("m1", "a", "ghost", "2024-01-01T00:00:01+00:00")).is_err());
    }
}
