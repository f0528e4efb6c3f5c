use anyhow::Result;

use crate::models::NotificationRow;
use crate::Database;

impl Database {
    // -- Notifications --

    pub fn insert_notification(&self, notification: &NotificationRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notifications (id, user_id, title, body, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    notification.id,
                    notification.user_id,
                    notification.title,
                    notification.body,
                    notification.read,
                    notification.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// All notifications for a user, newest first.
    pub fn list_notifications(&self, user_id: &str) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, title, body, read, created_at
                 FROM notifications
                 WHERE user_id = ?1
                 ORDER BY created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(NotificationRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        title: row.get(2)?,
                        body: row.get(3)?,
                        read: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                (id, user_id),
            )?;
            Ok(changed > 0)
        })
    }

    /// Returns how many notifications flipped.
    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(changed)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::models::NotificationRow;
    use crate::queries::test_support::{db, resident};

    fn notification(id: &str, user: &str, at: &str) -> NotificationRow {
        NotificationRow {
            id: id.to_string(),
            user_id: user.to_string(),
            title: "Account verified".to_string(),
            body: "You can now request certificates.".to_string(),
            read: false,
            created_at: at.to_string(),
        }
    }

    #[test]
    fn test_mark_read_scoped_to_owner() {
        let db = db();
        db.create_user(&resident("a", "a@example.com")).unwrap();
        db.create_user(&resident("b", "b@example.com")).unwrap();
        db.insert_notification(&notification("n1", "a", "2024-01-01T00:00:01+00:00")).unwrap();
        db.insert_notification(&notification("n2", "a", "2024-01-01T00:00:02+00:00")).unwrap();
        db.insert_notification(&notification("n3", "b", "2024-01-01T00:00:03+00:00")).unwrap();

        assert!(!db.mark_notification_read("n1", "b").unwrap());
        assert!(db.mark_notification_read("n1", "a").unwrap());

        let list = db.list_notifications("a").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "n2");
        assert!(!list[0].read);
        assert!(list[1].read);

        assert_eq!(db.mark_all_notifications_read("a").unwrap(), 1);
        assert_eq!(db.mark_all_notifications_read("a").unwrap(), 0);
        assert!(!db.list_notifications("b").unwrap()[0].read);
    }
}
