use anyhow::Result;

use super::OptionalExt;
use crate::Database;

impl Database {
    // -- Settings --

    pub fn get_setting(&self, name: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM settings WHERE name = ?1", [name], |row| row.get(0))
                .optional()?;
            Ok(value)
        })
    }

    pub fn upsert_setting(&self, name: &str, value: &str, updated_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                (name, value, updated_at),
            )?;
            Ok(())
        })
    }

    /// Insert only when the setting has never been written.
    pub fn seed_setting(&self, name: &str, value: &str, updated_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO settings (name, value, updated_at) VALUES (?1, ?2, ?3)",
                (name, value, updated_at),
            )?;
            Ok(inserted > 0)
        })
    }
}
