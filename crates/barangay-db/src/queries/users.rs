use anyhow::Result;
use rusqlite::{Connection, Row, params_from_iter};

use super::OptionalExt;
use crate::filter::UserFilter;
use crate::models::UserRow;
use crate::Database;

const USER_COLUMNS: &str = "id, name, email, phone, address, password, role, verified, submitted, \
     id_image, error_note, verified_at, created_at";

impl Database {
    // -- Users --

    /// Insert a user. Returns false when the email is already registered.
    pub fn create_user(&self, user: &UserRow) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, phone, address, password, role, verified, submitted,
                                    id_image, error_note, verified_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.phone,
                    user.address,
                    user.password,
                    user.role,
                    user.verified,
                    user.submitted,
                    user.id_image,
                    user.error_note,
                    user.verified_at,
                    user.created_at,
                ],
            );
            match inserted {
                Ok(_) => Ok(true),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
                {
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    /// Equality lookup on the unique email column.
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        let (where_sql, params) = filter.to_sql();
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM users{}", where_sql),
                params_from_iter(params),
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Matching users, oldest registration first.
    pub fn list_users(&self, filter: &UserFilter) -> Result<Vec<UserRow>> {
        let (where_sql, params) = filter.to_sql();
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users{} ORDER BY created_at ASC",
                USER_COLUMNS, where_sql
            ))?;
            let rows = stmt
                .query_map(params_from_iter(params), map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Record an uploaded ID and flag the account as submitted.
    /// Returns false if the user doesn't exist or is already verified.
    pub fn submit_verification(&self, id: &str, id_image: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET id_image = ?2, submitted = 1, error_note = NULL
                 WHERE id = ?1 AND verified = 0",
                (id, id_image),
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_user_verified(&self, id: &str, verified_at: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET verified = 1, verified_at = ?2, error_note = NULL WHERE id = ?1",
                (id, verified_at),
            )?;
            Ok(changed > 0)
        })
    }

    /// Send a submission back to the resident with a note. Clearing
    /// `submitted` drops the user out of the pending set until they resubmit.
    pub fn mark_user_rejected(&self, id: &str, note: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET verified = 0, submitted = 0, verified_at = NULL, error_note = ?2
                 WHERE id = ?1",
                (id, note),
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column))?;

    let row = stmt.query_row([value], map_user).optional()?;

    Ok(row)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        address: row.get(4)?,
        password: row.get(5)?,
        role: row.get(6)?,
        verified: row.get(7)?,
        submitted: row.get(8)?,
        id_image: row.get(9)?,
        error_note: row.get(10)?,
        verified_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}
