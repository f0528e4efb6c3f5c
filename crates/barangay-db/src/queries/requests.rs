use anyhow::Result;
use rusqlite::Row;

use super::OptionalExt;
use crate::models::RequestRow;
use crate::Database;

// requester_name is joined in so admin listings don't need a second lookup
const REQUEST_SELECT: &str = "SELECT r.id, r.user_id, COALESCE(u.name, 'unknown'), r.kind, r.purpose, \
     r.status, r.remark, r.created_at, r.updated_at
     FROM certificate_requests r
     LEFT JOIN users u ON r.user_id = u.id";

impl Database {
    // -- Certificate requests --

    pub fn insert_request(&self, request: &RequestRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO certificate_requests (id, user_id, kind, purpose, status, remark, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    request.id,
                    request.user_id,
                    request.kind,
                    request.purpose,
                    request.status,
                    request.remark,
                    request.created_at,
                    request.updated_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_request(&self, id: &str) -> Result<Option<RequestRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(&format!("{} WHERE r.id = ?1", REQUEST_SELECT), [id], map_request)
                .optional()?;
            Ok(row)
        })
    }

    pub fn list_requests_for_user(&self, user_id: &str) -> Result<Vec<RequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{} WHERE r.user_id = ?1 ORDER BY r.created_at DESC",
                REQUEST_SELECT
            ))?;
            let rows = stmt
                .query_map([user_id], map_request)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// All requests, optionally narrowed to one status, oldest first so the
    /// queue reads in arrival order.
    pub fn list_requests(&self, status: Option<&str>) -> Result<Vec<RequestRow>> {
        self.with_conn(|conn| {
            let rows = match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "{} WHERE r.status = ?1 ORDER BY r.created_at ASC",
                        REQUEST_SELECT
                    ))?;
                    let rows = stmt
                        .query_map([status], map_request)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
                None => {
                    let mut stmt =
                        conn.prepare(&format!("{} ORDER BY r.created_at ASC", REQUEST_SELECT))?;
                    let rows = stmt
                        .query_map([], map_request)?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    rows
                }
            };
            Ok(rows)
        })
    }

    pub fn update_request_status(
        &self,
        id: &str,
        status: &str,
        remark: Option<&str>,
        updated_at: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE certificate_requests SET status = ?2, remark = ?3, updated_at = ?4 WHERE id = ?1",
                rusqlite::params![id, status, remark, updated_at],
            )?;
            Ok(changed > 0)
        })
    }
}

fn map_request(row: &Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        requester_name: row.get(2)?,
        kind: row.get(3)?,
        purpose: row.get(4)?,
        status: row.get(5)?,
        remark: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
