//! Database row types. These map directly to SQLite rows.
//! Distinct from barangay-types models to keep the DB layer independent;
//! the `TryFrom` impls below are the only bridge between the two.

use anyhow::{Context, Result};
use barangay_types::models::{CertificateRequest, Message, Notification, User};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub password: String,
    pub role: String,
    pub verified: bool,
    pub submitted: bool,
    pub id_image: Option<String>,
    pub error_note: Option<String>,
    pub verified_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub body: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub read: bool,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct RequestRow {
    pub id: String,
    pub user_id: String,
    /// Joined from `users.name`; ignored on insert.
    pub requester_name: String,
    pub kind: String,
    pub purpose: String,
    pub status: String,
    pub remark: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Timestamps are written as RFC 3339 by the service layer. Rows written by
/// hand through the sqlite shell use `datetime('now')`, which has no zone;
/// those are read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("bad timestamp '{}'", raw))
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: row.id.parse::<Uuid>().with_context(|| format!("corrupt user id '{}'", row.id))?,
            name: row.name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            role: row.role.parse()?,
            verified: row.verified,
            submitted: row.submitted,
            id_image: row.id_image,
            error_note: row.error_note,
            verified_at: row.verified_at.as_deref().map(parse_timestamp).transpose()?,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl From<&Message> for MessageRow {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            sender_id: m.sender_id.to_string(),
            sender_name: m.sender_name.clone(),
            receiver_id: m.receiver_id.to_string(),
            receiver_name: m.receiver_name.clone(),
            body: m.body.clone(),
            read: m.read,
            created_at: format_timestamp(&m.created_at),
        }
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: row.id.parse::<Uuid>().with_context(|| format!("corrupt message id '{}'", row.id))?,
            sender_id: row.sender_id.parse::<Uuid>()?,
            sender_name: row.sender_name,
            receiver_id: row.receiver_id.parse::<Uuid>()?,
            receiver_name: row.receiver_name,
            body: row.body,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl From<&Notification> for NotificationRow {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.to_string(),
            user_id: n.user_id.to_string(),
            title: n.title.clone(),
            body: n.body.clone(),
            read: n.read,
            created_at: format_timestamp(&n.created_at),
        }
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id.parse::<Uuid>().with_context(|| format!("corrupt notification id '{}'", row.id))?,
            user_id: row.user_id.parse::<Uuid>()?,
            title: row.title,
            body: row.body,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

impl From<&CertificateRequest> for RequestRow {
    fn from(r: &CertificateRequest) -> Self {
        Self {
            id: r.id.to_string(),
            user_id: r.user_id.to_string(),
            requester_name: r.requester_name.clone(),
            kind: r.kind.as_str().to_string(),
            purpose: r.purpose.clone(),
            status: r.status.as_str().to_string(),
            remark: r.remark.clone(),
            created_at: format_timestamp(&r.created_at),
            updated_at: format_timestamp(&r.updated_at),
        }
    }
}

impl TryFrom<RequestRow> for CertificateRequest {
    type Error = anyhow::Error;

    fn try_from(row: RequestRow) -> Result<Self> {
        Ok(CertificateRequest {
            id: row.id.parse::<Uuid>().with_context(|| format!("corrupt request id '{}'", row.id))?,
            user_id: row.user_id.parse::<Uuid>()?,
            requester_name: row.requester_name,
            kind: row.kind.parse()?,
            purpose: row.purpose,
            status: row.status.parse()?,
            remark: row.remark,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_accepts_sqlite_format() {
        let ts = parse_timestamp("2024-03-01 08:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T08:30:00+00:00");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
