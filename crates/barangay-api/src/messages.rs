use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use barangay_db::Database;
use barangay_db::models::{MessageRow, UserRow};
use barangay_types::api::{Claims, LookupQuery, SendMessageRequest};
use barangay_types::events::GatewayEvent;
use barangay_types::models::{Message, UserSummary};

use crate::auth::{AppState, normalize_email};
use crate::error::{internal, json_error, run_blocking};

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("Error sending message: recipient {0} does not exist")]
    UnknownReceiver(Uuid),
    #[error("Error sending message: {0:#}")]
    Send(anyhow::Error),
    #[error("Error fetching user: {0:#}")]
    Lookup(anyhow::Error),
}

impl IntoResponse for MessagingError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownReceiver(_) => StatusCode::NOT_FOUND,
            Self::Send(_) | Self::Lookup(_) => {
                error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        json_error(status, self.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Trim the body and store a new unread message stamped with `sent_at`.
/// Trimming is the only transformation; a blank body is stored as `""`.
pub fn send_message(
    db: &Database,
    sender_id: Uuid,
    sender_name: &str,
    receiver_id: Uuid,
    body: &str,
    sent_at: DateTime<Utc>,
) -> Result<Message, MessagingError> {
    let body = body.trim();

    let receiver: UserRow = db
        .get_user_by_id(&receiver_id.to_string())
        .map_err(MessagingError::Send)?
        .ok_or(MessagingError::UnknownReceiver(receiver_id))?;

    let message = Message {
        id: Uuid::new_v4(),
        sender_id,
        sender_name: sender_name.to_string(),
        receiver_id,
        receiver_name: receiver.name,
        body: body.to_string(),
        read: false,
        created_at: sent_at,
    };

    db.insert_message(&MessageRow::from(&message)).map_err(MessagingError::Send)?;
    Ok(message)
}

/// First user whose email equals `email`, or `None`.
pub fn fetch_user_by_email(db: &Database, email: &str) -> Result<Option<UserSummary>, MessagingError> {
    let Some(row) = db
        .get_user_by_email(&normalize_email(email))
        .map_err(MessagingError::Lookup)?
    else {
        return Ok(None);
    };

    let user = barangay_types::models::User::try_from(row).map_err(MessagingError::Lookup)?;
    Ok(Some(UserSummary::from(&user)))
}

fn rows_to_messages(rows: Vec<MessageRow>) -> Vec<Message> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            Message::try_from(row)
                .map_err(|e| warn!("Skipping corrupt message '{}': {}", id, e))
                .ok()
        })
        .collect()
}

pub async fn post_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, MessagingError> {
    let db = state.db.clone();
    let sender_name = claims.name.clone();
    let message = tokio::task::spawn_blocking(move || {
        send_message(&db, claims.sub, &sender_name, req.receiver_id, &req.body, Utc::now())
    })
    .await
    .map_err(|e| MessagingError::Send(e.into()))??;

    state
        .dispatcher
        .send_to_user(message.receiver_id, GatewayEvent::MessageCreate(message.clone()))
        .await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn lookup_user(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Option<UserSummary>>, MessagingError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || fetch_user_by_email(&db, &query.email))
        .await
        .map_err(|e| MessagingError::Lookup(e.into()))??;

    Ok(Json(user))
}

pub async fn get_inbox(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.db.clone();
    let limit = query.limit.min(200);
    let rows = run_blocking(move || db.list_inbox(&claims.sub.to_string(), limit))
        .await?
        .map_err(internal)?;

    Ok(Json(rows_to_messages(rows)))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.db.clone();
    let limit = query.limit.min(200);
    let rows = run_blocking(move || {
        db.list_conversation(&claims.sub.to_string(), &other_id.to_string(), limit)
    })
    .await?
    .map_err(internal)?;

    Ok(Json(rows_to_messages(rows)))
}

/// Only the receiver may flip the read flag; anyone else gets 404.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, StatusCode> {
    let db = state.db.clone();
    let changed = run_blocking(move || {
        db.mark_message_read(&message_id.to_string(), &claims.sub.to_string())
    })
    .await?
    .map_err(internal)?;

    if changed { Ok(StatusCode::NO_CONTENT) } else { Err(StatusCode::NOT_FOUND) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewAccount, create_account};
    use barangay_types::models::Role;

    fn resident(db: &Database, name: &str, email: &str) -> Uuid {
        create_account(db, NewAccount {
            name,
            email,
            password: "password123",
            phone: None,
            address: None,
            role: Role::Resident,
            verified: false,
        })
        .unwrap()
        .id
    }

    #[test]
    fn test_send_trims_and_stamps() {
        let db = Database::open_in_memory().unwrap();
        let alice = resident(&db, "Alice", "alice@example.com");
        let bob = resident(&db, "Bob", "bob@example.com");
        let sent_at = Utc::now();

        let msg = send_message(&db, alice, "Alice", bob, "  hello  ", sent_at).unwrap();
        assert_eq!(msg.body, "hello");
        assert!(!msg.read);
        assert_eq!(msg.receiver_name, "Bob");

        let stored = Message::try_from(db.get_message(&msg.id.to_string()).unwrap().unwrap()).unwrap();
        assert_eq!(stored.body, "hello");
        assert!(!stored.read);
        assert_eq!(stored.created_at, sent_at);
    }

    #[test]
    fn test_send_blank_body_stores_empty() {
        let db = Database::open_in_memory().unwrap();
        let alice = resident(&db, "Alice", "alice@example.com");
        let bob = resident(&db, "Bob", "bob@example.com");

        let msg = send_message(&db, alice, "Alice", bob, "   \n\t", Utc::now()).unwrap();
        assert_eq!(msg.body, "");

        let stored = Message::try_from(db.get_message(&msg.id.to_string()).unwrap().unwrap()).unwrap();
        assert_eq!(stored.body, "");
        assert!(!stored.read);
    }

    #[test]
    fn test_send_to_unknown_receiver() {
        let db = Database::open_in_memory().unwrap();
        let alice = resident(&db, "Alice", "alice@example.com");

        let err = send_message(&db, alice, "Alice", Uuid::new_v4(), "hi", Utc::now()).unwrap_err();
        assert!(matches!(err, MessagingError::UnknownReceiver(_)));
    }

    #[test]
    fn test_send_failure_is_prefixed() {
        let db = Database::open_in_memory().unwrap();
        let alice = resident(&db, "Alice", "alice@example.com");
        let bob = resident(&db, "Bob", "bob@example.com");
        db.with_conn(|conn| {
            conn.execute_batch("DROP TABLE messages")?;
            Ok(())
        })
        .unwrap();

        let err = send_message(&db, alice, "Alice", bob, "hi", Utc::now()).unwrap_err();
        assert!(matches!(err, MessagingError::Send(_)));
        assert!(err.to_string().starts_with("Error sending message: "));
    }

    #[test]
    fn test_fetch_user_by_email() {
        let db = Database::open_in_memory().unwrap();
        let bob = resident(&db, "Bob", "bob@example.com");

        assert_eq!(fetch_user_by_email(&db, "nobody@example.com").unwrap(), None);

        let found = fetch_user_by_email(&db, " Bob@Example.com ").unwrap().unwrap();
        assert_eq!(found.id, bob);
        assert_eq!(found.name, "Bob");
    }

    #[test]
    fn test_fetch_user_transport_failure_errors() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE users")?;
            Ok(())
        })
        .unwrap();

        let err = fetch_user_by_email(&db, "bob@example.com").unwrap_err();
        assert!(err.to_string().starts_with("Error fetching user: "));
    }
}
