use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use barangay_db::models::format_timestamp;
use barangay_db::{Database, UserFilter};
use barangay_types::api::{Claims, RejectUserRequest, SubmitVerificationRequest, VerificationCounts};
use barangay_types::events::GatewayEvent;
use barangay_types::models::{Notification, Role, User};

use crate::auth::{AppState, AppStateInner};
use crate::error::{internal, json_error, run_blocking};
use crate::notifications::{self, create_notification};

/// Largest accepted ID image after base64 decoding.
pub const MAX_ID_IMAGE_BYTES: usize = 5 * 1024 * 1024;

const MAX_NOTE_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("user not found")]
    UserNotFound,
    #[error("only residents go through verification")]
    NotAResident,
    #[error("account is already verified")]
    AlreadyVerified,
    #[error("no ID image on file")]
    NoIdImage,
    #[error("unsupported image type '{0}'")]
    UnsupportedContentType(String),
    #[error("ID image is not valid base64")]
    InvalidImage,
    #[error("ID image exceeds {} bytes", MAX_ID_IMAGE_BYTES)]
    ImageTooLarge,
    #[error("a rejection note is required (max {} characters)", MAX_NOTE_LEN)]
    InvalidNote,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UserNotFound | Self::NoIdImage => StatusCode::NOT_FOUND,
            Self::NotAResident | Self::AlreadyVerified => StatusCode::CONFLICT,
            Self::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidImage | Self::InvalidNote => StatusCode::BAD_REQUEST,
            Self::ImageTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(e) => {
                error!("Verification failure: {:#}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        json_error(status, self.to_string())
    }
}

// -- Counters --

fn count_or_zero(db: &Database, filter: &UserFilter, label: &str) -> u64 {
    db.count_users(filter).unwrap_or_else(|e| {
        warn!("Failed to count {} users: {:#}", label, e);
        0
    })
}

/// Pending and verified resident counts. A failed count reads as 0.
pub fn verification_counts(db: &Database) -> VerificationCounts {
    VerificationCounts {
        pending: count_or_zero(db, &UserFilter::pending_verification(), "pending"),
        verified: count_or_zero(db, &UserFilter::verified_residents(), "verified"),
    }
}

pub fn list_pending(db: &Database) -> anyhow::Result<Vec<User>> {
    db.list_users(&UserFilter::pending_verification())?
        .into_iter()
        .map(User::try_from)
        .collect()
}

// -- Submission --

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Decode an uploaded ID image. Returns the bytes and the file extension.
pub fn decode_id_image(req: &SubmitVerificationRequest) -> Result<(Vec<u8>, &'static str), VerificationError> {
    let content_type = req.content_type.trim().to_ascii_lowercase();
    let ext = extension_for(&content_type)
        .ok_or_else(|| VerificationError::UnsupportedContentType(req.content_type.clone()))?;

    // base64 inflates by 4/3; reject before allocating
    if req.id_image.len() > MAX_ID_IMAGE_BYTES / 3 * 4 + 4 {
        return Err(VerificationError::ImageTooLarge);
    }
    let bytes = B64.decode(req.id_image.trim()).map_err(|_| VerificationError::InvalidImage)?;
    if bytes.is_empty() {
        return Err(VerificationError::InvalidImage);
    }
    if bytes.len() > MAX_ID_IMAGE_BYTES {
        return Err(VerificationError::ImageTooLarge);
    }

    Ok((bytes, ext))
}

/// Whether `user_id` may submit an ID right now: an existing, unverified resident.
pub fn check_can_submit(db: &Database, user_id: Uuid) -> Result<(), VerificationError> {
    let user = load_resident(db, user_id)?;
    if user.verified {
        return Err(VerificationError::AlreadyVerified);
    }
    Ok(())
}

/// Attach a stored ID image to the user's record and mark it submitted.
pub fn record_submission(db: &Database, user_id: Uuid, id_image: &str) -> Result<User, VerificationError> {
    check_can_submit(db, user_id)?;
    if !db.submit_verification(&user_id.to_string(), id_image)? {
        return Err(VerificationError::AlreadyVerified);
    }

    load_user(db, user_id)
}

// -- Admin decisions --

fn load_user(db: &Database, user_id: Uuid) -> Result<User, VerificationError> {
    let row = db
        .get_user_by_id(&user_id.to_string())?
        .ok_or(VerificationError::UserNotFound)?;
    Ok(User::try_from(row)?)
}

fn load_resident(db: &Database, user_id: Uuid) -> Result<User, VerificationError> {
    let user = load_user(db, user_id)?;
    if user.role != Role::Resident {
        return Err(VerificationError::NotAResident);
    }
    Ok(user)
}

/// Approve a resident. Concurrent decisions on the same user are not
/// coordinated: whichever write lands last wins.
pub fn verify_user(db: &Database, user_id: Uuid) -> Result<(User, Notification), VerificationError> {
    load_resident(db, user_id)?;
    db.mark_user_verified(&user_id.to_string(), &format_timestamp(&chrono::Utc::now()))?;

    let user = load_user(db, user_id)?;
    let notification = create_notification(
        db,
        user_id,
        "Account verified",
        "Your account has been verified. You can now request certificates.",
    )?;
    Ok((user, notification))
}

/// Send a submission back with a note; the resident must resubmit.
pub fn reject_user(db: &Database, user_id: Uuid, note: &str) -> Result<(User, Notification), VerificationError> {
    let note = note.trim();
    if note.is_empty() || note.chars().count() > MAX_NOTE_LEN {
        return Err(VerificationError::InvalidNote);
    }

    load_resident(db, user_id)?;
    db.mark_user_rejected(&user_id.to_string(), note)?;

    let user = load_user(db, user_id)?;
    let notification = create_notification(
        db,
        user_id,
        "Verification needs attention",
        &format!("Your verification was not approved: {}", note),
    )?;
    Ok((user, notification))
}

/// Tell the user's live sessions that their account state moved.
async fn announce(state: &AppStateInner, user: &User, notification: Notification) {
    state
        .dispatcher
        .send_to_user(user.id, GatewayEvent::AuthStateChange {
            user_id: user.id,
            verified: user.verified,
            submitted: user.submitted,
            error_note: user.error_note.clone(),
        })
        .await;
    notifications::deliver(state, notification).await;
}

// -- Handlers --

pub async fn get_counts(State(state): State<AppState>) -> Json<VerificationCounts> {
    let db = state.db.clone();
    let counts = run_blocking(move || verification_counts(&db)).await.unwrap_or_default();
    Json(counts)
}

pub async fn get_pending(State(state): State<AppState>) -> Result<Json<Vec<User>>, StatusCode> {
    let db = state.db.clone();
    let users = run_blocking(move || list_pending(&db)).await?.map_err(internal)?;
    Ok(Json(users))
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitVerificationRequest>,
) -> Result<Json<User>, VerificationError> {
    let (bytes, ext) = decode_id_image(&req)?;
    let user_id = claims.sub;

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || check_can_submit(&db, user_id))
        .await
        .map_err(|e| VerificationError::Internal(e.into()))??;

    let name = state.uploads.save(&bytes, ext).await?;

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || record_submission(&db, user_id, &name))
        .await
        .map_err(|e| VerificationError::Internal(e.into()))??;

    info!("{} ({}) submitted ID for verification", user.name, user.id);
    Ok(Json(user))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, VerificationError> {
    let db = state.db.clone();
    let (user, notification) = tokio::task::spawn_blocking(move || verify_user(&db, user_id))
        .await
        .map_err(|e| VerificationError::Internal(e.into()))??;

    info!("{} verified {} ({})", claims.name, user.name, user.id);
    announce(&state, &user, notification).await;
    Ok(Json(user))
}

pub async fn reject(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RejectUserRequest>,
) -> Result<Json<User>, VerificationError> {
    let db = state.db.clone();
    let (user, notification) = tokio::task::spawn_blocking(move || reject_user(&db, user_id, &req.note))
        .await
        .map_err(|e| VerificationError::Internal(e.into()))??;

    info!("{} rejected verification for {} ({})", claims.name, user.name, user.id);
    announce(&state, &user, notification).await;
    Ok(Json(user))
}

fn id_image_name(user: &User) -> Result<&str, VerificationError> {
    user.id_image.as_deref().ok_or(VerificationError::NoIdImage)
}

/// The stored ID image for a user, served with its original media type.
pub async fn get_id_image(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Response, VerificationError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || load_user(&db, user_id))
        .await
        .map_err(|e| VerificationError::Internal(e.into()))??;

    let name = id_image_name(&user)?;
    let bytes = state.uploads.read(name).await?;
    let content_type = match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewAccount, create_account};

    fn account(db: &Database, email: &str, role: Role) -> Uuid {
        create_account(db, NewAccount {
            name: "Gabriela Silang",
            email,
            password: "password123",
            phone: None,
            address: None,
            role,
            verified: role == Role::Admin,
        })
        .unwrap()
        .id
    }

    fn image(content_type: &str, data: &[u8]) -> SubmitVerificationRequest {
        SubmitVerificationRequest {
            id_image: B64.encode(data),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn test_counts_follow_workflow() {
        let db = Database::open_in_memory().unwrap();
        let a = account(&db, "a@example.com", Role::Resident);
        let b = account(&db, "b@example.com", Role::Resident);
        let _c = account(&db, "c@example.com", Role::Resident);
        account(&db, "admin@example.com", Role::Admin);

        assert_eq!(verification_counts(&db), VerificationCounts { pending: 0, verified: 0 });

        record_submission(&db, a, "img-a").unwrap();
        record_submission(&db, b, "img-b").unwrap();
        assert_eq!(verification_counts(&db), VerificationCounts { pending: 2, verified: 0 });
        assert_eq!(list_pending(&db).unwrap().len(), 2);

        let (user, notification) = verify_user(&db, a).unwrap();
        assert!(user.verified);
        assert!(user.verified_at.is_some());
        assert_eq!(notification.user_id, a);
        assert_eq!(verification_counts(&db), VerificationCounts { pending: 1, verified: 1 });

        let (user, _) = reject_user(&db, b, "  ID is expired ").unwrap();
        assert!(!user.submitted);
        assert_eq!(user.error_note.as_deref(), Some("ID is expired"));
        assert_eq!(verification_counts(&db), VerificationCounts { pending: 0, verified: 1 });
    }

    #[test]
    fn test_counts_swallow_store_errors() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = OFF; DROP TABLE users")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(verification_counts(&db), VerificationCounts::default());
    }

    #[test]
    fn test_verified_user_cannot_resubmit() {
        let db = Database::open_in_memory().unwrap();
        let a = account(&db, "a@example.com", Role::Resident);
        record_submission(&db, a, "img-a").unwrap();
        verify_user(&db, a).unwrap();

        assert!(matches!(record_submission(&db, a, "img-a2"), Err(VerificationError::AlreadyVerified)));
    }

    #[test]
    fn test_admins_are_not_verification_subjects() {
        let db = Database::open_in_memory().unwrap();
        let admin = account(&db, "admin@example.com", Role::Admin);

        assert!(matches!(record_submission(&db, admin, "img"), Err(VerificationError::NotAResident)));
        assert!(matches!(verify_user(&db, admin), Err(VerificationError::NotAResident)));
        assert!(matches!(verify_user(&db, Uuid::new_v4()), Err(VerificationError::UserNotFound)));
    }

    #[test]
    fn test_reject_requires_note() {
        let db = Database::open_in_memory().unwrap();
        let a = account(&db, "a@example.com", Role::Resident);
        assert!(matches!(reject_user(&db, a, "   "), Err(VerificationError::InvalidNote)));
    }

    #[test]
    fn test_decode_id_image() {
        let (bytes, ext) = decode_id_image(&image("image/PNG", b"\x89PNG....")).unwrap();
        assert_eq!(ext, "png");
        assert_eq!(bytes, b"\x89PNG....");

        assert!(matches!(
            decode_id_image(&image("application/pdf", b"%PDF")),
            Err(VerificationError::UnsupportedContentType(_))
        ));
        assert!(matches!(
            decode_id_image(&SubmitVerificationRequest {
                id_image: "***".into(),
                content_type: "image/jpeg".into()
            }),
            Err(VerificationError::InvalidImage)
        ));
        assert!(matches!(
            decode_id_image(&image("image/webp", &vec![0u8; MAX_ID_IMAGE_BYTES + 1])),
            Err(VerificationError::ImageTooLarge)
        ));
    }

    #[test]
    fn test_submission_checks_run_without_writing() {
        let db = Database::open_in_memory().unwrap();
        let resident = account(&db, "a@example.com", Role::Resident);
        let admin = account(&db, "admin@example.com", Role::Admin);

        check_can_submit(&db, resident).unwrap();
        assert!(matches!(check_can_submit(&db, admin), Err(VerificationError::NotAResident)));
        assert!(matches!(check_can_submit(&db, Uuid::new_v4()), Err(VerificationError::UserNotFound)));

        record_submission(&db, resident, "img-a").unwrap();
        verify_user(&db, resident).unwrap();
        assert!(matches!(check_can_submit(&db, resident), Err(VerificationError::AlreadyVerified)));
    }

    #[test]
    fn test_missing_id_image_is_distinct_from_missing_user() {
        let db = Database::open_in_memory().unwrap();
        let a = account(&db, "a@example.com", Role::Resident);

        let user = load_user(&db, a).unwrap();
        let err = id_image_name(&user).unwrap_err();
        assert!(matches!(err, VerificationError::NoIdImage));
        assert_eq!(err.to_string(), "no ID image on file");

        let user = record_submission(&db, a, "img-a").unwrap();
        assert_eq!(id_image_name(&user).unwrap(), "img-a");
    }
}
