use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use barangay_db::Database;
use barangay_db::models::{RequestRow, format_timestamp};
use barangay_types::api::{Claims, CreateCertificateRequest, RequestListQuery, UpdateRequestStatus};
use barangay_types::models::{CertificateKind, CertificateRequest, Notification, RequestStatus, User};

use crate::auth::AppState;
use crate::error::{json_error, run_blocking};
use crate::notifications::{self, create_notification};

const MAX_PURPOSE_LEN: usize = 500;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("only verified residents can request certificates")]
    NotVerified,
    #[error("purpose is required (max {} characters)", MAX_PURPOSE_LEN)]
    InvalidPurpose,
    #[error("request not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotVerified => StatusCode::FORBIDDEN,
            Self::InvalidPurpose => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(e) => {
                error!("Certificate request failure: {:#}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        json_error(status, self.to_string())
    }
}

fn rows_to_requests(rows: Vec<RequestRow>) -> Vec<CertificateRequest> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            CertificateRequest::try_from(row)
                .map_err(|e| warn!("Skipping corrupt request '{}': {}", id, e))
                .ok()
        })
        .collect()
}

/// File a certificate request. Verification is what unlocks this, so the
/// requester's current row is checked, not the token.
pub fn create_request(
    db: &Database,
    user_id: Uuid,
    kind: CertificateKind,
    purpose: &str,
) -> Result<CertificateRequest, RequestError> {
    let purpose = purpose.trim();
    if purpose.is_empty() || purpose.chars().count() > MAX_PURPOSE_LEN {
        return Err(RequestError::InvalidPurpose);
    }

    let user = match db.get_user_by_id(&user_id.to_string())? {
        Some(row) => User::try_from(row)?,
        None => return Err(RequestError::NotVerified),
    };
    if !user.is_verified_resident() {
        return Err(RequestError::NotVerified);
    }

    let now = Utc::now();
    let request = CertificateRequest {
        id: Uuid::new_v4(),
        user_id,
        requester_name: user.name,
        kind,
        purpose: purpose.to_string(),
        status: RequestStatus::Pending,
        remark: None,
        created_at: now,
        updated_at: now,
    };
    db.insert_request(&RequestRow::from(&request))?;
    Ok(request)
}

/// Move a request to `status` and notify the requester.
pub fn update_request_status(
    db: &Database,
    request_id: Uuid,
    status: RequestStatus,
    remark: Option<&str>,
) -> Result<(CertificateRequest, Notification), RequestError> {
    let id = request_id.to_string();
    let remark = remark.map(str::trim).filter(|r| !r.is_empty());

    if !db.update_request_status(&id, status.as_str(), remark, &format_timestamp(&Utc::now()))? {
        return Err(RequestError::NotFound);
    }
    let row = db.get_request(&id)?.ok_or(RequestError::NotFound)?;
    let request = CertificateRequest::try_from(row)?;

    let mut body = format!(
        "Your {} request is now {}.",
        request.kind.label(),
        request.status.as_str()
    );
    if let Some(remark) = &request.remark {
        body.push(' ');
        body.push_str(remark);
    }
    let notification = create_notification(db, request.user_id, "Certificate request update", &body)?;

    Ok((request, notification))
}

pub async fn post_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCertificateRequest>,
) -> Result<impl IntoResponse, RequestError> {
    let db = state.db.clone();
    let request = tokio::task::spawn_blocking(move || create_request(&db, claims.sub, req.kind, &req.purpose))
        .await
        .map_err(|e| RequestError::Internal(e.into()))??;

    info!("{} requested {}", claims.name, request.kind.as_str());
    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_my_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<CertificateRequest>>, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking(move || db.list_requests_for_user(&claims.sub.to_string()))
        .await?
        .map_err(crate::error::internal)?;

    Ok(Json(rows_to_requests(rows)))
}

pub async fn get_all_requests(
    State(state): State<AppState>,
    Query(query): Query<RequestListQuery>,
) -> Result<Json<Vec<CertificateRequest>>, StatusCode> {
    let db = state.db.clone();
    let rows = run_blocking(move || db.list_requests(query.status.map(|s| s.as_str())))
        .await?
        .map_err(crate::error::internal)?;

    Ok(Json(rows_to_requests(rows)))
}

pub async fn set_request_status(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRequestStatus>,
) -> Result<Json<CertificateRequest>, RequestError> {
    let db = state.db.clone();
    let (request, notification) = tokio::task::spawn_blocking(move || {
        update_request_status(&db, request_id, req.status, req.remark.as_deref())
    })
    .await
    .map_err(|e| RequestError::Internal(e.into()))??;

    info!("{} marked request {} as {}", claims.name, request.id, request.status.as_str());
    notifications::deliver(&state, notification).await;
    Ok(Json(request))
}
