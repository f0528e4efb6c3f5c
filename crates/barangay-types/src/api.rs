use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CertificateKind, RequestStatus, Role};

// -- JWT Claims --

/// JWT claims shared across barangay-api (REST middleware) and
/// barangay-gateway (WebSocket Identify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub token: String,
}

// -- Verification --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitVerificationRequest {
    /// Base64-encoded image bytes.
    pub id_image: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectUserRequest {
    pub note: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCounts {
    pub pending: u64,
    pub verified: u64,
}

// -- Settings --

#[derive(Debug, Deserialize)]
pub struct SettingQuery {
    pub fallback: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertSettingRequest {
    pub value: String,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: String,
}

// -- Notifications --

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: usize,
}

// -- Certificate requests --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCertificateRequest {
    pub kind: CertificateKind,
    pub purpose: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRequestStatus {
    pub status: RequestStatus,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RequestListQuery {
    pub status: Option<RequestStatus>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
