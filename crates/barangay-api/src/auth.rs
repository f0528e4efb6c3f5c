use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use barangay_db::Database;
use barangay_db::models::{UserRow, format_timestamp};
use barangay_gateway::Dispatcher;
use barangay_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use barangay_types::models::{Role, User};

use crate::error::{internal, json_error, run_blocking};
use crate::notifications::NotificationStore;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub notifications: NotificationStore,
    pub uploads: Storage,
}

const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("name must be between 1 and 100 characters")]
    InvalidName,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least 8 characters")]
    WeakPassword,
    #[error("email is already registered")]
    EmailTaken,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidName | Self::InvalidEmail | Self::WeakPassword => StatusCode::BAD_REQUEST,
            Self::EmailTaken => StatusCode::CONFLICT,
            Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Internal(e) => {
                error!("Auth failure: {:#}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        json_error(status, self.to_string())
    }
}

/// Everything needed to create an account row.
pub struct NewAccount<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
    pub phone: Option<&'a str>,
    pub address: Option<&'a str>,
    pub role: Role,
    pub verified: bool,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    }
}

fn optional_field(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))
}

/// Validate, hash and insert a new account.
pub fn create_account(db: &Database, account: NewAccount<'_>) -> Result<User, AuthError> {
    let name = account.name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(AuthError::InvalidName);
    }
    let email = normalize_email(account.email);
    if !is_plausible_email(&email) {
        return Err(AuthError::InvalidEmail);
    }
    if account.password.len() < 8 {
        return Err(AuthError::WeakPassword);
    }

    if db.get_user_by_email(&email)?.is_some() {
        return Err(AuthError::EmailTaken);
    }

    let now = chrono::Utc::now();
    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        email,
        phone: optional_field(account.phone),
        address: optional_field(account.address),
        password: hash_password(account.password)?,
        role: account.role.as_str().to_string(),
        verified: account.verified,
        submitted: false,
        id_image: None,
        error_note: None,
        verified_at: account.verified.then(|| format_timestamp(&now)),
        created_at: format_timestamp(&now),
    };

    // A concurrent registration can claim the email after the check above.
    if !db.create_user(&row)? {
        return Err(AuthError::EmailTaken);
    }
    Ok(User::try_from(row)?)
}

/// Check credentials. Unknown email and wrong password are indistinguishable.
pub fn authenticate(db: &Database, email: &str, password: &str) -> Result<User, AuthError> {
    let row = db
        .get_user_by_email(&normalize_email(email))?
        .ok_or(AuthError::InvalidCredentials)?;

    let parsed_hash = PasswordHash::new(&row.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is unreadable: {}", row.id, e))?;

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AuthError::InvalidCredentials)?;

    Ok(User::try_from(row)?)
}

/// Create the configured administrator if no account holds that email yet.
pub fn bootstrap_admin(db: &Database, name: &str, email: &str, password: &str) -> Result<bool, AuthError> {
    if db.get_user_by_email(&normalize_email(email))?.is_some() {
        return Ok(false);
    }

    let admin = create_account(db, NewAccount {
        name,
        email,
        password,
        phone: None,
        address: None,
        role: Role::Admin,
        verified: true,
    })?;
    info!("Bootstrapped administrator account {}", admin.email);
    Ok(true)
}

pub fn create_token(secret: &str, user: &User) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user.id,
        name: user.name.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || {
        create_account(&db, NewAccount {
            name: &req.name,
            email: &req.email,
            password: &req.password,
            phone: req.phone.as_deref(),
            address: req.address.as_deref(),
            role: Role::Resident,
            verified: false,
        })
    })
    .await
    .map_err(|e| AuthError::Internal(e.into()))??;

    let token = create_token(&state.jwt_secret, &user)?;
    info!("Registered resident {} ({})", user.email, user.id);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || authenticate(&db, &req.email, &req.password))
        .await
        .map_err(|e| AuthError::Internal(e.into()))??;

    let token = create_token(&state.jwt_secret, &user)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        name: user.name,
        role: user.role,
        token,
    }))
}

/// The caller's own profile, verification record included.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, StatusCode> {
    let db = state.db.clone();
    let id = claims.sub.to_string();
    let row = run_blocking(move || db.get_user_by_id(&id))
        .await?
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(User::try_from(row).map_err(internal)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account<'a>(email: &'a str, password: &'a str) -> NewAccount<'a> {
        NewAccount {
            name: "Maria Clara",
            email,
            password,
            phone: Some("  "),
            address: Some(" Purok 1 "),
            role: Role::Resident,
            verified: false,
        }
    }

    #[test]
    fn test_register_then_login() {
        let db = Database::open_in_memory().unwrap();
        let user = create_account(&db, account(" Maria@Example.com ", "correct horse")).unwrap();

        assert_eq!(user.email, "maria@example.com");
        assert_eq!(user.role, Role::Resident);
        assert!(!user.verified && !user.submitted);
        assert_eq!(user.phone, None);
        assert_eq!(user.address.as_deref(), Some("Purok 1"));

        let logged_in = authenticate(&db, "MARIA@example.com", "correct horse").unwrap();
        assert_eq!(logged_in.id, user.id);
    }

    #[test]
    fn test_bad_credentials() {
        let db = Database::open_in_memory().unwrap();
        create_account(&db, account("maria@example.com", "correct horse")).unwrap();

        assert!(matches!(
            authenticate(&db, "maria@example.com", "wrong horse"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            authenticate(&db, "nobody@example.com", "correct horse"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_registration_validation() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(create_account(&db, account("not-an-email", "correct horse")), Err(AuthError::InvalidEmail)));
        assert!(matches!(create_account(&db, account("a@example.com", "short")), Err(AuthError::WeakPassword)));

        create_account(&db, account("a@example.com", "correct horse")).unwrap();
        assert!(matches!(create_account(&db, account("A@example.com", "correct horse")), Err(AuthError::EmailTaken)));
    }

    #[test]
    fn test_bootstrap_admin_once() {
        let db = Database::open_in_memory().unwrap();
        assert!(bootstrap_admin(&db, "Kapitan", "admin@example.com", "admin-password").unwrap());
        assert!(!bootstrap_admin(&db, "Kapitan", "admin@example.com", "admin-password").unwrap());

        let admin = authenticate(&db, "admin@example.com", "admin-password").unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(admin.verified);
        assert!(admin.verified_at.is_some());
    }

    #[test]
    fn test_concurrent_registrations_one_wins() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || create_account(&db, account("race@example.com", "correct horse")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AuthError::EmailTaken)));
    }
}
