use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use barangay_types::api::Claims;

use crate::auth::AppState;

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = decode_token(token, &state.jwt_secret).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Must sit inside `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.is_admin() {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

pub fn decode_token(token: &str, secret: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use barangay_types::models::{Role, User};
    use chrono::Utc;
    use uuid::Uuid;

    use crate::auth::create_token;

    fn user(role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            name: "Jose Rizal".into(),
            email: "jose@example.com".into(),
            phone: None,
            address: None,
            role,
            verified: false,
            submitted: false,
            id_image: None,
            error_note: None,
            verified_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_token_roundtrip_carries_role() {
        let u = user(Role::Admin);
        let token = create_token("secret-a", &u).unwrap();

        let claims = decode_token(&token, "secret-a").unwrap();
        assert_eq!(claims.sub, u.id);
        assert!(claims.is_admin());
    }

    #[test]
    fn test_token_rejected_with_other_secret() {
        let token = create_token("secret-a", &user(Role::Resident)).unwrap();
        assert!(decode_token(&token, "secret-b").is_none());
        assert!(decode_token("garbage", "secret-a").is_none());
    }
}
