//! Authentication middleware.
//!
//! Bearer tokens are compared against the configured shared secret. Without
//! a secret every request is accepted.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    /// No token was presented and none is required
    pub anonymous: bool,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authorize(auth_header, state.config.auth_secret.as_deref())
    }
}

fn authorize(
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<AuthUser, (StatusCode, &'static str)> {
    match (header, secret) {
        (Some(header), _) if !header.starts_with("Bearer ") => Err((
            StatusCode::UNAUTHORIZED,
            "Invalid authorization header format",
        )),
        (Some(header), secret) => {
            let token = header.trim_start_matches("Bearer ");
            if token.is_empty() {
                return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
            }
            match secret {
                Some(secret) if token != secret => {
                    Err((StatusCode::UNAUTHORIZED, "Invalid bearer token"))
                }
                _ => Ok(AuthUser { anonymous: false }),
            }
        }
        (None, None) => Ok(AuthUser { anonymous: true }),
        (None, Some(_)) => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
    }
}
