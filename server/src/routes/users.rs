//! User profile routes.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tandem_engine::remote::protocol::UserProfile;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::users::{self, ProfileUpdate};
use crate::AppState;

/// Create user routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/users/{user_id}", get(get_handler).put(put_handler))
}

/// GET /v1/users/{user_id}
async fn get_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<UserProfile>> {
    Ok(Json(users::handle_get(state.store.as_ref(), &user_id).await?))
}

/// PUT /v1/users/{user_id}
async fn put_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(user_id): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<UserProfile>> {
    Ok(Json(users::handle_put(state.store.as_ref(), &user_id, update).await?))
}
