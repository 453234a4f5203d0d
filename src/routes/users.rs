use axum::extract::State;
use axum::Json;

use crate::error::AppResult;
use crate::middleware::guards::AuthedUser;
use crate::services::Profile;
use crate::state::AppState;

/// Directory listing, sourced entirely from the profile directory. An
/// unconfigured or unreachable directory yields an empty list.
pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthedUser,
) -> AppResult<Json<Vec<Profile>>> {
    Ok(Json(state.profiles.list_all().await))
}
