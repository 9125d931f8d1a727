// src/handlers/resume.rs

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};
use validator::Validate;

use crate::{
    error::AppError,
    models::attempt::ResumeRedirectRequest,
    services::lifecycle::AttemptLifecycle,
    utils::jwt::MaybeClaims,
};

/// Resolves a resume link to the page that continues the attempt.
///
/// Works without a session; when the caller is signed in, the attempt
/// must be theirs.
#[utoipa::path(
    post,
    path = "/api/resume",
    request_body = ResumeRedirectRequest,
    responses(
        (status = 200, description = "Redirect target"),
        (status = 400, description = "Token is required"),
        (status = 403, description = "Attempt belongs to another user"),
        (status = 404, description = "Invalid token")
    ),
    tag = "attempts"
)]
pub async fn resume_redirect(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    MaybeClaims(claims): MaybeClaims,
    Json(req): Json<ResumeRedirectRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let current_user = claims
        .map(|c| c.identity())
        .transpose()?
        .map(|identity| identity.user_id);

    let redirect = lifecycle
        .get_resume_redirect(&req.token, current_user)
        .await?;
    Ok(Json(redirect))
}
