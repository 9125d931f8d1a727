// src/handlers/late_codes.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::late_code::{
        GenerateLateCodeRequest, LateCodeGrant, LateCodeListQuery, ValidateLateCodeRequest,
    },
    services::late_code::LateCodeRegistry,
    utils::jwt::Claims,
};

/// Issues a late-access code for an exam the caller manages.
#[utoipa::path(
    post,
    path = "/api/late-codes/generate",
    request_body = GenerateLateCodeRequest,
    responses(
        (status = 201, description = "Late code created"),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Caller does not manage the exam"),
        (status = 404, description = "Exam not found")
    ),
    tag = "late-codes"
)]
pub async fn generate_late_code(
    State(registry): State<Arc<LateCodeRegistry>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GenerateLateCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let issuer = claims.identity()?;
    let exam_id = req.exam_id;

    let code = registry.generate(exam_id, &issuer, req.into()).await?;
    Ok((StatusCode::CREATED, Json(code)))
}

/// Redeems a late-access code for the caller.
///
/// Rate limited per client IP.
#[utoipa::path(
    post,
    path = "/api/late-codes/validate",
    request_body = ValidateLateCodeRequest,
    responses(
        (status = 200, description = "Code accepted"),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Code rejected"),
        (status = 409, description = "Code changed concurrently, retry once")
    ),
    tag = "late-codes"
)]
pub async fn validate_late_code(
    State(registry): State<Arc<LateCodeRegistry>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ValidateLateCodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let code = registry
        .validate(&req.code, req.exam_id, identity.user_id)
        .await?;
    Ok(Json(LateCodeGrant::from(&code)))
}

#[utoipa::path(
    get,
    path = "/api/late-codes",
    params(LateCodeListQuery),
    responses(
        (status = 200, description = "Codes of the exam, newest first"),
        (status = 403, description = "Caller does not manage the exam"),
        (status = 404, description = "Exam not found")
    ),
    tag = "late-codes"
)]
pub async fn list_late_codes(
    State(registry): State<Arc<LateCodeRegistry>>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<LateCodeListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let issuer = claims.identity()?;
    let codes = registry.list(query.exam_id, &issuer).await?;
    Ok(Json(codes))
}

#[utoipa::path(
    post,
    path = "/api/late-codes/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Late code id")),
    responses(
        (status = 200, description = "Code deactivated"),
        (status = 403, description = "Caller does not manage the exam"),
        (status = 404, description = "Late code not found")
    ),
    tag = "late-codes"
)]
pub async fn deactivate_late_code(
    State(registry): State<Arc<LateCodeRegistry>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let issuer = claims.identity()?;
    let code = registry.deactivate(id, &issuer).await?;
    Ok(Json(code))
}
