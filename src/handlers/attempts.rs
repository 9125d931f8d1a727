// src/handlers/attempts.rs

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::{AppError, ServiceError},
    models::attempt::{
        AntiCheatEventRequest, ResumeAttemptRequest, SaveAnswerRequest, StartAttemptRequest,
        SubmitAttemptRequest,
    },
    services::lifecycle::AttemptLifecycle,
    utils::jwt::Claims,
};

/// Starts an attempt for the caller.
///
/// Returns 201 when a new attempt was created and 200 when the attempt
/// already in progress was handed back.
#[utoipa::path(
    post,
    path = "/api/attempts/start",
    request_body = StartAttemptRequest,
    responses(
        (status = 201, description = "Attempt created"),
        (status = 200, description = "Attempt already in progress"),
        (status = 403, description = "Window closed, late code rejected or already attempted"),
        (status = 404, description = "Exam not found")
    ),
    tag = "attempts"
)]
pub async fn start_attempt(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let started = lifecycle
        .start(identity.user_id, req.exam_id, req.late_code.as_deref())
        .await?;

    let status = if started.existing {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(started)))
}

/// Reattaches to an attempt with its resume token.
#[utoipa::path(
    post,
    path = "/api/attempts/{id}/resume",
    params(("id" = Uuid, Path, description = "Attempt id")),
    request_body = ResumeAttemptRequest,
    responses(
        (status = 200, description = "Attempt snapshot"),
        (status = 403, description = "Wrong owner or token, not in progress, or expired"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn resume_attempt(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<ResumeAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let snapshot = lifecycle
        .resume(id, &req.resume_token, identity.user_id)
        .await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/api/attempts/{id}",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses(
        (status = 200, description = "Attempt snapshot"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn get_attempt(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let snapshot = lifecycle.get_attempt(id, &identity).await?;
    Ok(Json(snapshot))
}

/// Saves (or overwrites) the answer to one question.
///
/// A finished attempt answers 400; a foreign attempt answers 403.
#[utoipa::path(
    post,
    path = "/api/attempts/answer",
    request_body = SaveAnswerRequest,
    responses(
        (status = 200, description = "Answer saved"),
        (status = 400, description = "Invalid answer or attempt no longer in progress"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn save_answer(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let response = lifecycle
        .save_answer(req.attempt_id, identity.user_id, &req.answer)
        .await
        .map_err(|e| match e {
            ServiceError::InvalidState(msg) => AppError::BadRequest(msg),
            other => other.into(),
        })?;

    Ok(Json(json!({
        "message": "Answer saved",
        "response": response,
    })))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/anti-cheat-event",
    params(("id" = Uuid, Path, description = "Attempt id")),
    request_body = AntiCheatEventRequest,
    responses(
        (status = 200, description = "Event recorded; may include an auto-submission"),
        (status = 400, description = "Unknown event type or oversized data"),
        (status = 403, description = "Not the owner or attempt not in progress"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn record_anti_cheat_event(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<AntiCheatEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let outcome = lifecycle
        .record_anti_cheat_event(id, identity.user_id, &req.event_type, req.data)
        .await?;
    Ok(Json(outcome))
}

/// Grades and completes the attempt. Re-submitting returns the stored result.
#[utoipa::path(
    post,
    path = "/api/attempts/{id}/submit",
    params(("id" = Uuid, Path, description = "Attempt id")),
    request_body = SubmitAttemptRequest,
    responses(
        (status = 200, description = "Attempt and evaluation"),
        (status = 403, description = "Not the owner or attempt not in progress"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn submit_attempt(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;
    let identity = claims.identity()?;

    let result = lifecycle
        .submit(id, identity.user_id, &req.responses)
        .await?;
    Ok(Json(result))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/abandon",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses(
        (status = 200, description = "Attempt abandoned"),
        (status = 403, description = "Not the owner or attempt not in progress"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn abandon_attempt(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let identity = claims.identity()?;
    let attempt = lifecycle.abandon(id, identity.user_id).await?;
    Ok(Json(attempt))
}

/// Attempt review with answer key, once results are released.
///
/// While results are withheld the 403 body carries the gate state so the
/// client can show a countdown.
#[utoipa::path(
    get,
    path = "/api/attempts/{id}/results",
    params(("id" = Uuid, Path, description = "Attempt id")),
    responses(
        (status = 200, description = "Attempt review"),
        (status = 403, description = "Results withheld or not the owner"),
        (status = 404, description = "Attempt not found")
    ),
    tag = "attempts"
)]
pub async fn get_results(
    State(lifecycle): State<Arc<AttemptLifecycle>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let identity = claims.identity()?;

    match lifecycle.results(id, &identity).await {
        Ok(review) => Ok(Json(review).into_response()),
        Err(ServiceError::ResultsWithheld(gate)) => {
            let body = Json(json!({
                "blocked": gate.blocked,
                "in_late_period": gate.in_late_period,
                "time_until_results": gate.time_until_results,
                "error": gate.message(),
            }));
            Ok((StatusCode::FORBIDDEN, body).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
