// src/routes.rs

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    handlers::{attempts, late_codes, resume},
    models::{
        attempt::{
            AnswerPayload, AntiCheatEventRequest, ResumeAttemptRequest, ResumeRedirectRequest,
            SaveAnswerRequest, StartAttemptRequest, SubmitAttemptRequest,
        },
        late_code::{GenerateLateCodeRequest, ValidateLateCodeRequest},
    },
    state::AppState,
    utils::jwt::{auth_middleware, optional_auth_middleware, staff_middleware},
};

#[derive(OpenApi)]
#[openapi(
    paths(
        attempts::start_attempt,
        attempts::save_answer,
        attempts::get_attempt,
        attempts::resume_attempt,
        attempts::record_anti_cheat_event,
        attempts::submit_attempt,
        attempts::abandon_attempt,
        attempts::get_results,
        resume::resume_redirect,
        late_codes::generate_late_code,
        late_codes::validate_late_code,
        late_codes::list_late_codes,
        late_codes::deactivate_late_code,
    ),
    components(schemas(
        StartAttemptRequest,
        ResumeAttemptRequest,
        AnswerPayload,
        SaveAnswerRequest,
        AntiCheatEventRequest,
        SubmitAttemptRequest,
        ResumeRedirectRequest,
        GenerateLateCodeRequest,
        ValidateLateCodeRequest,
    )),
    tags(
        (name = "attempts", description = "Timed exam attempts"),
        (name = "late-codes", description = "Late access codes")
    )
)]
pub struct ApiDoc;

/// Assembles the main application router.
///
/// * Attempt routes require a valid bearer token.
/// * Late-code management is staff only; validation is rate limited per IP.
/// * Applies global middleware (Trace, CORS) and serves the OpenAPI document.
pub fn create_router(state: AppState) -> Router {
    let frontend_origin = state
        .config
        .frontend_url
        .origin()
        .ascii_serialization();
    let origins: Vec<HeaderValue> = [
        frontend_origin.as_str(),
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let attempt_routes = Router::new()
        .route("/start", post(attempts::start_attempt))
        .route("/answer", post(attempts::save_answer))
        .route("/{id}", get(attempts::get_attempt))
        .route("/{id}/resume", post(attempts::resume_attempt))
        .route(
            "/{id}/anti-cheat-event",
            post(attempts::record_anti_cheat_event),
        )
        .route("/{id}/submit", post(attempts::submit_attempt))
        .route("/{id}/abandon", post(attempts::abandon_attempt))
        .route("/{id}/results", get(attempts::get_results))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let mut validate_routes =
        Router::new().route("/validate", post(late_codes::validate_late_code));

    let rate = state.config.late_code_rate;
    if rate.is_enabled() {
        match GovernorConfigBuilder::default()
            .per_second(rate.per_second)
            .burst_size(rate.burst)
            .finish()
        {
            Some(governor_conf) => {
                validate_routes = validate_routes.layer(GovernorLayer::new(Arc::new(governor_conf)));
            }
            None => tracing::warn!("Invalid late code rate limit {:?}, not applied", rate),
        }
    }

    let late_code_routes = Router::new()
        .merge(validate_routes)
        .merge(
            Router::new()
                .route("/generate", post(late_codes::generate_late_code))
                .route("/", get(late_codes::list_late_codes))
                .route("/{id}/deactivate", post(late_codes::deactivate_late_code))
                .layer(middleware::from_fn(staff_middleware)),
        )
        // Auth runs first, then the staff check
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let resume_routes = Router::new()
        .route("/", post(resume::resume_redirect))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            optional_auth_middleware,
        ));

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/attempts", attempt_routes)
        .nest("/api/late-codes", late_code_routes)
        .nest("/api/resume", resume_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
