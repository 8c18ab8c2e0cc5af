pub mod manager;
pub mod public;
pub mod student;

use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;
use utoipa::OpenApi;

use crate::{config::Config, error::Error, store::SqliteStore};

/// Shared handler state. The store handle is cloned into every request.
pub struct AppState {
    pub store: SqliteStore,
    pub config: Config,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Configuration(_) => StatusCode::CONFLICT,
            Error::InvalidQuestionReference { .. } | Error::InvalidSubmission(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::StyleNotAssigned(_) | Error::SectionLocked(_) => StatusCode::FORBIDDEN,
            Error::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::SubmissionTimedOut => StatusCode::GATEWAY_TIMEOUT,
            Error::InconsistentAttemptState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if !self.is_recoverable() {
            error!("request failed: {}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(paths(
    student::style_assessment,
    student::enroll,
    student::unenroll,
    student::next_sections,
    student::progress,
    student::section_content,
    student::complete_section,
    student::submit_attempt,
    manager::rescore_attempt,
    public::list_courses,
    public::list_styles,
))]
pub struct ApiDoc;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(student::get_student_scope())
                .merge(manager::get_manager_scope())
                .merge(public::get_public_scope()),
        )
        .with_state(state)
}
