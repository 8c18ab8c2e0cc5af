use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::AppState;
use crate::{
    course::{CourseId, SectionId, UnitId},
    error::{Error, Result},
    progression::{
        self,
        aggregator::{ProgressReport, progress_report},
        gate::{GateDecision, ensure_section_accessible, evaluate_gate},
        scorer::{self, AttemptOutcome, SubmittedAnswer},
        style::ResolvedSection,
    },
    store::ContentRepository,
    student::{self as students, Enrollment, LearningStyle, StudentId, StyleId},
};

#[derive(Deserialize, ToSchema)]
pub struct StyleAssessmentRequest {
    /// One learning style id per assessment answer.
    pub votes: Vec<StyleId>,
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/style_assessment",
    method(post),
    params(("student_id" = i64, Path, description = "Student being assessed")),
    request_body = StyleAssessmentRequest,
    responses(
        (status = 200, description = "Assigned learning style", body = LearningStyle),
        (status = 400, description = "Empty assessment or unknown style"),
        (status = 404, description = "Unknown student")
    )
)]
pub async fn style_assessment(
    State(state): State<Arc<AppState>>,
    Path(student_id): Path<StudentId>,
    Json(req): Json<StyleAssessmentRequest>,
) -> Result<Json<LearningStyle>> {
    let style = students::assess_learning_style(&state.store, student_id, &req.votes).await?;
    Ok(Json(style))
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/courses/{course_id}/enroll",
    method(post),
    params(
        ("student_id" = i64, Path, description = "Student to enroll"),
        ("course_id" = i64, Path, description = "Course to enroll in")
    ),
    responses(
        (status = 200, description = "Enrollment, existing or new", body = Enrollment),
        (status = 404, description = "Unknown student or course")
    )
)]
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Path((student_id, course_id)): Path<(StudentId, CourseId)>,
) -> Result<Json<Enrollment>> {
    let enrollment = students::enroll(&state.store, student_id, course_id).await?;
    Ok(Json(enrollment))
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/courses/{course_id}/unenroll",
    method(post),
    params(
        ("student_id" = i64, Path, description = "Enrolled student"),
        ("course_id" = i64, Path, description = "Course to leave")
    ),
    responses(
        (status = 200, description = "Enrollment and all course progress removed"),
        (status = 404, description = "Not enrolled")
    )
)]
pub async fn unenroll(
    State(state): State<Arc<AppState>>,
    Path((student_id, course_id)): Path<(StudentId, CourseId)>,
) -> Result<Json<&'static str>> {
    students::unenroll(&state.store, student_id, course_id).await?;
    Ok(Json("Unenrolled successfully"))
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/courses/{course_id}/next_sections",
    method(get),
    params(
        ("student_id" = i64, Path, description = "Student"),
        ("course_id" = i64, Path, description = "Course")
    ),
    responses(
        (status = 200, description = "Gate state and the sections unlocked now", body = GateDecision),
        (status = 404, description = "Unknown student or course"),
        (status = 503, description = "Store unavailable, nothing unlocked")
    )
)]
pub async fn next_sections(
    State(state): State<Arc<AppState>>,
    Path((student_id, course_id)): Path<(StudentId, CourseId)>,
) -> Result<Json<GateDecision>> {
    let decision = evaluate_gate(&state.store, student_id, course_id).await?;
    Ok(Json(decision))
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/courses/{course_id}/progress",
    method(get),
    params(
        ("student_id" = i64, Path, description = "Student"),
        ("course_id" = i64, Path, description = "Course")
    ),
    responses(
        (status = 200, description = "Course percentage with per-section breakdown", body = ProgressReport),
        (status = 404, description = "Unknown student or course")
    )
)]
pub async fn progress(
    State(state): State<Arc<AppState>>,
    Path((student_id, course_id)): Path<(StudentId, CourseId)>,
) -> Result<Json<ProgressReport>> {
    let report = progress_report(&state.store, student_id, course_id).await?;
    Ok(Json(report))
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/sections/{section_id}/content",
    method(get),
    params(
        ("student_id" = i64, Path, description = "Student"),
        ("section_id" = i64, Path, description = "Section to open")
    ),
    responses(
        (status = 200, description = "Content resolved for the student's style", body = ResolvedSection),
        (status = 403, description = "Section locked or style not assessed"),
        (status = 404, description = "Unknown student or section")
    )
)]
pub async fn section_content(
    State(state): State<Arc<AppState>>,
    Path((student_id, section_id)): Path<(StudentId, SectionId)>,
) -> Result<Json<ResolvedSection>> {
    let resolved = progression::visible_section_content(
        &state.store,
        student_id,
        section_id,
        state.config.unassigned_style_policy,
    )
    .await?;
    Ok(Json(resolved))
}

#[derive(Serialize, ToSchema)]
pub struct CompletionResponse {
    pub percentage: u8,
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/sections/{section_id}/complete",
    method(post),
    params(
        ("student_id" = i64, Path, description = "Student"),
        ("section_id" = i64, Path, description = "Learn section finished")
    ),
    responses(
        (status = 200, description = "Updated course percentage", body = CompletionResponse),
        (status = 400, description = "Not a learn section"),
        (status = 403, description = "Section locked"),
        (status = 404, description = "Not enrolled in the section's course")
    )
)]
pub async fn complete_section(
    State(state): State<Arc<AppState>>,
    Path((student_id, section_id)): Path<(StudentId, SectionId)>,
) -> Result<Json<CompletionResponse>> {
    let percentage =
        progression::complete_learn_section(&state.store, student_id, section_id).await?;
    Ok(Json(CompletionResponse { percentage }))
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitAttemptRequest {
    pub answers: Vec<SubmittedAnswer>,
}

#[utoipa::path(
    context_path = "/api",
    path = "/student/{student_id}/units/{unit_id}/attempts",
    method(post),
    params(
        ("student_id" = i64, Path, description = "Student"),
        ("unit_id" = i64, Path, description = "Test or quiz unit attempted")
    ),
    request_body = SubmitAttemptRequest,
    responses(
        (status = 200, description = "Attempt recorded", body = AttemptOutcome),
        (status = 400, description = "Empty, malformed or foreign answers"),
        (status = 403, description = "Section locked"),
        (status = 404, description = "Unknown unit or not enrolled in its course"),
        (status = 503, description = "Store unavailable, nothing recorded"),
        (status = 504, description = "Timed out, nothing recorded")
    )
)]
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Path((student_id, unit_id)): Path<(StudentId, UnitId)>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<Json<AttemptOutcome>> {
    let unit = state
        .store
        .fetch_unit(unit_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("unit {unit_id}")))?;
    ensure_section_accessible(&state.store, student_id, unit.section_id).await?;
    let outcome = scorer::submit_attempt(
        &state.store,
        student_id,
        unit_id,
        &req.answers,
        state.config.submission_timeout(),
    )
    .await?;
    Ok(Json(outcome))
}

pub fn get_student_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/student",
        Router::new()
            .route("/{student_id}/style_assessment", post(style_assessment))
            .route("/{student_id}/courses/{course_id}/enroll", post(enroll))
            .route("/{student_id}/courses/{course_id}/unenroll", post(unenroll))
            .route(
                "/{student_id}/courses/{course_id}/next_sections",
                get(next_sections),
            )
            .route("/{student_id}/courses/{course_id}/progress", get(progress))
            .route(
                "/{student_id}/sections/{section_id}/content",
                get(section_content),
            )
            .route(
                "/{student_id}/sections/{section_id}/complete",
                post(complete_section),
            )
            .route("/{student_id}/units/{unit_id}/attempts", post(submit_attempt)),
    )
}
