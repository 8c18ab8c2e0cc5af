use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use super::AppState;
use crate::{course::Course, error::Result, store::ContentRepository, student::LearningStyle};

#[utoipa::path(
    context_path = "/api",
    path = "/public/courses",
    method(get),
    responses(
        (status = 200, description = "All courses", body = Vec<Course>)
    )
)]
pub async fn list_courses(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Course>>> {
    Ok(Json(state.store.list_courses().await?))
}

#[utoipa::path(
    context_path = "/api",
    path = "/public/styles",
    method(get),
    responses(
        (status = 200, description = "Learning styles a student can be assessed into", body = Vec<LearningStyle>)
    )
)]
pub async fn list_styles(State(state): State<Arc<AppState>>) -> Result<Json<Vec<LearningStyle>>> {
    Ok(Json(state.store.list_styles().await?))
}

pub fn get_public_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/public",
        Router::new()
            .route("/courses", get(list_courses))
            .route("/styles", get(list_styles)),
    )
}
