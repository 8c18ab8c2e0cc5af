use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};

use super::AppState;
use crate::{
    error::Result,
    progression::scorer::{self, AttemptOutcome},
    store::AttemptId,
};

#[utoipa::path(
    context_path = "/api",
    path = "/manager/attempts/{attempt_id}/rescore",
    method(post),
    params(("attempt_id" = i64, Path, description = "Attempt to re-grade")),
    responses(
        (status = 200, description = "Attempt graded against the current answer key", body = AttemptOutcome),
        (status = 404, description = "Unknown attempt"),
        (status = 500, description = "Attempt details do not match the unit")
    )
)]
pub async fn rescore_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<AttemptId>,
) -> Result<Json<AttemptOutcome>> {
    // answer keys may have been edited since the content was cached
    state.store.invalidate_content();
    let outcome = scorer::rescore_attempt(&state.store, attempt_id).await?;
    Ok(Json(outcome))
}

pub fn get_manager_scope() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/manager",
        Router::new().route("/attempts/{attempt_id}/rescore", post(rescore_attempt)),
    )
}
