use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    middlewares::auth::CallerIdentity,
    models::attempt::SubmitSessionRequest,
    services::{submission_service::SubmissionService, AppState, SubmitError},
};

pub async fn submit_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Extension(caller): Extension<CallerIdentity>,
    Json(req): Json<SubmitSessionRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Submission received: session={}, user={}",
        session_id,
        caller.user_id
    );

    if let Err(e) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, e.to_string()));
    }

    let service = SubmissionService::new(
        state.mongo.clone(),
        state.mongo_client.clone(),
        state.redis.clone(),
    );

    match service.submit_session(caller.user_id, session_id, &req).await {
        Ok(response) => Ok((StatusCode::OK, Json(response))),
        Err(e) => {
            if let Some(SubmitError::SessionNotFound(_)) = e.downcast_ref::<SubmitError>() {
                return Err((StatusCode::NOT_FOUND, "Session not found".to_string()));
            }
            tracing::error!("Failed to process submission: {:#}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
