//! `POST /api/workflow/request-release`, `POST /api/workflow/authorize`
//! (spec.md §6). A reject endpoint is exposed alongside them even though
//! spec.md's external-interface table omits it, since C8 names REJECT as a
//! first-class transition and the UI needs a route to reach it.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub settlement_id: String,
    pub settlement_version: i64,
    pub user_id: String,
    pub user_name: String,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub status: &'static str,
}

pub async fn request_release(
    State(state): State<AppState>,
    Json(req): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>> {
    state
        .workflow
        .request_release(
            &req.settlement_id,
            req.settlement_version,
            &req.user_id,
            &req.user_name,
            req.comment.as_deref(),
        )
        .await?;
    Ok(Json(WorkflowResponse { status: "PENDING_AUTHORISE" }))
}

pub async fn authorize(
    State(state): State<AppState>,
    Json(req): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>> {
    state
        .workflow
        .authorize(
            &req.settlement_id,
            req.settlement_version,
            &req.user_id,
            &req.user_name,
            req.comment.as_deref(),
        )
        .await?;
    Ok(Json(WorkflowResponse { status: "AUTHORISED" }))
}

pub async fn reject(
    State(state): State<AppState>,
    Json(req): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>> {
    state
        .workflow
        .reject(
            &req.settlement_id,
            req.settlement_version,
            &req.user_id,
            &req.user_name,
            req.comment.as_deref(),
        )
        .await?;
    Ok(Json(WorkflowResponse { status: "REJECTED" }))
}
