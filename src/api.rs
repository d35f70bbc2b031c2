use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, State};

use crate::app_state::AppState;
use crate::clipboard;
use crate::orchestrator::{failure_message, SubmitOutcome};
use crate::types::{
    CopyResponse,
    HealthResponse,
    ModelInfoResponse,
    SessionResponse,
    SubmitRequest,
    SubmitResponse,
};

#[get("/health")]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[get("/model")]
pub async fn model_info(state: &State<Arc<AppState>>) -> Json<ModelInfoResponse> {
    Json(ModelInfoResponse {
        model: state.model().to_string(),
        endpoint: state.endpoint.clone(),
    })
}

#[post("/submit", data = "<req>")]
pub async fn submit(
    state: &State<Arc<AppState>>,
    req: Json<SubmitRequest>,
) -> (Status, Json<SubmitResponse>) {
    // 处理中时拒绝再次提交；管线在后台任务里跑
    let (status, accepted, message) = match state.orchestrator.try_spawn_submit(&req.prompt) {
        SubmitOutcome::Started => (Status::Accepted, true, "processing"),
        SubmitOutcome::EmptyPrompt => (Status::BadRequest, false, "prompt must not be empty"),
        SubmitOutcome::Busy => (Status::Conflict, false, "a submission is already in progress"),
    };

    (
        status,
        Json(SubmitResponse {
            accepted,
            message: message.to_string(),
        }),
    )
}

#[get("/session")]
pub async fn session(state: &State<Arc<AppState>>) -> Json<SessionResponse> {
    let snap = state.orchestrator.snapshot();

    // 原始错误不出现在响应里，只给统一提示
    let error = snap
        .last_error
        .as_ref()
        .map(|_| failure_message(state.model()));

    Json(SessionResponse {
        phase: snap.phase,
        prompt: snap.prompt,
        response: snap.final_text,
        error,
        busy: snap.phase.is_in_flight(),
    })
}

#[post("/copy")]
pub async fn copy(state: &State<Arc<AppState>>) -> Json<CopyResponse> {
    let final_text = state.orchestrator.snapshot().final_text;
    let note = clipboard::export(state.clipboard.as_ref(), &final_text).await;

    Json(CopyResponse {
        ok: note.ok,
        message: note.message,
    })
}
