use serde::{Deserialize, Serialize};

use crate::session::Phase;

// ---- 推理后端的 wire 格式 ----

/// POST 到推理后端的请求体。`stream` 固定为 false：只要一次完整响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl PromptRequest {
    pub fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
        }
    }
}

/// 后端响应里我们只关心 `response` 字段，其余忽略
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

// ---- 对外 HTTP 接口的 DTO ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfoResponse {
    pub model: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub phase: Phase,
    pub prompt: Option<String>,
    pub response: String,
    pub error: Option<String>,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyResponse {
    pub ok: bool,
    pub message: String,
}
