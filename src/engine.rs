use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::BackendConfig;
use crate::error::InferenceError;
use crate::types::{GenerateResponse, PromptRequest};

/// 统一的推理抽象：一次请求，一次完整响应，不重试
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn infer(&self, model: &str, prompt: &str) -> Result<String, InferenceError>;
}

/// 通过 HTTP 调用本地推理服务（Ollama `/api/generate` 协议）
pub struct OllamaEngine {
    http: Client,
    endpoint: String,
}

impl OllamaEngine {
    pub fn new(cfg: &BackendConfig) -> Result<Arc<Self>, InferenceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| InferenceError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Arc::new(Self {
            http,
            endpoint: cfg.endpoint_url(),
        }))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl InferenceEngine for OllamaEngine {
    async fn infer(&self, model: &str, prompt: &str) -> Result<String, InferenceError> {
        let body = PromptRequest::new(model, prompt);
        debug!(
            target = "inference",
            endpoint = %self.endpoint,
            model,
            prompt_len = prompt.len(),
            "POST generate"
        );

        let resp = self.http.post(&self.endpoint).json(&body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(InferenceError::HttpStatus(status.as_u16()));
        }

        // 答案原样返回，不做任何修剪
        let parsed: GenerateResponse = resp.json().await?;
        Ok(parsed.response)
    }
}
