use std::sync::Arc;

use crate::clipboard::{Clipboard, CommandClipboard};
use crate::config::{BackendConfig, ClipboardConfig};
use crate::engine::{InferenceEngine, OllamaEngine};
use crate::error::InferenceError;
use crate::orchestrator::Orchestrator;

/// 全局共享状态：
/// - orchestrator: 持有唯一的会话槽位
/// - clipboard: 复制最终回答用
/// - endpoint: 推理后端地址，只用于展示
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub clipboard: Arc<dyn Clipboard>,
    pub endpoint: String,
}

impl AppState {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        clipboard: Arc<dyn Clipboard>,
        model: &str,
        endpoint: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            orchestrator: Orchestrator::new(engine, model),
            clipboard,
            endpoint: endpoint.to_string(),
        })
    }

    /// 按配置装配真实的 HTTP 引擎和系统剪贴板
    pub fn from_config(
        backend: &BackendConfig,
        clipboard: &ClipboardConfig,
    ) -> Result<Arc<Self>, InferenceError> {
        let engine = OllamaEngine::new(backend)?;
        let endpoint = engine.endpoint().to_string();
        Ok(Self::new(
            engine,
            Arc::new(CommandClipboard::new(clipboard)),
            &backend.model,
            &endpoint,
        ))
    }

    pub fn model(&self) -> &str {
        self.orchestrator.model()
    }
}
