use thiserror::Error;

/// 一次推理调用可能出现的失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InferenceError {
    /// 连接失败 / 超时 / DNS / 响应体解析失败：拿不到可用的状态码或答案
    #[error("transport error: {0}")]
    Transport(String),

    /// 后端有响应，但状态码不是 2xx
    #[error("backend returned HTTP {0}")]
    HttpStatus(u16),

    /// 第二阶段返回了空答案
    #[error("backend returned an empty answer")]
    EmptyAnswer,
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => InferenceError::HttpStatus(status.as_u16()),
            None => InferenceError::Transport(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("nothing to copy")]
    NothingToCopy,

    #[error("no clipboard command available")]
    Unavailable,

    #[error("failed to run clipboard command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("clipboard command exited with {0}")]
    Failed(String),
}
