use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 11434;
pub const DEFAULT_PATH: &str = "/api/generate";
pub const DEFAULT_MODEL: &str = "phi3";

/// 推理后端的地址和模型，启动时确定，之后不变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub model: String,
    /// None = 不设超时，后端卡住就一直等
    pub request_timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: DEFAULT_PATH.to_string(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: None,
        }
    }
}

impl BackendConfig {
    /// 从环境变量读取，未设置的项用默认值
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());
        let defaults = Self::default();

        let port = match get("INFERENCE_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("INFERENCE_PORT `{}` is not a valid port", v))?,
            None => defaults.port,
        };

        let request_timeout = match get("INFERENCE_TIMEOUT_MS") {
            Some(v) => {
                let ms = v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("INFERENCE_TIMEOUT_MS `{}` is not a number", v))?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
            None => None,
        };

        // 空白的模型名等同于未设置
        let model = get("INFERENCE_MODEL")
            .map(|m| m.trim().to_string())
            .unwrap_or(defaults.model);

        Ok(Self {
            host: get("INFERENCE_HOST").unwrap_or(defaults.host),
            port,
            path: get("INFERENCE_PATH").unwrap_or(defaults.path),
            model,
            request_timeout,
        })
    }

    pub fn endpoint_url(&self) -> String {
        let path = self.path.trim();
        if path.starts_with('/') {
            format!("http://{}:{}{}", self.host, self.port, path)
        } else {
            format!("http://{}:{}/{}", self.host, self.port, path)
        }
    }
}

/// 剪贴板命令：程序 + 参数，文本从 stdin 写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardConfig {
    pub command: Option<(PathBuf, Vec<String>)>,
}

impl ClipboardConfig {
    pub fn from_env() -> Self {
        let command = env::var("CLIPBOARD_COMMAND")
            .ok()
            .and_then(|v| parse_command(&v))
            .or_else(detect_command);
        Self { command }
    }
}

fn parse_command(raw: &str) -> Option<(PathBuf, Vec<String>)> {
    let mut parts = raw.split_whitespace();
    let program = parts.next()?;
    Some((PathBuf::from(program), parts.map(|s| s.to_string()).collect()))
}

// 依次尝试常见的系统剪贴板工具
fn detect_command() -> Option<(PathBuf, Vec<String>)> {
    const CANDIDATES: &[&str] = &["wl-copy", "xclip -selection clipboard", "pbcopy"];

    CANDIDATES.iter().find_map(|candidate| {
        let (program, args) = parse_command(candidate)?;
        let found = find_in_path(&program)?;
        Some((found, args))
    })
}

fn find_in_path(program: &Path) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
