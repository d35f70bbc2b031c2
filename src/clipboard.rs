use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ClipboardConfig;
use crate::error::ClipboardError;

pub const COPY_OK_MESSAGE: &str = "Response copied to clipboard!";
pub const COPY_FAILED_MESSAGE: &str = "Failed to copy to clipboard";
pub const NOTHING_TO_COPY_MESSAGE: &str = "Nothing to copy yet";

/// 系统剪贴板能力
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// 一次复制动作的短暂提示，不影响会话状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub ok: bool,
    pub message: String,
}

/// 把最终文本放进剪贴板，结果转成提示
pub async fn export(clipboard: &dyn Clipboard, final_text: &str) -> Notification {
    if final_text.is_empty() {
        debug!(target = "clipboard", "nothing to copy");
        return Notification {
            ok: false,
            message: NOTHING_TO_COPY_MESSAGE.to_string(),
        };
    }

    match clipboard.write_text(final_text).await {
        Ok(()) => {
            info!(target = "clipboard", len = final_text.len(), "response copied");
            Notification {
                ok: true,
                message: COPY_OK_MESSAGE.to_string(),
            }
        }
        Err(e) => {
            warn!(target = "clipboard", error = %e, "copy failed");
            Notification {
                ok: false,
                message: COPY_FAILED_MESSAGE.to_string(),
            }
        }
    }
}

/// 通过外部命令（wl-copy / xclip / pbcopy ...）写剪贴板，文本走 stdin
pub struct CommandClipboard {
    command: Option<(PathBuf, Vec<String>)>,
}

impl CommandClipboard {
    pub fn new(cfg: &ClipboardConfig) -> Self {
        Self {
            command: cfg.command.clone(),
        }
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let (program, args) = self.command.as_ref().ok_or(ClipboardError::Unavailable)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        debug!(target = "clipboard", command = ?cmd, "running clipboard command");
        let mut child = cmd.spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
            // 关掉 stdin，命令才会结束
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ClipboardError::Failed(format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// 进程内剪贴板，没有系统剪贴板时（或测试里）使用
#[derive(Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}
