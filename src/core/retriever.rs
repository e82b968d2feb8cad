//! 音频获取 - 将单个条目的音频落地到本地临时路径

use crate::config::DownloadConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// 音频获取接口
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// 下载到期望路径，返回实际生成的文件路径
    async fn retrieve(&self, locator: &str, desired_path: &Path) -> Result<PathBuf>;
}

/// 基于 yt-dlp 的音频获取，转码由 yt-dlp 调用 ffmpeg 完成
pub struct YtDlpRetriever {
    program: String,
    audio_format: String,
    audio_quality: String,
    extra_args: Vec<String>,
}

impl YtDlpRetriever {
    pub fn new(config: &DownloadConfig) -> Self {
        Self {
            program: config.yt_dlp_path.clone(),
            audio_format: config.audio_format.clone(),
            audio_quality: config.audio_quality.clone(),
            extra_args: config.extra_args.clone(),
        }
    }

    /// 输出模板：去掉扩展名，由 yt-dlp 在转码后补上
    fn output_template(desired_path: &Path) -> String {
        let stem = desired_path.with_extension("");
        format!("{}.%(ext)s", stem.display())
    }

    fn expected_output(&self, desired_path: &Path) -> PathBuf {
        desired_path.with_extension(&self.audio_format)
    }
}

#[async_trait]
impl ContentRetriever for YtDlpRetriever {
    async fn retrieve(&self, locator: &str, desired_path: &Path) -> Result<PathBuf> {
        if let Some(parent) = desired_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let expected = self.expected_output(desired_path);
        info!("开始下载: {}", locator);

        let output = Command::new(&self.program)
            .args(["--format", "bestaudio/best", "--extract-audio"])
            .args(["--audio-format", &self.audio_format])
            .args(["--audio-quality", &self.audio_quality])
            .args(["--no-playlist", "--no-progress", "--no-warnings"])
            .arg("--output")
            .arg(Self::output_template(desired_path))
            .args(&self.extra_args)
            .arg(locator)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("无法启动 {}", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp 退出码 {}: {}", output.status, stderr.trim());
        }

        if !tokio::fs::try_exists(&expected).await.unwrap_or(false) {
            anyhow::bail!("下载完成但文件不存在: {}", expected.display());
        }

        debug!("文件已下载: {}", expected.display());
        Ok(expected)
    }
}
