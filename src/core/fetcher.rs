//! 播放列表条目获取

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// 播放列表中的一个条目，获取后不再变化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemDescriptor {
    /// 来源分配的唯一标识，也是下载记录的键
    pub id: String,
    pub title: String,
    /// 条目地址
    pub url: String,
    /// 时长（秒）
    pub duration: Option<u64>,
    /// 所属频道/上传者
    pub uploader: Option<String>,
    /// 所属播放列表名称
    pub collection: Option<String>,
}

impl ItemDescriptor {
    /// 标识和地址都存在才能处理
    pub fn is_complete(&self) -> bool {
        !self.id.trim().is_empty() && !self.url.trim().is_empty()
    }
}

/// 条目获取接口
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    /// 按来源顺序返回播放列表的全部条目
    async fn fetch(&self, source_url: &str) -> Result<Vec<ItemDescriptor>>;
}

/// `--flat-playlist --dump-json` 每行输出的条目
#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    playlist_title: Option<String>,
    #[serde(default)]
    playlist: Option<String>,
}

impl From<FlatEntry> for ItemDescriptor {
    fn from(entry: FlatEntry) -> Self {
        let id = entry.id.unwrap_or_default();
        let url = entry
            .url
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| {
                if id.is_empty() {
                    String::new()
                } else {
                    format!("https://www.youtube.com/watch?v={}", id)
                }
            });

        ItemDescriptor {
            title: entry.title.unwrap_or_else(|| id.clone()),
            id,
            url,
            duration: entry.duration.filter(|d| *d >= 0.0).map(|d| d.round() as u64),
            uploader: entry.uploader.or(entry.channel),
            collection: entry.playlist_title.or(entry.playlist),
        }
    }
}

/// 解析一行 yt-dlp JSON 输出，无法解析的行返回 None
fn parse_entry_line(line: &str) -> Option<ItemDescriptor> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<FlatEntry>(line) {
        Ok(entry) => Some(entry.into()),
        Err(e) => {
            debug!("忽略无法解析的输出行: {}", e);
            None
        }
    }
}

/// 基于 yt-dlp 的条目获取
pub struct YtDlpFetcher {
    program: String,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ItemFetcher for YtDlpFetcher {
    async fn fetch(&self, source_url: &str) -> Result<Vec<ItemDescriptor>> {
        info!("提取播放列表信息: {}", source_url);

        let mut child = Command::new(&self.program)
            .args(["--flat-playlist", "--dump-json", "--no-warnings", "--ignore-errors"])
            .arg(source_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("无法启动 {}", self.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("无法读取 yt-dlp 输出"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("无法读取 yt-dlp 错误输出"))?;

        // 并行读取 stderr，避免管道写满阻塞子进程
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = LinesStream::new(BufReader::new(stdout).lines());
        let mut items = Vec::new();
        while let Some(line) = lines.next().await {
            if let Some(item) = parse_entry_line(&line?) {
                items.push(item);
            }
        }

        let status = child.wait().await?;
        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            if items.is_empty() {
                anyhow::bail!("yt-dlp 退出码 {}: {}", status, stderr_text.trim());
            }
            // --ignore-errors 下部分条目不可用时也会返回非零
            warn!("yt-dlp 报告部分错误: {}", stderr_text.trim());
        }

        info!("找到 {} 个条目", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_entry() {
        let item = parse_entry_line(
            r#"{"_type": "url", "id": "dQw4w9WgXcQ", "title": "Song", "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "duration": 212.6, "channel": "Artist", "playlist_title": "Running Mix"}"#,
        )
        .unwrap();

        assert_eq!(item.id, "dQw4w9WgXcQ");
        assert_eq!(item.title, "Song");
        assert_eq!(item.duration, Some(213));
        assert_eq!(item.uploader.as_deref(), Some("Artist"));
        assert_eq!(item.collection.as_deref(), Some("Running Mix"));
        assert!(item.is_complete());
    }

    #[test]
    fn test_missing_url_is_built_from_id() {
        let item = parse_entry_line(r#"{"id": "abc123", "title": "T"}"#).unwrap();
        assert_eq!(item.url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(item.duration, None);
        assert_eq!(item.collection, None);
    }

    #[test]
    fn test_entry_without_id_is_incomplete() {
        let item = parse_entry_line(r#"{"title": "Deleted video"}"#).unwrap();
        assert!(!item.is_complete());
    }

    #[test]
    fn test_garbage_lines_skipped() {
        assert!(parse_entry_line("").is_none());
        assert!(parse_entry_line("WARNING: something").is_none());
    }

    #[tokio::test]
    async fn test_missing_program_is_error() {
        let fetcher = YtDlpFetcher::new("/nonexistent/yt-dlp-binary");
        assert!(fetcher.fetch("https://example.com/list").await.is_err());
    }
}
