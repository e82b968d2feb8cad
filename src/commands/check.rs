//! check 命令 - 检查播放列表和目标存储是否可用

use super::output::{get_formatter, OutputFormat};
use super::select_jobs;
use crate::config::{AppConfig, JobConfig};
use crate::core::{ItemFetcher, RemotePublisher, StoragePublisher, YtDlpFetcher};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::info;

/// 预览的条目数
const PREVIEW_ITEMS: usize = 3;

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// 只检查第 N 个任务
    #[arg(long)]
    pub job: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobCheck {
    index: usize,
    description: String,
    source_ok: bool,
    item_count: usize,
    preview: Vec<String>,
    destination_ok: bool,
    errors: Vec<String>,
}

impl JobCheck {
    fn passed(&self) -> bool {
        self.source_ok && self.destination_ok
    }
}

impl CheckCommand {
    /// 全部通过返回 0，否则返回 1
    pub async fn execute(&self, config: &AppConfig, format: OutputFormat) -> Result<i32> {
        let formatter = get_formatter(format);
        let fetcher = YtDlpFetcher::new(&config.download.yt_dlp_path);

        let mut checks = Vec::new();
        for (index, job) in select_jobs(config, self.job)? {
            checks.push(check_job(index, job, &fetcher).await);
        }

        let all_passed = checks.iter().all(JobCheck::passed);

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::json!({
                "passed": all_passed,
                "jobs": checks,
            }));
        } else {
            for check in &checks {
                let line = format!("[{}] {}", check.index, check.description);
                if check.passed() {
                    formatter.success(&line);
                } else {
                    formatter.error(&line);
                }
                formatter.info(&format!("播放列表: {} 个条目", check.item_count));
                for title in &check.preview {
                    formatter.info(&format!("  - {}", title));
                }
                formatter.info(&format!(
                    "目标存储: {}",
                    if check.destination_ok { "可访问" } else { "不可访问" }
                ));
                for error in &check.errors {
                    formatter.info(error);
                }
            }
        }

        Ok(if all_passed { 0 } else { 1 })
    }
}

async fn check_job(index: usize, job: &JobConfig, fetcher: &dyn ItemFetcher) -> JobCheck {
    info!("检查任务 {}: {}", index, job.label());
    let mut check = JobCheck {
        index,
        description: job.label().to_string(),
        source_ok: false,
        item_count: 0,
        preview: Vec::new(),
        destination_ok: false,
        errors: Vec::new(),
    };

    match fetcher.fetch(&job.url).await {
        Ok(items) if items.is_empty() => check.errors.push("播放列表为空".to_string()),
        Ok(items) => {
            check.source_ok = true;
            check.item_count = items.len();
            check.preview = items
                .iter()
                .take(PREVIEW_ITEMS)
                .map(|item| item.title.clone())
                .collect();
        }
        Err(e) => check.errors.push(format!("播放列表不可用: {:#}", e)),
    }

    let mut publisher = StoragePublisher::new();
    match publisher.connect(&job.destination, &job.folder).await {
        Ok(()) => check.destination_ok = true,
        Err(e) => check.errors.push(format!(
            "无法连接 {}: {:#}",
            job.destination.display_name(),
            e
        )),
    }
    publisher.disconnect().await;

    check
}
