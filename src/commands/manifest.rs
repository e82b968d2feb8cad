//! manifest 命令 - 只重新生成播放列表，不同步

use super::output::{get_formatter, OutputFormat};
use super::select_jobs;
use crate::config::AppConfig;
use crate::core::{ManifestBuilder, RemotePublisher, StoragePublisher};
use anyhow::Result;
use clap::Args;
use tracing::{error, info};

#[derive(Debug, Args)]
pub struct ManifestCommand {
    /// 只处理第 N 个任务
    #[arg(long)]
    pub job: Option<usize>,
}

impl ManifestCommand {
    pub async fn execute(&self, config: &AppConfig, format: OutputFormat) -> Result<i32> {
        let formatter = get_formatter(format);
        let mut results = Vec::new();

        for (index, job) in select_jobs(config, self.job)? {
            let Some(name) = job.manifest_name() else {
                info!("任务 {} 未配置播放列表，跳过", index);
                continue;
            };

            let mut publisher = StoragePublisher::new();
            let built = match publisher.connect(&job.destination, &job.folder).await {
                Ok(()) => {
                    ManifestBuilder::new(&mut publisher)
                        .build(&job.folder, name)
                        .await
                }
                Err(e) => {
                    error!("无法连接 {}: {:#}", job.destination.display_name(), e);
                    false
                }
            };
            publisher.disconnect().await;

            let line = format!("[{}] {}/{}", index, job.folder, name);
            if built {
                formatter.success(&line);
            } else {
                formatter.error(&line);
            }
            results.push(serde_json::json!({
                "index": index,
                "folder": job.folder,
                "manifest": name,
                "built": built,
            }));
        }

        if results.is_empty() {
            formatter.warn("没有任务配置播放列表文件");
        }

        let all_built = results.iter().all(|r| r["built"] == true);
        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::Value::Array(results));
        }

        Ok(if all_built { 0 } else { 1 })
    }
}
