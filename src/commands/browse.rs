//! browse 命令 - 列出目标文件夹内容

use super::output::{get_formatter, OutputFormat};
use super::select_jobs;
use crate::config::AppConfig;
use crate::storage::{self, FileInfo};
use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct BrowseCommand {
    /// 只浏览第 N 个任务的目标文件夹
    #[arg(long)]
    pub job: Option<usize>,
}

impl BrowseCommand {
    pub async fn execute(&self, config: &AppConfig, format: OutputFormat) -> Result<i32> {
        let formatter = get_formatter(format);
        let mut listings = Vec::new();
        let mut exit_code = 0;

        for (index, job) in select_jobs(config, self.job)? {
            let files = match list_folder(&job.destination, &job.folder).await {
                Ok(files) => files,
                Err(e) => {
                    formatter.error(&format!("[{}] {}: {:#}", index, job.folder, e));
                    exit_code = 1;
                    continue;
                }
            };

            formatter.success(&format!(
                "[{}] {} {} ({} 项)",
                index,
                job.destination.display_name(),
                job.folder,
                files.len()
            ));
            for file in &files {
                if file.is_dir {
                    formatter.info(&format!("[目录] {}/", file.name));
                } else {
                    formatter.info(&format!("{}  ({})", file.name, format_size(file.size)));
                }
            }

            listings.push(serde_json::json!({
                "index": index,
                "folder": job.folder,
                "entries": files,
            }));
        }

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::Value::Array(listings));
        }
        Ok(exit_code)
    }
}

async fn list_folder(
    destination: &crate::config::StorageConfig,
    folder: &str,
) -> Result<Vec<FileInfo>> {
    let storage = storage::create_storage(destination).await?;
    let mut files = storage.list_files(Some(folder)).await?;
    files.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
