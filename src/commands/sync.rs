//! sync 命令 - 运行同步任务

use super::output::{get_formatter, OutputFormat, OutputFormatter};
use super::select_jobs;
use crate::config::AppConfig;
use crate::core::{
    JobReport, JobStatus, Ledger, StoragePublisher, SyncEngine, SyncOptions, SyncReport,
    YtDlpFetcher, YtDlpRetriever,
};
use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// 只运行第 N 个任务（从 1 开始）
    #[arg(long)]
    pub job: Option<usize>,

    /// 只列出待传输的条目，不下载、不上传、不写记录
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncCommand {
    /// 返回进程退出码：有失败时为 2
    pub async fn execute(&self, config: &AppConfig, format: OutputFormat) -> Result<i32> {
        let formatter = get_formatter(format);
        let jobs = select_jobs(config, self.job)?;

        let mut engine = SyncEngine::new(
            SyncOptions::from_config(&config.download, self.dry_run),
            Ledger::load(&config.ledger.path),
            Box::new(YtDlpFetcher::new(&config.download.yt_dlp_path)),
            Box::new(YtDlpRetriever::new(&config.download)),
            Box::new(StoragePublisher::new()),
        );

        let report = engine.run_all(jobs).await;

        if format == OutputFormat::Json {
            formatter.print_json(&serde_json::to_value(&report)?);
        } else {
            print_summary(&report, &*formatter);
        }

        Ok(if report.has_failures() { 2 } else { 0 })
    }
}

fn status_text(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => "完成",
        JobStatus::CompletedWithErrors => "部分失败",
        JobStatus::Empty => "播放列表为空",
        JobStatus::SourceUnavailable => "播放列表不可用",
        JobStatus::DestinationUnreachable => "目标存储不可达",
        JobStatus::Aborted => "异常终止",
    }
}

fn job_line(job: &JobReport) -> String {
    format!(
        "[{}] {} -> {}: {}, 发现 {}, 尝试 {}, 新增 {}, 失败 {}, 跳过 {}",
        job.index,
        job.description,
        job.folder,
        status_text(job.status),
        job.discovered,
        job.attempted,
        job.recorded,
        job.failed,
        job.skipped
    )
}

fn print_summary(report: &SyncReport, formatter: &dyn OutputFormatter) {
    let title = if report.dry_run { "预演完成" } else { "同步完成" };
    formatter.success(&format!(
        "{} (耗时 {:.1} 秒)",
        title,
        report.duration as f64 / 1000.0
    ));

    for job in &report.jobs {
        formatter.info(&job_line(job));
        if let Some(built) = job.manifest_built {
            formatter.info(&format!("    播放列表: {}", if built { "已生成" } else { "生成失败" }));
        }
        for error in &job.errors {
            formatter.info(&format!("    {}", error));
        }
    }

    let verb = if report.dry_run { "待传输" } else { "新增" };
    formatter.info(&format!(
        "合计: 发现 {}, {} {}, 失败 {}",
        report.discovered,
        verb,
        if report.dry_run { report.attempted } else { report.recorded },
        report.failed
    ));

    if report.nothing_recorded() && !report.dry_run {
        formatter.warn("本次运行没有新增任何条目");
    }
}
