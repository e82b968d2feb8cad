//! status 命令 - 显示下载记录

use super::output::{get_formatter, OutputFormat};
use crate::config::AppConfig;
use crate::core::Ledger;
use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(&self, config: &AppConfig, format: OutputFormat) -> Result<i32> {
        let formatter = get_formatter(format);
        let ledger = Ledger::load(&config.ledger.path);

        if format == OutputFormat::Json {
            let entries: Vec<_> = ledger
                .entries()
                .map(|(id, entry)| {
                    serde_json::json!({
                        "id": id,
                        "filePath": entry.file_path,
                        "recordedAt": entry.recorded_at.to_rfc3339(),
                    })
                })
                .collect();
            formatter.print_json(&serde_json::json!({
                "ledger": ledger.path().display().to_string(),
                "count": ledger.len(),
                "entries": entries,
            }));
            return Ok(0);
        }

        formatter.success(&format!(
            "下载记录: {} ({} 条)",
            ledger.path().display(),
            ledger.len()
        ));
        for (id, entry) in ledger.entries() {
            formatter.info(&format!(
                "{} -> {} ({})",
                id,
                entry.file_path,
                entry.recorded_at.format("%Y-%m-%d %H:%M:%S")
            ));
        }
        Ok(0)
    }
}
