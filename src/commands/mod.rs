//! 命令行子命令

pub mod browse;
pub mod check;
pub mod manifest;
pub mod output;
pub mod status;
pub mod sync;

use crate::config::{AppConfig, JobConfig};
use anyhow::Result;

/// 选出要处理的任务，`job` 为配置中的序号（从 1 开始）
pub fn select_jobs(config: &AppConfig, job: Option<usize>) -> Result<Vec<(usize, &JobConfig)>> {
    match job {
        None => Ok(config.enabled_jobs().collect()),
        Some(index) => config
            .enabled_jobs()
            .find(|(i, _)| *i == index)
            .map(|selected| vec![selected])
            .ok_or_else(|| anyhow::anyhow!("任务 {} 不存在或未启用", index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "jobs": [
            {"url": "https://example.com/a", "folder": "A", "destination": {"type": "local", "path": "/mnt/a"}},
            {"url": "https://example.com/b", "folder": "B", "enabled": false, "destination": {"type": "local", "path": "/mnt/b"}},
            {"url": "https://example.com/c", "folder": "C", "destination": {"type": "local", "path": "/mnt/c"}}
        ]
    }"#;

    #[test]
    fn test_select_all_enabled_jobs() {
        let config = AppConfig::parse(CONFIG).unwrap();
        let jobs = select_jobs(&config, None).unwrap();
        let indexes: Vec<_> = jobs.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 3]);
    }

    #[test]
    fn test_select_single_job_by_index() {
        let config = AppConfig::parse(CONFIG).unwrap();
        let jobs = select_jobs(&config, Some(3)).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].1.folder, "C");
    }

    #[test]
    fn test_disabled_or_missing_job_rejected() {
        let config = AppConfig::parse(CONFIG).unwrap();
        assert!(select_jobs(&config, Some(2)).is_err());
        assert!(select_jobs(&config, Some(9)).is_err());
    }
}
