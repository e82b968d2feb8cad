//! 应用配置模块
//!
//! 配置在进程启动时从 JSON 文件读取一次，之后以只读引用的方式传递给各组件。

use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// 已挂载的网络共享目录（如 CIFS/SMB 挂载点）
    Local,
    S3,
    WebDav,
}

/// 目标存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl StorageConfig {
    /// 用于日志的存储描述（不含凭据）
    pub fn display_name(&self) -> String {
        match self.typ {
            StorageType::Local => format!("local:{}", self.path.as_deref().unwrap_or("?")),
            StorageType::S3 => format!("s3://{}", self.bucket.as_deref().unwrap_or("?")),
            StorageType::WebDav => format!("webdav:{}", self.endpoint.as_deref().unwrap_or("?")),
        }
    }

    /// 检查必填字段，返回缺失项说明
    fn missing_fields(&self) -> Vec<&'static str> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        let required: Vec<(&'static str, &Option<String>)> = match self.typ {
            StorageType::Local => vec![("path", &self.path)],
            StorageType::S3 => vec![
                ("bucket", &self.bucket),
                ("region", &self.region),
                ("accessKey", &self.access_key),
                ("secretKey", &self.secret_key),
            ],
            StorageType::WebDav => vec![
                ("endpoint", &self.endpoint),
                ("username", &self.username),
                ("password", &self.password),
            ],
        };
        required
            .into_iter()
            .filter(|(_, v)| blank(v))
            .map(|(name, _)| name)
            .collect()
    }

    /// 将 `env:NAME` 形式的凭据替换为环境变量的值
    fn resolve_secrets(&mut self) -> Result<(), ConfigError> {
        for field in [
            &mut self.access_key,
            &mut self.secret_key,
            &mut self.username,
            &mut self.password,
        ] {
            if let Some(value) = field.as_deref() {
                *field = Some(resolve_secret(value)?);
            }
        }
        Ok(())
    }
}

fn resolve_secret(value: &str) -> Result<String, ConfigError> {
    match value.strip_prefix("env:") {
        Some(name) => std::env::var(name).map_err(|_| ConfigError::MissingEnv(name.to_string())),
        None => Ok(value.to_string()),
    }
}

/// 单个播放列表同步任务
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// 播放列表地址
    pub url: String,
    /// 目标存储中的文件夹
    pub folder: String,
    #[serde(default)]
    pub description: String,
    /// M3U 播放列表文件名（可选）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub destination: StorageConfig,
}

impl JobConfig {
    /// 已配置且非空的播放列表文件名
    pub fn manifest_name(&self) -> Option<&str> {
        self.manifest
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn label(&self) -> &str {
        if self.description.is_empty() {
            &self.url
        } else {
            &self.description
        }
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadConfig {
    /// 临时下载目录
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    /// yt-dlp 可执行文件
    #[serde(default = "default_yt_dlp")]
    pub yt_dlp_path: String,
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    #[serde(default = "default_audio_quality")]
    pub audio_quality: String,
    /// 传递给 yt-dlp 的额外参数
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_temp_dir() -> PathBuf {
    crate::dirs::cache_dir()
        .map(|p| p.join("playlistsync").join("staging"))
        .unwrap_or_else(|| PathBuf::from("temp_downloads"))
}

fn default_yt_dlp() -> String {
    "yt-dlp".to_string()
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

fn default_audio_quality() -> String {
    "192".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            yt_dlp_path: default_yt_dlp(),
            audio_format: default_audio_format(),
            audio_quality: default_audio_quality(),
            extra_args: Vec::new(),
        }
    }
}

/// 下载记录配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    crate::dirs::data_dir().join("downloaded.json")
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir()
            .map(|p| p.join("playlistsync"))
            .unwrap_or_else(|| PathBuf::from(".playlistsync"))
            .join("config.json")
    }

    /// 读取并校验配置文件
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = serde_json::from_str(content)?;
        for job in config.jobs.iter_mut().filter(|j| j.enabled) {
            job.destination.resolve_secrets()?;
        }
        config.validate()?;
        Ok(config)
    }

    /// 校验所有启用的任务，任何一项不完整都视为配置错误
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_jobs().next().is_none() {
            return Err(ConfigError::NoJobs);
        }

        for (index, job) in self.enabled_jobs() {
            let invalid = |reason: String| ConfigError::InvalidJob {
                index,
                description: job.label().to_string(),
                reason,
            };

            if job.url.trim().is_empty() {
                return Err(invalid("缺少 url".to_string()));
            }
            if job.folder.trim().is_empty() {
                return Err(invalid("缺少 folder".to_string()));
            }

            let missing = job.destination.missing_fields();
            if !missing.is_empty() {
                return Err(invalid(format!("目标存储缺少字段: {}", missing.join(", "))));
            }

            if let Some(name) = job.manifest_name() {
                if name.contains('/') || name.contains('\\') {
                    return Err(invalid(format!("播放列表文件名不能包含路径分隔符: {}", name)));
                }
            }
        }

        Ok(())
    }

    /// 启用的任务及其序号（从 1 开始）
    pub fn enabled_jobs(&self) -> impl Iterator<Item = (usize, &JobConfig)> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.enabled)
            .map(|(i, job)| (i + 1, job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_json(destination: &str) -> String {
        format!(
            r#"{{
                "jobs": [{{
                    "url": "https://www.youtube.com/playlist?list=PL1",
                    "folder": "Music/Run",
                    "description": "跑步",
                    "manifest": "Run.m3u",
                    "destination": {}
                }}]
            }}"#,
            destination
        )
    }

    #[test]
    fn test_parse_local_job_with_defaults() {
        let config =
            AppConfig::parse(&job_json(r#"{"type": "local", "path": "/mnt/share"}"#)).unwrap();

        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].manifest_name(), Some("Run.m3u"));
        assert_eq!(config.download.audio_format, "mp3");
        assert_eq!(config.download.yt_dlp_path, "yt-dlp");
        assert!(config.log.enabled);
    }

    #[test]
    fn test_missing_webdav_credentials_rejected() {
        let err = AppConfig::parse(&job_json(
            r#"{"type": "webdav", "endpoint": "https://nas.local/dav", "username": "admin"}"#,
        ))
        .unwrap_err();

        match err {
            ConfigError::InvalidJob { index, reason, .. } => {
                assert_eq!(index, 1);
                assert!(reason.contains("password"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_credentials_resolved() {
        std::env::set_var("PLAYLISTSYNC_TEST_DAV_PASSWORD", "s3cret");
        let config = AppConfig::parse(&job_json(
            r#"{"type": "webdav", "endpoint": "https://nas.local/dav",
                "username": "admin", "password": "env:PLAYLISTSYNC_TEST_DAV_PASSWORD"}"#,
        ))
        .unwrap();

        assert_eq!(config.jobs[0].destination.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_unset_env_credentials_rejected() {
        let err = AppConfig::parse(&job_json(
            r#"{"type": "webdav", "endpoint": "https://nas.local/dav",
                "username": "admin", "password": "env:PLAYLISTSYNC_TEST_UNSET_VAR"}"#,
        ))
        .unwrap_err();

        assert!(matches!(err, ConfigError::MissingEnv(name) if name == "PLAYLISTSYNC_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_no_enabled_jobs_rejected() {
        let err = AppConfig::parse(r#"{"jobs": []}"#).unwrap_err();
        assert!(matches!(err, ConfigError::NoJobs));
    }

    #[test]
    fn test_blank_manifest_name_is_ignored() {
        let mut config =
            AppConfig::parse(&job_json(r#"{"type": "local", "path": "/mnt/share"}"#)).unwrap();
        config.jobs[0].manifest = Some("   ".to_string());
        assert_eq!(config.jobs[0].manifest_name(), None);
    }
}
