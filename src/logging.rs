//! 日志模块 - 提供文件日志和大小管理功能

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "playlistsync.log";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用文件日志
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志目录，未设置时使用数据目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    /// 从配置文件中读取 `log` 节
    ///
    /// 在完整解析配置之前调用，这样配置错误本身也能写进日志。读取失败时使用默认值。
    pub fn load(config_file: &Path) -> Self {
        fs::read_to_string(config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("log").cloned())
            .and_then(|log| serde_json::from_value::<LogConfig>(log).ok())
            .unwrap_or_default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }

    /// 限制在 1-100 MB
    pub fn max_size_bytes(&self) -> u64 {
        u64::from(self.max_size_mb.clamp(1, 100)) * 1024 * 1024
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(get_log_dir)
    }
}

/// 带大小限制的日志写入器
///
/// 超过上限时当前文件重命名为 `.log.old`，只保留一个备份。
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    written: u64,
    writer: Option<BufWriter<File>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join(LOG_FILE_NAME);
        let mut writer = Self {
            file_path,
            max_size,
            written: 0,
            writer: None,
        };

        // 已有文件超过限制则先轮转
        if writer.current_len() > max_size {
            writer.rotate()?;
        } else {
            writer.open()?;
        }

        Ok(writer)
    }

    fn current_len(&self) -> u64 {
        fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0)
    }

    fn open(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.written = self.current_len();
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// 轮转日志文件
    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut w) = self.writer.take() {
            let _ = w.flush();
        }

        let backup_path = self.file_path.with_extension("log.old");
        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }
        if self.file_path.exists() {
            fs::rename(&self.file_path, &backup_path)?;
        }

        self.open()
    }
}

impl Write for SizeRotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Err(io::Error::new(io::ErrorKind::Other, "Writer not available")),
        };

        let n = writer.write(buf)?;
        writer.flush()?;
        self.written += n as u64;

        if self.written > self.max_size {
            self.rotate()?;
        }

        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

/// 获取默认日志目录（跟随数据存储位置）
pub fn get_log_dir() -> PathBuf {
    crate::dirs::data_dir().join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_log_section() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("config.json");
        fs::write(
            &config_file,
            r#"{"jobs": [], "log": {"level": "debug", "maxSizeMb": 500}}"#,
        )
        .unwrap();

        let config = LogConfig::load(&config_file);
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.max_size_bytes(), 100 * 1024 * 1024);
        assert!(config.enabled);
    }

    #[test]
    fn test_load_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("config.json");
        fs::write(&config_file, "not json").unwrap();

        let config = LogConfig::load(&config_file);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_writer_rotates_when_full() {
        let dir = TempDir::new().unwrap();
        let mut writer = SizeRotatingWriter::new(dir.path(), 16).unwrap();

        writer.write_all(b"0123456789abcdefXYZ").unwrap();
        writer.write_all(b"next").unwrap();
        writer.flush().unwrap();

        let backup = fs::read_to_string(dir.path().join("playlistsync.log.old")).unwrap();
        let current = fs::read_to_string(dir.path().join(LOG_FILE_NAME)).unwrap();
        assert_eq!(backup, "0123456789abcdefXYZ");
        assert_eq!(current, "next");
    }
}
