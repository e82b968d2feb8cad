pub mod local;
pub mod s3;
pub mod webdav;

use crate::config::{StorageConfig, StorageType};
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use webdav::WebDavStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 文件名（不含目录）
    pub name: String,
    /// 相对存储根目录的路径
    pub path: String,
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 字节流，用于大文件上传
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// 存储抽象接口
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出目录下的直接子项（不递归）
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>>;

    /// 获取文件元数据
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 写入整个文件
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 流式写入（用于大文件）
    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
    ) -> Result<()> {
        // 默认实现：收集所有数据后写入
        use futures::StreamExt;
        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend(chunk?);
        }
        self.write(path, data).await
    }

    /// 删除文件或目录
    async fn delete(&self, path: &str) -> Result<()>;

    /// 检查文件是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 创建目录（含父目录）
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 拼接存储内路径，统一使用 `/`
pub fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.replace('\\', "/");
    let dir = dir.trim_matches('/');
    let name = name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 规范化目录路径为 opendal 需要的 `dir/` 形式，根目录为空串
pub(crate) fn dir_path(dir: Option<&str>) -> String {
    let dir = dir.unwrap_or("").replace('\\', "/");
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    }
}

/// 读取必填字段，空白视为缺失
fn required<'a>(config: &'a StorageConfig, value: &'a Option<String>, field: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} 缺少字段 {}", config.display_name(), field))
}

/// 根据任务的目标配置创建存储实例
pub async fn create_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config.typ {
        StorageType::Local => {
            let path = required(config, &config.path, "path")?;
            tracing::debug!("打开共享挂载点: {}", path);
            Arc::new(LocalStorage::new(path)?)
        }
        StorageType::S3 => {
            let bucket = required(config, &config.bucket, "bucket")?;
            let region = required(config, &config.region, "region")?;
            tracing::debug!("连接 S3: bucket={}, region={}", bucket, region);
            Arc::new(
                S3Storage::new(
                    bucket,
                    region,
                    required(config, &config.access_key, "accessKey")?,
                    required(config, &config.secret_key, "secretKey")?,
                    config.endpoint.clone(),
                    config.prefix.clone(),
                )
                .await?,
            )
        }
        StorageType::WebDav => {
            let endpoint = required(config, &config.endpoint, "endpoint")?;
            tracing::debug!("连接 WebDAV: {} (root={:?})", endpoint, config.root);
            Arc::new(
                WebDavStorage::new(
                    endpoint,
                    required(config, &config.username, "username")?,
                    required(config, &config.password, "password")?,
                    config.root.clone(),
                )
                .await?,
            )
        }
    };
    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("Music/Run", "a.mp3"), "Music/Run/a.mp3");
        assert_eq!(join_path("/Music\\Run/", "a.mp3"), "Music/Run/a.mp3");
        assert_eq!(join_path("", "a.mp3"), "a.mp3");
    }

    #[test]
    fn test_dir_path() {
        assert_eq!(dir_path(None), "");
        assert_eq!(dir_path(Some("/")), "");
        assert_eq!(dir_path(Some("Music/Run")), "Music/Run/");
    }
}
