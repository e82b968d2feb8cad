//! 远程发布 - 把本地文件传到任务的目标存储

use crate::config::StorageConfig;
use crate::core::integrity::calculate_hash;
use crate::storage::{self, join_path, Storage};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// 远程发布接口
///
/// 除 `publish` 外，路径都是相对存储根目录的完整路径。
#[async_trait]
pub trait RemotePublisher: Send {
    /// 连接目标存储，并确保任务文件夹存在
    async fn connect(&mut self, destination: &StorageConfig, folder: &str) -> Result<()>;

    /// 上传到已连接的文件夹，返回远程完整路径
    async fn publish(&mut self, local_path: &Path, remote_filename: &str) -> Result<String>;

    /// 重新读取远程文件并计算 hash
    async fn remote_checksum(&mut self, remote_path: &str) -> Result<String>;

    /// 写入小文件（播放列表）
    async fn write_remote_file(&mut self, remote_path: &str, data: Vec<u8>) -> Result<()>;

    /// 列出文件夹中的文件名（不含子目录）
    async fn list_remote_files(&mut self, folder: &str) -> Result<Vec<String>>;

    async fn delete_remote_file(&mut self, remote_path: &str) -> Result<()>;

    async fn disconnect(&mut self);
}

/// 中断的上传留下的临时文件（`.{name}.{随机串}.tmp`）
fn is_stale_upload(name: &str) -> bool {
    name.len() > ".tmp".len() + 1 && name.starts_with('.') && name.ends_with(".tmp")
}

/// 清理文件夹中残留的上传临时文件，失败只记录日志
async fn sweep_stale_uploads(storage: &dyn Storage, folder: &str) {
    let files = match storage.list_files(Some(folder)).await {
        Ok(files) => files,
        Err(e) => {
            warn!("无法检查残留的临时文件 {}: {:#}", folder, e);
            return;
        }
    };

    for file in files.iter().filter(|f| !f.is_dir && is_stale_upload(&f.name)) {
        let path = join_path(folder, &file.name);
        match storage.delete(&path).await {
            Ok(()) => info!("已删除残留的临时文件: {}", path),
            Err(e) => warn!("删除残留的临时文件失败 {}: {:#}", path, e),
        }
    }
}

/// 当前连接
struct Connection {
    storage: Arc<dyn Storage>,
    folder: String,
}

/// 基于 `Storage` 的发布实现，每个任务单独连接
#[derive(Default)]
pub struct StoragePublisher {
    connection: Option<Connection>,
}

impl StoragePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("未连接目标存储，请先调用 connect"))
    }
}

#[async_trait]
impl RemotePublisher for StoragePublisher {
    async fn connect(&mut self, destination: &StorageConfig, folder: &str) -> Result<()> {
        info!("连接目标存储: {}", destination.display_name());
        let storage = storage::create_storage(destination).await?;

        // 检测存储是否可访问
        storage.list_files(None).await?;

        if storage.exists(folder).await? {
            debug!("文件夹已存在: {}", folder);
        } else {
            storage.create_dir(folder).await?;
            info!("已创建文件夹: {}", folder);
        }
        sweep_stale_uploads(storage.as_ref(), folder).await;

        self.connection = Some(Connection {
            storage,
            folder: folder.to_string(),
        });
        Ok(())
    }

    async fn publish(&mut self, local_path: &Path, remote_filename: &str) -> Result<String> {
        let conn = self.connection()?;
        let remote_path = join_path(&conn.folder, remote_filename);

        let file = tokio::fs::File::open(local_path).await?;
        let size = file.metadata().await?.len();
        info!(
            "上传文件: {} -> {}/{} ({} 字节)",
            local_path.display(),
            conn.storage.name(),
            remote_path,
            size
        );

        let stream = ReaderStream::new(file)
            .map_ok(|chunk| chunk.to_vec())
            .map_err(anyhow::Error::from);
        conn.storage
            .write_stream(&remote_path, Box::pin(stream), Some(size))
            .await?;

        Ok(remote_path)
    }

    async fn remote_checksum(&mut self, remote_path: &str) -> Result<String> {
        let conn = self.connection()?;
        let data = conn.storage.read(remote_path).await?;
        debug!("远程文件读取完成: {} ({} 字节)", remote_path, data.len());
        Ok(calculate_hash(&data))
    }

    async fn write_remote_file(&mut self, remote_path: &str, data: Vec<u8>) -> Result<()> {
        self.connection()?.storage.write(remote_path, data).await
    }

    async fn list_remote_files(&mut self, folder: &str) -> Result<Vec<String>> {
        let files = self.connection()?.storage.list_files(Some(folder)).await?;
        Ok(files
            .into_iter()
            .filter(|f| !f.is_dir)
            .map(|f| f.name)
            .collect())
    }

    async fn delete_remote_file(&mut self, remote_path: &str) -> Result<()> {
        self.connection()?.storage.delete(remote_path).await
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = self.connection.take() {
            info!("已断开目标存储: {}", conn.storage.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageType;
    use crate::core::integrity::calculate_file_hash;
    use tempfile::TempDir;

    fn local_destination(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            typ: StorageType::Local,
            path: Some(dir.path().to_string_lossy().into_owned()),
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: None,
            username: None,
            password: None,
            root: None,
        }
    }

    #[tokio::test]
    async fn test_publish_then_verify_on_local_share() {
        let share = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let local = staging.path().join("Song.mp3");
        std::fs::write(&local, vec![7u8; 150_000]).unwrap();

        let mut publisher = StoragePublisher::new();
        publisher
            .connect(&local_destination(&share), "Music/Run")
            .await
            .unwrap();

        let remote_path = publisher.publish(&local, "Song.mp3").await.unwrap();
        assert_eq!(remote_path, "Music/Run/Song.mp3");

        let remote_hash = publisher.remote_checksum(&remote_path).await.unwrap();
        assert_eq!(remote_hash, calculate_file_hash(&local).await.unwrap());

        let files = publisher.list_remote_files("Music/Run").await.unwrap();
        assert_eq!(files, vec!["Song.mp3".to_string()]);

        publisher.delete_remote_file(&remote_path).await.unwrap();
        assert!(publisher.list_remote_files("Music/Run").await.unwrap().is_empty());

        publisher.disconnect().await;
        assert!(publisher.publish(&local, "Song.mp3").await.is_err());
    }

    #[test]
    fn test_stale_upload_names() {
        assert!(is_stale_upload(".Song.mp3.3f2a9c.tmp"));
        assert!(!is_stale_upload("Song.mp3"));
        assert!(!is_stale_upload("notes.tmp"));
        assert!(!is_stale_upload(".tmp"));
    }

    #[tokio::test]
    async fn test_connect_removes_interrupted_uploads() {
        let share = TempDir::new().unwrap();
        let folder = share.path().join("Music");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(".Song.mp3.1234.tmp"), b"partial").unwrap();
        std::fs::write(folder.join("Song.mp3"), b"complete").unwrap();
        std::fs::write(folder.join("notes.tmp"), b"user file").unwrap();

        let mut publisher = StoragePublisher::new();
        publisher
            .connect(&local_destination(&share), "Music")
            .await
            .unwrap();

        assert!(!folder.join(".Song.mp3.1234.tmp").exists());
        assert_eq!(std::fs::read(folder.join("Song.mp3")).unwrap(), b"complete");
        assert!(folder.join("notes.tmp").exists());
    }

    #[tokio::test]
    async fn test_connect_to_missing_share_fails() {
        let share = TempDir::new().unwrap();
        let mut destination = local_destination(&share);
        destination.path = Some(share.path().join("unmounted").to_string_lossy().into_owned());

        let mut publisher = StoragePublisher::new();
        assert!(publisher.connect(&destination, "Music").await.is_err());
    }
}
