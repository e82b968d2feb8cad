use super::{ByteStream, FileInfo, FileMeta, Storage};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// 本地目录存储，网络共享通过挂载点接入
pub struct LocalStorage {
    base_path: PathBuf,
    name: String,
}

impl LocalStorage {
    pub fn new(path: &str) -> Result<Self> {
        let base_path = PathBuf::from(path);
        if !base_path.is_dir() {
            anyhow::bail!("目录不存在或不可访问: {}", path);
        }
        let name = format!("local:{}", path);
        Ok(Self { base_path, name })
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    /// 规范化路径分隔符（统一使用 /）
    fn normalize_path(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// 同目录下的临时文件，写完后原子重命名
    fn temp_path_for(full_path: &Path) -> PathBuf {
        let file_name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()))
    }

    async fn ensure_parent(full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        let base = dir.map_or_else(|| self.base_path.clone(), |p| self.resolve_path(p));

        if !base.exists() {
            anyhow::bail!("目录不存在: {}", base.display());
        }

        let base_path = self.base_path.clone();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let entries: Vec<_> = tokio::task::spawn_blocking(move || {
            WalkDir::new(&base)
                .min_depth(1)
                .max_depth(1)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter_map(|entry| {
                    let path = entry.path();
                    let metadata = entry.metadata().ok()?;

                    let relative_path = path.strip_prefix(&base_path).ok()?.to_str()?.to_string();

                    let modified = metadata
                        .modified()
                        .ok()?
                        .duration_since(std::time::UNIX_EPOCH)
                        .ok()?
                        .as_secs() as i64;

                    Some(FileInfo {
                        name: entry.file_name().to_string_lossy().into_owned(),
                        path: Self::normalize_path(&relative_path),
                        size: if metadata.is_dir() { 0 } else { metadata.len() },
                        modified_time: modified,
                        is_dir: metadata.is_dir(),
                    })
                })
                .collect()
        })
        .await?;

        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        let full_path = self.resolve_path(path);

        match fs::metadata(&full_path).await {
            Ok(metadata) => {
                let modified = metadata
                    .modified()?
                    .duration_since(std::time::UNIX_EPOCH)?
                    .as_secs() as i64;

                Ok(Some(FileMeta {
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    modified_time: modified,
                    is_dir: metadata.is_dir(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.resolve_path(path)).await?;
        Ok(data)
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path).await?;

        // 使用临时文件写入，然后原子重命名
        let temp_path = Self::temp_path_for(&full_path);
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &full_path).await?;

        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
    ) -> Result<()> {
        let full_path = self.resolve_path(path);
        Self::ensure_parent(&full_path).await?;

        let temp_path = Self::temp_path_for(&full_path);
        let result: Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        fs::rename(&temp_path, &full_path).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);

        if !full_path.exists() {
            return Ok(());
        }

        if full_path.is_dir() {
            fs::remove_dir_all(&full_path).await?;
        } else {
            fs::remove_file(&full_path).await?;
        }

        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        fs::create_dir_all(&full_path).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> LocalStorage {
        LocalStorage::new(dir.path().to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_missing_root_rejected() {
        assert!(LocalStorage::new("/definitely/not/a/real/share").is_err());
    }

    #[tokio::test]
    async fn test_write_read_and_list_folder() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        storage.write("Music/Run/a.mp3", b"aaa".to_vec()).await.unwrap();
        storage.write("Music/Run/b.mp3", b"bbbb".to_vec()).await.unwrap();
        storage.create_dir("Music/Run/sub").await.unwrap();

        let mut files = storage.list_files(Some("Music/Run")).await.unwrap();
        files.sort_by(|a, b| a.name.cmp(&b.name));

        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp3", "b.mp3", "sub"]);
        assert_eq!(files[1].path, "Music/Run/b.mp3");
        assert_eq!(files[1].size, 4);
        assert!(files[2].is_dir);

        assert_eq!(storage.read("Music/Run/a.mp3").await.unwrap(), b"aaa");
    }

    #[tokio::test]
    async fn test_write_stream_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(b"hello ".to_vec()), Ok(b"world".to_vec())];
        storage
            .write_stream("out/song.mp3", Box::pin(futures::stream::iter(chunks)), None)
            .await
            .unwrap();

        assert_eq!(storage.read("out/song.mp3").await.unwrap(), b"hello world");
        let files = storage.list_files(Some("out")).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_stream_discards_partial_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let chunks: Vec<Result<Vec<u8>>> =
            vec![Ok(b"partial".to_vec()), Err(anyhow::anyhow!("connection reset"))];
        let result = storage
            .write_stream("out/song.mp3", Box::pin(futures::stream::iter(chunks)), None)
            .await;

        assert!(result.is_err());
        assert!(!storage.exists("out/song.mp3").await.unwrap());
        assert!(storage.list_files(Some("out")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.delete("nope.mp3").await.unwrap();
    }
}
