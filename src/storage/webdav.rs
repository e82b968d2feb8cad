use super::{dir_path, ByteStream, FileInfo, FileMeta, Storage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

pub struct WebDavStorage {
    operator: Operator,
    name: String,
}

impl WebDavStorage {
    pub async fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    /// 逐级创建目录（部分 WebDAV 服务器不支持递归 MKCOL）
    async fn create_parents(&self, path: &str) {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current_path = String::new();
        for part in parts {
            current_path.push_str(part);
            current_path.push('/');
            // 忽略创建目录的错误（可能已存在）
            let _ = self.operator.create_dir(&current_path).await;
        }
    }

    fn parent_of(path: &str) -> Option<&str> {
        path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

#[async_trait]
impl Storage for WebDavStorage {
    async fn list_files(&self, dir: Option<&str>) -> Result<Vec<FileInfo>> {
        let path = dir_path(dir);
        let mut files = Vec::new();

        let mut lister = self
            .operator
            .lister_with(&path)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let path_str = entry.path().to_string();

            // 跳过目录本身
            if path_str.is_empty() || path_str == "/" || path_str == path {
                continue;
            }

            let meta = entry.metadata();

            files.push(FileInfo {
                name: entry.name().trim_end_matches('/').to_string(),
                path: path_str.trim_start_matches('/').trim_end_matches('/').to_string(),
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            });
        }

        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: meta.content_length(),
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(path).await?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches('/');

        // 确保父目录存在
        if let Some(parent) = Self::parent_of(path) {
            self.create_parents(parent).await;
        }

        self.operator.write(path, data).await?;
        Ok(())
    }

    async fn write_stream(
        &self,
        path: &str,
        mut stream: ByteStream,
        _total_size: Option<u64>,
    ) -> Result<()> {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches('/');

        if let Some(parent) = Self::parent_of(path) {
            self.create_parents(parent).await;
        }

        let mut writer = self.operator.writer(path).await?;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(data) => writer.write(data).await?,
                Err(e) => {
                    let _ = writer.abort().await;
                    return Err(e);
                }
            }
        }
        writer.close().await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match self.operator.delete(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let dir = dir_path(Some(path));
        if dir.is_empty() {
            // 根目录，某些服务器需要显式创建
            let _ = self.operator.create_dir("/").await;
            return Ok(());
        }
        self.create_parents(&dir).await;
        if !self.exists(&dir).await? {
            anyhow::bail!("无法创建目录: {}", dir);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
