//! M3U 播放列表生成
//!
//! 播放列表完全根据目标文件夹中现有的音频文件重新生成，不做增量合并。

use crate::core::publisher::RemotePublisher;
use crate::error::SyncError;
use crate::storage::join_path;
use tracing::{error, info, warn};

/// 识别为音频的扩展名（不区分大小写）
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "opus", "flac", "wav", "webm"];

const HEADER: &str = "#EXTM3U";

/// 时长未知
const UNKNOWN_DURATION: i64 = -1;

pub fn is_audio_file(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && AUDIO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 生成播放列表内容，文件应已排序
pub fn render(files: &[String]) -> String {
    let mut lines = Vec::with_capacity(files.len() * 2 + 1);
    lines.push(HEADER.to_string());

    for file in files {
        let title = file.rsplit_once('.').map_or(file.as_str(), |(stem, _)| stem);
        lines.push(format!("#EXTINF:{},{}", UNKNOWN_DURATION, title));
        lines.push(file.clone());
    }

    lines.join("\n") + "\n"
}

/// 播放列表生成器
pub struct ManifestBuilder<'a> {
    publisher: &'a mut dyn RemotePublisher,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(publisher: &'a mut dyn RemotePublisher) -> Self {
        Self { publisher }
    }

    /// 生成播放列表，任何失败都只记录日志并返回 false
    pub async fn build(&mut self, folder: &str, manifest_name: &str) -> bool {
        info!("生成 M3U 播放列表: {}/{}", folder, manifest_name);
        match self.try_build(folder, manifest_name).await {
            Ok(count) => {
                info!("M3U 播放列表已生成: {} ({} 首)", manifest_name, count);
                true
            }
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn try_build(&mut self, folder: &str, manifest_name: &str) -> Result<usize, SyncError> {
        let names = self
            .publisher
            .list_remote_files(folder)
            .await
            .map_err(|e| SyncError::ManifestBuild(format!("列出文件夹 {} 失败: {}", folder, e)))?;

        let mut audio_files: Vec<String> =
            names.iter().filter(|n| is_audio_file(n)).cloned().collect();
        if audio_files.is_empty() {
            return Err(SyncError::ManifestBuild(format!("文件夹 {} 中没有音频文件", folder)));
        }
        // 不依赖存储返回的顺序
        audio_files.sort();

        let manifest_path = join_path(folder, manifest_name);
        if names.iter().any(|n| n == manifest_name) {
            info!("删除已有播放列表: {}", manifest_path);
            self.publisher
                .delete_remote_file(&manifest_path)
                .await
                .map_err(|e| {
                    error!("删除旧播放列表失败: {}", e);
                    SyncError::ManifestBuild(format!("删除 {} 失败: {}", manifest_path, e))
                })?;
        }

        let content = render(&audio_files);
        self.publisher
            .write_remote_file(&manifest_path, content.into_bytes())
            .await
            .map_err(|e| SyncError::ManifestBuild(format!("写入 {} 失败: {}", manifest_path, e)))?;

        Ok(audio_files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;

    /// 内存中的目标文件夹
    #[derive(Default)]
    struct MemoryFolder {
        files: BTreeMap<String, Vec<u8>>,
        listing_order: Vec<String>,
        fail_list: bool,
        fail_delete: bool,
        deletes: Vec<String>,
        writes: Vec<String>,
    }

    #[async_trait]
    impl RemotePublisher for MemoryFolder {
        async fn connect(&mut self, _: &StorageConfig, _: &str) -> Result<()> {
            Ok(())
        }
        async fn publish(&mut self, _: &Path, _: &str) -> Result<String> {
            unreachable!("manifest builder never publishes")
        }
        async fn remote_checksum(&mut self, _: &str) -> Result<String> {
            unreachable!("manifest builder never verifies")
        }
        async fn write_remote_file(&mut self, remote_path: &str, data: Vec<u8>) -> Result<()> {
            self.writes.push(remote_path.to_string());
            self.files.insert(remote_path.to_string(), data);
            Ok(())
        }
        async fn list_remote_files(&mut self, _: &str) -> Result<Vec<String>> {
            if self.fail_list {
                anyhow::bail!("share went away");
            }
            Ok(self.listing_order.clone())
        }
        async fn delete_remote_file(&mut self, remote_path: &str) -> Result<()> {
            if self.fail_delete {
                anyhow::bail!("access denied");
            }
            self.deletes.push(remote_path.to_string());
            self.files.remove(remote_path);
            Ok(())
        }
        async fn disconnect(&mut self) {}
    }

    fn folder_with(names: &[&str]) -> MemoryFolder {
        MemoryFolder {
            listing_order: names.iter().map(|s| s.to_string()).collect(),
            ..MemoryFolder::default()
        }
    }

    #[test]
    fn test_audio_extension_filter_ignores_case() {
        assert!(is_audio_file("a.mp3"));
        assert!(is_audio_file("B.MP3"));
        assert!(is_audio_file("c.Flac"));
        assert!(!is_audio_file("Run.m3u"));
        assert!(!is_audio_file("cover.jpg"));
        assert!(!is_audio_file("mp3"));
        assert!(!is_audio_file(".mp3"));
    }

    #[test]
    fn test_render_format() {
        let content = render(&["a.mp3".to_string(), "b.c.mp3".to_string()]);
        assert_eq!(content, "#EXTM3U\n#EXTINF:-1,a\na.mp3\n#EXTINF:-1,b.c\nb.c.mp3\n");
    }

    #[tokio::test]
    async fn test_files_sorted_by_name() {
        let mut folder = folder_with(&["b.mp3", "a.mp3", "notes.txt", "c.mp3"]);

        assert!(ManifestBuilder::new(&mut folder).build("Music/Run", "Run.m3u").await);

        let content = String::from_utf8(folder.files["Music/Run/Run.m3u"].clone()).unwrap();
        let entries: Vec<_> = content.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(entries, vec!["a.mp3", "b.mp3", "c.mp3"]);
        assert!(folder.deletes.is_empty());
    }

    #[tokio::test]
    async fn test_no_audio_files_writes_nothing() {
        let mut folder = folder_with(&["cover.jpg"]);

        assert!(!ManifestBuilder::new(&mut folder).build("Music/Run", "Run.m3u").await);
        assert!(folder.writes.is_empty());
        assert!(folder.deletes.is_empty());
    }

    #[tokio::test]
    async fn test_existing_manifest_replaced() {
        let mut folder = folder_with(&["Run.m3u", "a.mp3"]);
        folder
            .files
            .insert("Music/Run/Run.m3u".to_string(), b"stale".to_vec());

        assert!(ManifestBuilder::new(&mut folder).build("Music/Run", "Run.m3u").await);
        assert_eq!(folder.deletes, vec!["Music/Run/Run.m3u".to_string()]);
        assert_eq!(
            folder.files["Music/Run/Run.m3u"],
            b"#EXTM3U\n#EXTINF:-1,a\na.mp3\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_build_on_local_share() {
        use crate::config::StorageType;
        use crate::core::publisher::StoragePublisher;

        let share = tempfile::TempDir::new().unwrap();
        let folder = share.path().join("Music");
        std::fs::create_dir_all(folder.join("old")).unwrap();
        for name in ["b.MP3", "a.mp3", "cover.jpg", "Music.m3u"] {
            std::fs::write(folder.join(name), b"x").unwrap();
        }

        let destination = StorageConfig {
            typ: StorageType::Local,
            path: Some(share.path().to_string_lossy().into_owned()),
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            prefix: None,
            username: None,
            password: None,
            root: None,
        };
        let mut publisher = StoragePublisher::new();
        publisher.connect(&destination, "Music").await.unwrap();

        assert!(ManifestBuilder::new(&mut publisher).build("Music", "Music.m3u").await);

        let content = std::fs::read_to_string(folder.join("Music.m3u")).unwrap();
        assert_eq!(content, "#EXTM3U\n#EXTINF:-1,a\na.mp3\n#EXTINF:-1,b\nb.MP3\n");
    }

    #[tokio::test]
    async fn test_io_failures_return_false() {
        let mut folder = folder_with(&["a.mp3"]);
        folder.fail_list = true;
        assert!(!ManifestBuilder::new(&mut folder).build("Music", "x.m3u").await);

        let mut folder = folder_with(&["x.m3u", "a.mp3"]);
        folder.fail_delete = true;
        assert!(!ManifestBuilder::new(&mut folder).build("Music", "x.m3u").await);
        assert!(folder.writes.is_empty());
    }
}
