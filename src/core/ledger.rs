//! 下载记录 - 记录哪些条目已经完成校验上传
//!
//! 记录以单个 JSON 文件保存，每次写入都是整文件覆盖（临时文件 + 原子重命名），
//! 不会出现写了一半的记录。

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// 单条记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    /// 目标存储中的文件路径
    pub file_path: String,
    pub recorded_at: DateTime<Utc>,
}

/// 磁盘格式
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    downloaded: BTreeMap<String, LedgerEntry>,
}

/// 下载记录
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl Ledger {
    /// 从磁盘加载
    ///
    /// 文件不存在时为空记录；文件损坏时记录错误并从空记录开始，不阻塞同步，
    /// 代价是可能重复传输已完成的条目。
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<LedgerFile>(&content) {
                Ok(file) => {
                    info!("已加载下载记录: {} 条 ({})", file.downloaded.len(), path.display());
                    file.downloaded
                }
                Err(e) => {
                    error!("下载记录文件损坏，将从空记录开始: {} - {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("下载记录文件不存在，创建新记录: {}", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                error!("读取下载记录失败，将从空记录开始: {} - {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_recorded(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&LedgerEntry> {
        self.entries.get(id)
    }

    /// 记录了该远程路径的条目
    pub fn owner_of(&self, file_path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.file_path == file_path)
            .map(|(id, _)| id.as_str())
    }

    pub fn list_recorded(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &LedgerEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 记录条目并立即持久化
    ///
    /// 持久化失败时内存状态回滚到上一次成功保存的快照。
    pub fn record(&mut self, id: &str, file_path: &str) -> Result<(), LedgerError> {
        let entry = LedgerEntry {
            file_path: file_path.to_string(),
            recorded_at: Utc::now(),
        };
        let previous = self.entries.insert(id.to_string(), entry);

        if let Err(e) = self.persist() {
            match previous {
                Some(old) => self.entries.insert(id.to_string(), old),
                None => self.entries.remove(id),
            };
            error!("保存下载记录失败，已回滚 {}: {}", id, e);
            return Err(e);
        }

        debug!("已记录: {} -> {}", id, file_path);
        Ok(())
    }

    /// 整文件写入临时文件后重命名覆盖
    fn persist(&self) -> Result<(), LedgerError> {
        let io_err = |source| LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let content = serde_json::to_vec_pretty(&LedgerFileRef {
            downloaded: &self.entries,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let write_temp = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&content)?;
            file.sync_all()
        };

        if let Err(e) = write_temp().and_then(|_| fs::rename(&temp_path, &self.path)) {
            let _ = fs::remove_file(&temp_path);
            return Err(io_err(e));
        }

        Ok(())
    }
}

/// 序列化用的借用视图，避免复制整个表
#[derive(Serialize)]
struct LedgerFileRef<'a> {
    downloaded: &'a BTreeMap<String, LedgerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::load(dir.path().join("downloaded.json"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_corrupted_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.json");
        fs::write(&path, "{ \"downloaded\": { broken").unwrap();

        let ledger = Ledger::load(&path);
        assert!(ledger.is_empty());
        assert!(!ledger.is_recorded("abc"));
    }

    #[test]
    fn test_record_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("downloaded.json");

        let mut ledger = Ledger::load(&path);
        ledger.record("vid1", "Music/Run/One.mp3").unwrap();
        ledger.record("vid2", "Music/Run/Two.mp3").unwrap();

        let reloaded = Ledger::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert!(reloaded.is_recorded("vid1"));
        assert_eq!(reloaded.get("vid2").unwrap().file_path, "Music/Run/Two.mp3");
        assert_eq!(reloaded.owner_of("Music/Run/One.mp3"), Some("vid1"));
        assert_eq!(reloaded.owner_of("Music/Run/Three.mp3"), None);
        assert_eq!(
            reloaded.list_recorded().into_iter().collect::<Vec<_>>(),
            vec!["vid1".to_string(), "vid2".to_string()]
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_failed_persist_rolls_back() {
        let dir = TempDir::new().unwrap();
        // 父路径是普通文件，无法创建目录
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();

        let mut ledger = Ledger::load(blocker.join("downloaded.json"));
        let err = ledger.record("vid1", "Music/One.mp3").unwrap_err();

        assert!(matches!(err, LedgerError::Io { .. }));
        assert!(!ledger.is_recorded("vid1"));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_failed_overwrite_restores_previous_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.json");

        let mut ledger = Ledger::load(&path);
        ledger.record("vid1", "Music/One.mp3").unwrap();
        let original = ledger.get("vid1").cloned().unwrap();

        // 目标位置换成目录，重命名必然失败
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(ledger.record("vid1", "Music/Other.mp3").is_err());
        assert_eq!(ledger.get("vid1"), Some(&original));
    }

    #[test]
    fn test_reads_legacy_shape_without_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("downloaded.json");
        fs::write(&path, "{}").unwrap();

        assert!(Ledger::load(&path).is_empty());
    }
}
