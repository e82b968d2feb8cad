use crate::config::{DownloadConfig, JobConfig};
use crate::core::fetcher::{ItemDescriptor, ItemFetcher};
use crate::core::integrity::calculate_file_hash;
use crate::core::ledger::Ledger;
use crate::core::manifest::ManifestBuilder;
use crate::core::publisher::RemotePublisher;
use crate::core::retriever::ContentRetriever;
use crate::error::SyncError;
use crate::storage::join_path;
use futures::FutureExt;
use regex::Regex;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// 文件名最大字符数
const MAX_FILENAME_CHARS: usize = 100;

/// 同步选项
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// 下载暂存目录
    pub temp_dir: PathBuf,
    /// 期望的音频格式（扩展名）
    pub audio_format: String,
    /// 只列出待传输条目，不做任何下载、上传或记录
    pub dry_run: bool,
}

impl SyncOptions {
    pub fn from_config(download: &DownloadConfig, dry_run: bool) -> Self {
        Self {
            temp_dir: download.temp_dir.clone(),
            audio_format: download.audio_format.clone(),
            dry_run,
        }
    }
}

/// 单个条目的处理阶段，同一次运行内只能前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    Discovered,
    Retrieving,
    Retrieved,
    Publishing,
    Verified,
    Recorded,
    CleanedUp,
    Failed,
}

impl ItemState {
    pub fn can_advance_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Discovered, Retrieving)
                | (Retrieving, Retrieved)
                | (Retrieved, Publishing)
                | (Publishing, Verified)
                | (Verified, Recorded)
                | (Recorded, CleanedUp)
                | (Retrieving | Publishing | Verified, Failed)
        )
    }
}

/// 条目状态跟踪
struct ItemProgress<'a> {
    id: &'a str,
    state: ItemState,
}

impl<'a> ItemProgress<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            state: ItemState::Discovered,
        }
    }

    fn advance(&mut self, next: ItemState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("[{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// 条目处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ItemOutcome {
    /// 已在下载记录中
    AlreadyRecorded,
    /// 缺少标识或地址
    Incomplete,
    /// 预演模式下待传输
    Planned,
    Recorded {
        #[serde(rename = "remotePath")]
        remote_path: String,
    },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemReport {
    pub id: String,
    pub title: String,
    pub state: ItemState,
    pub outcome: ItemOutcome,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    Completed,
    /// 部分条目失败
    CompletedWithErrors,
    /// 播放列表为空
    Empty,
    SourceUnavailable,
    DestinationUnreachable,
    /// 处理过程中发生 panic
    Aborted,
}

/// 单个任务的报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub index: usize,
    pub description: String,
    pub source_url: String,
    pub destination: String,
    pub folder: String,
    pub status: JobStatus,
    pub discovered: u32,
    pub attempted: u32,
    pub recorded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub incomplete: u32,
    /// 未配置播放列表文件或预演模式时为 None
    pub manifest_built: Option<bool>,
    pub items: Vec<ItemReport>,
    pub errors: Vec<String>,
    pub start_time: i64,
    pub end_time: i64,
    /// 毫秒
    pub duration: u64,
}

impl JobReport {
    fn new(index: usize, job: &JobConfig) -> Self {
        Self {
            index,
            description: job.label().to_string(),
            source_url: job.url.clone(),
            destination: job.destination.display_name(),
            folder: job.folder.clone(),
            status: JobStatus::Completed,
            discovered: 0,
            attempted: 0,
            recorded: 0,
            failed: 0,
            skipped: 0,
            incomplete: 0,
            manifest_built: None,
            items: Vec::new(),
            errors: Vec::new(),
            start_time: chrono::Utc::now().timestamp(),
            end_time: 0,
            duration: 0,
        }
    }

    fn abort(&mut self, status: JobStatus, err: &SyncError) {
        error!("{}", err);
        self.status = status;
        self.errors.push(err.to_string());
    }

    fn push_item(&mut self, item: &ItemDescriptor, state: ItemState, outcome: ItemOutcome) {
        match &outcome {
            ItemOutcome::AlreadyRecorded => self.skipped += 1,
            ItemOutcome::Incomplete => self.incomplete += 1,
            ItemOutcome::Planned => self.attempted += 1,
            ItemOutcome::Recorded { .. } => {
                self.attempted += 1;
                self.recorded += 1;
            }
            ItemOutcome::Failed { reason } => {
                self.attempted += 1;
                self.failed += 1;
                self.errors.push(reason.clone());
            }
        }
        self.items.push(ItemReport {
            id: item.id.clone(),
            title: item.title.clone(),
            state,
            outcome,
        });
    }

    fn finish(mut self, started: Instant) -> Self {
        if self.status == JobStatus::Completed && self.failed > 0 {
            self.status = JobStatus::CompletedWithErrors;
        }
        self.end_time = chrono::Utc::now().timestamp();
        self.duration = started.elapsed().as_millis() as u64;
        self
    }
}

/// 整次运行的报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub dry_run: bool,
    pub jobs: Vec<JobReport>,
    pub discovered: u32,
    pub attempted: u32,
    pub recorded: u32,
    pub failed: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: u64,
}

impl SyncReport {
    /// 没有新增任何记录，属于警告而非错误
    pub fn nothing_recorded(&self) -> bool {
        self.recorded == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
            || self.jobs.iter().any(|j| {
                matches!(
                    j.status,
                    JobStatus::SourceUnavailable | JobStatus::DestinationUnreachable | JobStatus::Aborted
                )
            })
    }
}

/// 同步引擎
///
/// 任务逐个执行，条目按播放列表顺序逐个处理。下载记录只在远程回读校验通过后写入。
pub struct SyncEngine {
    options: SyncOptions,
    ledger: Ledger,
    fetcher: Box<dyn ItemFetcher>,
    retriever: Box<dyn ContentRetriever>,
    publisher: Box<dyn RemotePublisher>,
}

impl SyncEngine {
    pub fn new(
        options: SyncOptions,
        ledger: Ledger,
        fetcher: Box<dyn ItemFetcher>,
        retriever: Box<dyn ContentRetriever>,
        publisher: Box<dyn RemotePublisher>,
    ) -> Self {
        Self {
            options,
            ledger,
            fetcher,
            retriever,
            publisher,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// 依次运行所有任务，单个任务失败不影响后续任务
    pub async fn run_all<'a>(
        &mut self,
        jobs: impl IntoIterator<Item = (usize, &'a JobConfig)>,
    ) -> SyncReport {
        let started = Instant::now();
        let start_time = chrono::Utc::now().timestamp();

        let mut reports = Vec::new();
        for (index, job) in jobs {
            reports.push(self.run_job(index, job).await);
        }

        let sum = |f: fn(&JobReport) -> u32| reports.iter().map(f).sum::<u32>();
        let report = SyncReport {
            dry_run: self.options.dry_run,
            discovered: sum(|j| j.discovered),
            attempted: sum(|j| j.attempted),
            recorded: sum(|j| j.recorded),
            failed: sum(|j| j.failed),
            start_time,
            end_time: chrono::Utc::now().timestamp(),
            duration: started.elapsed().as_millis() as u64,
            jobs: reports,
        };

        info!(
            "同步完成: 发现 {} 个条目, 尝试 {} 个, 新增 {} 个, 失败 {} 个",
            report.discovered, report.attempted, report.recorded, report.failed
        );
        if report.nothing_recorded() && !report.dry_run {
            warn!("本次运行没有新增任何条目");
        }

        report
    }

    /// 运行单个任务
    pub async fn run_job(&mut self, index: usize, job: &JobConfig) -> JobReport {
        let started = Instant::now();
        let mut report = JobReport::new(index, job);

        info!("开始同步任务 {}: {} -> {}", index, job.label(), job.folder);

        if self.options.dry_run {
            self.run_guarded(job, &mut report).await;
            return report.finish(started);
        }

        match self.publisher.connect(&job.destination, &job.folder).await {
            Ok(()) => self.run_guarded(job, &mut report).await,
            Err(e) => {
                let err = SyncError::DestinationUnreachable {
                    destination: job.destination.display_name(),
                    reason: format!("{:#}", e),
                };
                report.abort(JobStatus::DestinationUnreachable, &err);
            }
        }

        // 无论任务结果如何都断开
        self.publisher.disconnect().await;

        let report = report.finish(started);
        info!(
            "任务 {} 结束: {:?}, 新增 {} 个, 失败 {} 个, 跳过 {} 个",
            index, report.status, report.recorded, report.failed, report.skipped
        );
        report
    }

    /// panic 只终止当前任务
    async fn run_guarded(&mut self, job: &JobConfig, report: &mut JobReport) {
        let result = AssertUnwindSafe(self.sync_job(job, &mut *report))
            .catch_unwind()
            .await;

        if let Err(payload) = result {
            let message = panic_message(payload.as_ref());
            error!("任务 {} 异常终止: {}", job.label(), message);
            report.status = JobStatus::Aborted;
            report.errors.push(message);
        }
    }

    async fn sync_job(&mut self, job: &JobConfig, report: &mut JobReport) {
        let items = match self.fetcher.fetch(&job.url).await {
            Ok(items) => items,
            Err(e) => {
                let err = SyncError::SourceUnavailable {
                    source_url: job.url.clone(),
                    reason: format!("{:#}", e),
                };
                report.abort(JobStatus::SourceUnavailable, &err);
                return;
            }
        };

        if items.is_empty() {
            warn!("播放列表为空，跳过: {}", job.url);
            report.status = JobStatus::Empty;
            return;
        }

        report.discovered = items.len() as u32;
        info!("播放列表共 {} 个条目", items.len());

        for item in &items {
            let (state, outcome) = self.process_item(item, &job.folder).await;
            report.push_item(item, state, outcome);
        }

        if self.options.dry_run {
            return;
        }

        if let Some(name) = job.manifest_name() {
            let built = ManifestBuilder::new(self.publisher.as_mut())
                .build(&job.folder, name)
                .await;
            if !built {
                report
                    .errors
                    .push(SyncError::ManifestBuild(format!("{}/{}", job.folder, name)).to_string());
            }
            report.manifest_built = Some(built);
        }
    }

    async fn process_item(
        &mut self,
        item: &ItemDescriptor,
        folder: &str,
    ) -> (ItemState, ItemOutcome) {
        if !item.is_complete() {
            warn!("条目缺少标识或地址，跳过: {:?}", item.title);
            return (ItemState::Discovered, ItemOutcome::Incomplete);
        }

        if self.ledger.is_recorded(&item.id) {
            debug!("已下载，跳过: {} ({})", item.title, item.id);
            return (ItemState::Discovered, ItemOutcome::AlreadyRecorded);
        }

        if self.options.dry_run {
            info!("[预演] 待传输: {} ({})", item.title, item.id);
            return (ItemState::Discovered, ItemOutcome::Planned);
        }

        info!("处理条目: {} ({})", item.title, item.id);
        let mut progress = ItemProgress::new(&item.id);

        match self.transfer_item(item, folder, &mut progress).await {
            Ok(remote_path) => {
                // 暂存文件已在 transfer_item 返回时删除
                progress.advance(ItemState::CleanedUp);
                info!("已完成: {} -> {}", item.title, remote_path);
                (progress.state, ItemOutcome::Recorded { remote_path })
            }
            Err(e) => {
                progress.advance(ItemState::Failed);
                error!("{}", e);
                (
                    progress.state,
                    ItemOutcome::Failed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// 下载、上传、回读校验、记录
    ///
    /// 暂存文件在返回时（包括出错和 panic）一律删除。
    async fn transfer_item(
        &mut self,
        item: &ItemDescriptor,
        folder: &str,
        progress: &mut ItemProgress<'_>,
    ) -> Result<String, SyncError> {
        let stem = sanitize_filename(&item.title, &item.id);
        let desired = self
            .options
            .temp_dir
            .join(format!("{}.{}", stem, self.options.audio_format));

        let mut staged = scopeguard::guard(vec![desired.clone()], |paths| {
            for path in &paths {
                remove_staged(path);
            }
        });

        let retrieval_failed = |reason: String| SyncError::RetrievalFailure {
            item_id: item.id.clone(),
            reason,
        };

        progress.advance(ItemState::Retrieving);
        let actual = self
            .retriever
            .retrieve(&item.url, &desired)
            .await
            .map_err(|e| retrieval_failed(format!("{:#}", e)))?;
        if actual != desired {
            staged.push(actual.clone());
        }

        let local_hash = calculate_file_hash(&actual)
            .await
            .map_err(|e| retrieval_failed(format!("无法读取下载文件 {}: {:#}", actual.display(), e)))?;
        progress.advance(ItemState::Retrieved);

        let staged_name = actual
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.{}", stem, self.options.audio_format));

        let publish_failed = |reason: String| SyncError::PublishFailure {
            item_id: item.id.clone(),
            reason,
        };

        progress.advance(ItemState::Publishing);
        let remote_filename = self
            .unique_remote_filename(folder, item, staged_name)
            .await
            .map_err(|e| publish_failed(format!("无法列出目标文件夹 {}: {:#}", folder, e)))?;
        let remote_path = self
            .publisher
            .publish(&actual, &remote_filename)
            .await
            .map_err(|e| publish_failed(format!("{:#}", e)))?;

        let mismatch = match self.publisher.remote_checksum(&remote_path).await {
            Ok(remote_hash) if remote_hash == local_hash => None,
            Ok(remote_hash) => Some(format!(
                "本地 {} 与远程 {} 不一致",
                short_hash(&local_hash),
                short_hash(&remote_hash)
            )),
            Err(e) => Some(format!("无法回读远程文件: {:#}", e)),
        };

        if let Some(detail) = mismatch {
            self.purge_remote(&remote_path).await;
            return Err(SyncError::IntegrityMismatch {
                item_id: item.id.clone(),
                remote_path,
                detail,
            });
        }

        progress.advance(ItemState::Verified);
        debug!("校验通过: {} ({})", remote_path, short_hash(&local_hash));

        self.ledger.record(&item.id, &remote_path)?;
        progress.advance(ItemState::Recorded);

        Ok(remote_path)
    }

    /// 同名文件已在目标文件夹中，或已被其他条目记录时，在文件名中加入条目标识
    async fn unique_remote_filename(
        &mut self,
        folder: &str,
        item: &ItemDescriptor,
        filename: String,
    ) -> anyhow::Result<String> {
        let existing = self.publisher.list_remote_files(folder).await?;
        let recorded = self
            .ledger
            .owner_of(&join_path(folder, &filename))
            .is_some_and(|owner| owner != item.id);

        if !recorded && !existing.iter().any(|name| *name == filename) {
            return Ok(filename);
        }

        let tag = sanitize_filename(&item.id, &item.id);
        let unique = match filename.rsplit_once('.') {
            Some((stem, ext)) => format!("{} [{}].{}", stem, tag, ext),
            None => format!("{} [{}]", filename, tag),
        };
        info!("文件名 {} 已被占用，改用 {}", filename, unique);
        Ok(unique)
    }

    /// 删除校验失败的远程文件，失败只记录日志
    async fn purge_remote(&mut self, remote_path: &str) {
        match self.publisher.delete_remote_file(remote_path).await {
            Ok(()) => info!("已删除损坏的远程文件: {}", remote_path),
            Err(e) => warn!("删除损坏的远程文件失败 {}: {:#}", remote_path, e),
        }
    }
}

fn remove_staged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("已删除暂存文件: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除暂存文件失败 {}: {}", path.display(), e),
    }
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "未知错误".to_string())
}

/// 生成可在 Windows/SMB 共享上使用的文件名（不含扩展名）
///
/// 非法字符替换为 `_`，最长 100 个字符，结果为空时使用条目标识。
pub fn sanitize_filename(title: &str, fallback_id: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let invalid = INVALID
        .get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"));

    let replaced = invalid.replace_all(title, "_");
    let truncated: String = replaced.trim().chars().take(MAX_FILENAME_CHARS).collect();
    let name = truncated.trim().trim_end_matches('.');

    if name.is_empty() {
        fallback_id.to_string()
    } else {
        name.to_string()
    }
}
