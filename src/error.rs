//! 错误类型定义

use thiserror::Error;

/// 同步过程中的错误分类
///
/// 任务级错误（`SourceUnavailable`、`DestinationUnreachable`、`ManifestBuild`）只影响当前任务，
/// 条目级错误只影响当前条目，都不会中断整个运行。
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("播放列表不可用: {source_url}: {reason}")]
    SourceUnavailable { source_url: String, reason: String },

    #[error("无法连接目标存储 {destination}: {reason}")]
    DestinationUnreachable { destination: String, reason: String },

    #[error("获取音频失败 [{item_id}]: {reason}")]
    RetrievalFailure { item_id: String, reason: String },

    #[error("上传失败 [{item_id}]: {reason}")]
    PublishFailure { item_id: String, reason: String },

    #[error("完整性校验失败 [{item_id}] {remote_path}: {detail}")]
    IntegrityMismatch {
        item_id: String,
        remote_path: String,
        detail: String,
    },

    #[error("下载记录保存失败: {0}")]
    Persistence(#[from] LedgerError),

    #[error("生成播放列表失败: {0}")]
    ManifestBuild(String),
}

/// 下载记录持久化错误
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("写入 {path} 失败: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 配置错误，在任何任务开始前发现，属于不可恢复错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件 {path} 失败: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("配置文件格式错误: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("未配置任何启用的同步任务")]
    NoJobs,

    #[error("任务 {index} ({description}) 配置不完整: {reason}")]
    InvalidJob {
        index: usize,
        description: String,
        reason: String,
    },

    #[error("环境变量 {0} 未设置")]
    MissingEnv(String),
}
