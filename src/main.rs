use clap::{Parser, Subcommand};
use playlistsync_lib::commands::browse::BrowseCommand;
use playlistsync_lib::commands::check::CheckCommand;
use playlistsync_lib::commands::manifest::ManifestCommand;
use playlistsync_lib::commands::output::{get_formatter, OutputFormat};
use playlistsync_lib::commands::status::StatusCommand;
use playlistsync_lib::commands::sync::SyncCommand;
use playlistsync_lib::config::AppConfig;
use playlistsync_lib::logging::{LogConfig, SizeRotatingWriter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 中断退出码
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "playlistsync",
    version,
    about = "把播放列表中的音频同步到网络共享"
)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 输出更详细的日志（-v, -vv）
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// 以 JSON 格式输出结果
    #[arg(long, global = true)]
    json: bool,

    /// 默认执行 sync
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 同步所有启用的任务
    Sync(SyncCommand),
    /// 显示下载记录
    Status(StatusCommand),
    /// 检查播放列表和目标存储是否可用
    Check(CheckCommand),
    /// 只重新生成播放列表文件
    Manifest(ManifestCommand),
    /// 列出目标文件夹内容
    Browse(BrowseCommand),
}

/// 初始化日志系统，返回的 guard 需要保持到进程结束
fn init_logging(config: &LogConfig, verbose: u8) -> Option<WorkerGuard> {
    let level = match verbose {
        0 => config.tracing_level(),
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let mut env_filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "opendal=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    // 控制台输出到 stderr，stdout 留给命令结果
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let mut guard = None;
    let file_layer = if config.enabled {
        match SizeRotatingWriter::new(&config.log_dir(), config.max_size_bytes()) {
            Ok(writer) => {
                let (non_blocking, worker_guard) = tracing_appender::non_blocking(writer);
                guard = Some(worker_guard);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_thread_names(false),
                )
            }
            Err(e) => {
                eprintln!("无法创建日志文件，只输出到控制台: {}", e);
                None
            }
        }
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);

    // 先读取日志配置，配置错误本身也能写进日志
    let _log_guard = init_logging(&LogConfig::load(&config_path), cli.verbose);

    let format = OutputFormat::from_flag(cli.json);
    let formatter = get_formatter(format);

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("配置错误: {}", e);
            formatter.error(&format!("配置错误 ({}): {}", config_path.display(), e));
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Commands::Sync(SyncCommand {
        job: None,
        dry_run: false,
    }));

    let run = async {
        match &command {
            Commands::Sync(cmd) => cmd.execute(&config, format).await,
            Commands::Status(cmd) => cmd.execute(&config, format).await,
            Commands::Check(cmd) => cmd.execute(&config, format).await,
            Commands::Manifest(cmd) => cmd.execute(&config, format).await,
            Commands::Browse(cmd) => cmd.execute(&config, format).await,
        }
    };

    // 中断时丢弃正在运行的任务，暂存文件随之删除；未校验的条目不会被记录
    tokio::select! {
        result = run => match result {
            Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            Err(e) => {
                error!("{:#}", e);
                formatter.error(&format!("{:#}", e));
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("收到中断信号，停止同步");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}
