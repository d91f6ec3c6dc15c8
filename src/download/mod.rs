//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`     — 数据模型（RepoRef / FileRecord / DownloadTask / ResultTally 等）
//! - `metadata`   — 仓库修订元数据拉取与解析
//! - `plan`       — 按包含/排除模式筛选文件、计算总大小
//! - `downloader` — 单文件断点续传
//! - `pool`       — 有界并发调度与结果汇总
//! - `progress`   — 进度条与逐文件事件
//! - `verify`     — 本地文件一致性检查
//! - `report`     — 汇总输出

pub mod downloader;
pub mod metadata;
pub mod models;
pub mod plan;
pub mod pool;
pub mod progress;
pub mod report;
pub mod verify;

pub use downloader::FileDownloader;
pub use metadata::{RepoMetadata, fetch_metadata};
pub use models::{
    DownloadOutcome, DownloadTask, FileRecord, RepoKind, RepoRef, ResultTally, TransferState,
};
pub use plan::{FileSelector, aggregate_size};
pub use pool::DownloadCoordinator;
pub use progress::{FileEvent, ProgressReporter};
pub use verify::{Discrepancy, DiscrepancyKind, verify};
