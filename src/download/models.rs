//! 下载相关的数据模型定义。
//!
//! 包含仓库引用、文件记录、下载任务、单次传输状态与汇总结果。

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepoKind {
    #[default]
    Model,
    Dataset,
}

impl RepoKind {
    pub fn api_segment(self) -> &'static str {
        match self {
            Self::Model => "models",
            Self::Dataset => "datasets",
        }
    }
}

/// 仓库 + 修订；负责拼接元数据与文件下载地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub repo_id: String,
    pub revision: String,
    pub kind: RepoKind,
}

impl RepoRef {
    pub fn new(repo_id: impl Into<String>, revision: impl Into<String>, kind: RepoKind) -> Self {
        Self {
            repo_id: repo_id.into(),
            revision: revision.into(),
            kind,
        }
    }

    pub fn metadata_url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/{}/{}/revision/{}",
            endpoint.trim_end_matches('/'),
            self.kind.api_segment(),
            self.repo_id,
            self.revision
        )
    }

    pub fn resolve_url(&self, endpoint: &str, rfilename: &str) -> String {
        format!(
            "{}/{}/{}/resolve/{}/{}",
            endpoint.trim_end_matches('/'),
            self.kind.api_segment(),
            self.repo_id,
            self.revision,
            rfilename
        )
    }

    /// 仓库名最后一段，用作默认输出目录。
    pub fn short_name(&self) -> &str {
        self.repo_id
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(&self.repo_id)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.kind.api_segment(),
            self.repo_id,
            self.revision
        )
    }
}

/// 选中的远程文件；构造后不再修改。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub repo_path: String,
    /// 0 表示未知。
    pub remote_size: u64,
    pub checksum: Option<String>,
    pub source_url: String,
}

impl FileRecord {
    pub fn local_path(&self, output_dir: &Path) -> PathBuf {
        self.repo_path
            .split('/')
            .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
            .fold(output_dir.to_path_buf(), |acc, seg| acc.join(seg))
    }

    /// 本地文件长度等于已知远程大小即视为完整；远程大小未知时永远返回 false。
    pub fn is_complete_at(&self, path: &Path) -> bool {
        if self.remote_size == 0 {
            return false;
        }
        std::fs::metadata(path)
            .map(|m| m.is_file() && m.len() == self.remote_size)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub record: FileRecord,
    pub local_path: PathBuf,
}

impl DownloadTask {
    pub fn new(record: FileRecord, output_dir: &Path) -> Self {
        let local_path = record.local_path(output_dir);
        Self { record, local_path }
    }
}

/// 单次下载调用内的传输状态，不跨任务共享。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferState {
    pub bytes_written: u64,
    pub total_expected: u64,
    pub local_existing_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded(TransferState),
    /// 服务器返回 416 且本地大小与远程一致。
    AlreadyComplete,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTally {
    pub total: usize,
    pub completed: usize,
    pub failed: Vec<String>,
}

impl ResultTally {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && self.completed == self.total
    }
}
