//! 文件筛选：按包含/排除正则过滤元数据中的文件列表，并计算总大小。

use regex::Regex;
use tracing::debug;

use super::metadata::RepoMetadata;
use super::models::{FileRecord, RepoRef};
use crate::error::{FetchError, Result};

#[derive(Debug, Clone, Default)]
pub struct FileSelector {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl FileSelector {
    /// 任一模式无法编译即失败（整个运行随之终止）。
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: compile_all(include)?,
            exclude: compile_all(exclude)?,
        })
    }

    /// 包含列表为空或命中任一包含模式，且未命中任何排除模式。
    pub fn matches(&self, rfilename: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|re| re.is_match(rfilename));
        let excluded = self.exclude.iter().any(|re| re.is_match(rfilename));
        included && !excluded
    }

    /// 保持元数据中的原始顺序；缺少 `rfilename` 的条目跳过。
    pub fn select(&self, metadata: &RepoMetadata, repo: &RepoRef, endpoint: &str) -> Vec<FileRecord> {
        metadata
            .siblings
            .iter()
            .filter_map(|sibling| {
                let name = sibling.rfilename.as_deref().filter(|n| !n.is_empty())?;
                if !self.matches(name) {
                    debug!(target: "metadata", file = name, "已过滤");
                    return None;
                }
                Some(FileRecord {
                    repo_path: name.to_string(),
                    remote_size: sibling.known_size(),
                    checksum: sibling.checksum().map(str::to_string),
                    source_url: repo.resolve_url(endpoint, name),
                })
            })
            .collect()
    }
}

/// 优先使用元数据里的 `usedStorage`，否则累加已知大小。
pub fn aggregate_size(metadata: &RepoMetadata, records: &[FileRecord]) -> u64 {
    metadata
        .used_storage
        .unwrap_or_else(|| records.iter().map(|r| r.remote_size).sum())
}

fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            let pattern = p.as_ref();
            Regex::new(pattern).map_err(|source| FetchError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
        })
        .collect()
}
