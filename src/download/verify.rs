//! 本地文件与远程记录的一致性检查（不联网、不重新下载）。

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::models::FileRecord;
use crate::error::{FetchError, Result};

const HASH_BLOCK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscrepancyKind {
    NotFound,
    SizeMismatch,
    ChecksumMismatch,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "未找到",
            Self::SizeMismatch => "大小不匹配",
            Self::ChecksumMismatch => "SHA256 不匹配",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub path: String,
    pub kind: DiscrepancyKind,
    pub local_value: String,
    pub remote_value: String,
}

pub fn verify(records: &[FileRecord], output_dir: &Path) -> Result<Vec<Discrepancy>> {
    let mut out = Vec::new();

    for record in records {
        let local_path = record.local_path(output_dir);
        let Ok(meta) = std::fs::metadata(&local_path) else {
            out.push(Discrepancy {
                path: record.repo_path.clone(),
                kind: DiscrepancyKind::NotFound,
                local_value: "0".to_string(),
                remote_value: record.remote_size.to_string(),
            });
            continue;
        };

        let local_size = meta.len();
        if record.remote_size > 0 && local_size != record.remote_size {
            out.push(Discrepancy {
                path: record.repo_path.clone(),
                kind: DiscrepancyKind::SizeMismatch,
                local_value: local_size.to_string(),
                remote_value: record.remote_size.to_string(),
            });
            continue;
        }

        let Some(expected) = record.checksum.as_deref() else {
            continue;
        };
        debug!(target: "verify", file = %record.repo_path, "计算 SHA256");
        let actual = compute_file_sha256(&local_path)?;
        if !eq_hash(&actual, expected) {
            out.push(Discrepancy {
                path: record.repo_path.clone(),
                kind: DiscrepancyKind::ChecksumMismatch,
                local_value: actual,
                remote_value: expected.to_string(),
            });
        }
    }

    info!(
        target: "verify",
        checked = records.len(),
        mismatched = out.len(),
        "本地文件检查完成"
    );
    Ok(out)
}

pub fn compute_file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| FetchError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BLOCK];
    loop {
        let n = file.read(&mut buf).map_err(|e| FetchError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn eq_hash(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
