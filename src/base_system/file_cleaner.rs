//! 下载目标文件的探测与清理。

use std::fs;
use std::io;
use std::path::Path;

/// 本地文件长度；不存在或不是普通文件时返回 0。
pub fn file_len(path: impl AsRef<Path>) -> u64 {
    fs::metadata(path.as_ref())
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .unwrap_or(0)
}

pub fn ensure_parent_dir(path: impl AsRef<Path>) -> io::Result<()> {
    match path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// 删除文件；文件本就不存在时返回 `Ok(false)`。
pub fn remove_if_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    match fs::remove_file(path.as_ref()) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
