//! 单文件断点续传下载。
//!
//! 流程：探测本地部分文件 → 带 `Range` 的 GET → 416 时用 HEAD 判断是否已完整 →
//! 分块写盘（每块后检查停止信号）→ 按远程总大小校验最终长度。
//!
//! 停止信号打断时保留部分文件供下次续传；其它写盘/读流错误会删除目标文件，
//! 避免下次从损坏的数据上继续。

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, warn};

use super::models::{DownloadOutcome, DownloadTask, TransferState};
use super::progress::{FileProgress, ProgressReporter};
use crate::base_system::context::Config;
use crate::base_system::file_cleaner::{ensure_parent_dir, file_len, remove_if_exists};
use crate::base_system::stop_signal::StopSignal;
use crate::error::{FetchError, Result};
use crate::network::{Response, Transport, auth_headers};

pub struct FileDownloader<'a> {
    transport: &'a Transport,
    token: Option<&'a str>,
    chunk_size: usize,
}

impl<'a> FileDownloader<'a> {
    pub fn new(transport: &'a Transport, config: &Config, token: Option<&'a str>) -> Self {
        Self {
            transport,
            token,
            chunk_size: config.chunk_size(),
        }
    }

    pub fn download(
        &self,
        task: &DownloadTask,
        stop: &StopSignal,
        progress: &ProgressReporter,
    ) -> Result<DownloadOutcome> {
        if stop.is_stopped() {
            return Err(FetchError::Cancelled);
        }

        let path = task.local_path.as_path();
        let url = task.record.source_url.as_str();
        let name = task.record.repo_path.as_str();
        ensure_parent_dir(path).map_err(|e| FetchError::io(path, e))?;

        let local_size = file_len(path);
        let mut headers = auth_headers(self.token);
        let mut offset = 0u64;
        if local_size > 0 {
            offset = local_size;
            headers.insert(RANGE, range_from(local_size));
            debug!(target: "download", file = name, offset, "检测到本地部分文件，尝试续传");
        }

        let mut resp = self.transport.request(Method::GET, url, &headers)?;

        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            let remote_total = self
                .probe_remote_size(url, &headers)
                .or_else(|| resp.content_range_total())
                .unwrap_or(0);
            drop(resp);

            if remote_total > 0 && local_size == remote_total {
                debug!(target: "download", file = name, "文件已完整下载");
                return Ok(DownloadOutcome::AlreadyComplete);
            }

            info!(
                target: "download",
                file = name,
                local = local_size,
                remote = remote_total,
                "服务器拒绝续传或本地文件不完整，从头开始下载"
            );
            remove_if_exists(path).map_err(|e| FetchError::io(path, e))?;
            headers.remove(RANGE);
            offset = 0;

            resp = self.transport.request(Method::GET, url, &headers)?;
            if !resp.status().is_success() {
                return Err(FetchError::Status {
                    url: resp.url().to_string(),
                    status: resp.status(),
                });
            }
        }

        if offset > 0 && resp.status() != StatusCode::PARTIAL_CONTENT {
            warn!(
                target: "download",
                file = name,
                status = %resp.status(),
                "服务器忽略了 Range 请求，重新完整写入"
            );
            offset = 0;
        }

        let total = expected_total(&resp, offset);
        let mut state = TransferState {
            bytes_written: 0,
            total_expected: total,
            local_existing_bytes: offset,
        };

        let bar = progress.file_bar(name);
        bar.start(offset, total);

        match self.stream_to_disk(resp, path, offset, &mut state, stop, &bar) {
            Ok(()) => {}
            Err(FetchError::Cancelled) => {
                info!(
                    target: "download",
                    file = name,
                    written = offset + state.bytes_written,
                    "已停止，保留部分文件以便续传"
                );
                return Err(FetchError::Cancelled);
            }
            Err(err) => {
                discard(path);
                return Err(err);
            }
        }

        let final_size = file_len(path);
        if total > 0 && final_size != total {
            warn!(
                target: "download",
                file = name,
                local = final_size,
                remote = total,
                "文件大小不匹配，已删除"
            );
            discard(path);
            return Err(FetchError::SizeMismatch {
                path: path.to_path_buf(),
                expected: total,
                actual: final_size,
            });
        }

        bar.finish();
        Ok(DownloadOutcome::Downloaded(state))
    }

    /// 416 后用不带 Range 的 HEAD 询问远程总大小；失败时返回 `None`。
    fn probe_remote_size(&self, url: &str, headers: &HeaderMap) -> Option<u64> {
        let mut head_headers = headers.clone();
        head_headers.remove(RANGE);
        match self.transport.request(Method::HEAD, url, &head_headers) {
            Ok(resp) if resp.status().is_success() => resp.content_length().filter(|n| *n > 0),
            Ok(resp) => {
                debug!(target: "download", %url, status = %resp.status(), "HEAD 未返回大小");
                None
            }
            Err(err) => {
                debug!(target: "download", %url, error = %err, "HEAD 请求失败");
                None
            }
        }
    }

    fn stream_to_disk(
        &self,
        resp: Response,
        path: &Path,
        offset: u64,
        state: &mut TransferState,
        stop: &StopSignal,
        bar: &FileProgress,
    ) -> Result<()> {
        let url = resp.url().to_string();
        let mut body = resp.into_body();
        let mut file = open_destination(path, offset > 0)?;
        let mut buf = Vec::with_capacity(self.chunk_size);

        loop {
            buf.clear();
            let n = (&mut body)
                .take(self.chunk_size as u64)
                .read_to_end(&mut buf)
                .map_err(|source| FetchError::Stream {
                    url: url.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }

            file.write_all(&buf).map_err(|e| FetchError::io(path, e))?;
            state.bytes_written += n as u64;
            bar.inc(n as u64);

            if stop.is_stopped() {
                file.flush().map_err(|e| FetchError::io(path, e))?;
                return Err(FetchError::Cancelled);
            }
        }

        file.flush().map_err(|e| FetchError::io(path, e))
    }
}

fn open_destination(path: &Path, resume: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.create(true);
    if resume {
        opts.append(true);
    } else {
        opts.write(true).truncate(true);
    }
    opts.open(path).map_err(|e| FetchError::io(path, e))
}

fn range_from(offset: u64) -> HeaderValue {
    HeaderValue::from_str(&format!("bytes={offset}-")).unwrap_or(HeaderValue::from_static("bytes=0-"))
}

/// `Content-Range` 的总长优先；否则 `Content-Length`（续传时加上已有偏移）。0 表示未知。
fn expected_total(resp: &Response, offset: u64) -> u64 {
    resp.content_range_total()
        .or_else(|| resp.content_length().map(|len| len + offset))
        .unwrap_or(0)
}

fn discard(path: &Path) {
    if let Err(err) = remove_if_exists(path) {
        warn!(target: "download", path = %path.display(), error = %err, "删除损坏文件失败");
    }
}
