//! 下载调度：有界并发的工作线程池。
//!
//! 调度线程通过容量为 0 的 channel 把任务交给空闲 worker（无空闲时阻塞），
//! 每次交付前检查停止信号；worker 各自完成一次 `FileDownloader::download`
//! 并把结果记入加锁的汇总。所有 worker 退出后才返回。

use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self as channel, SendTimeoutError};
use tracing::{debug, error, info, warn};

use super::downloader::FileDownloader;
use super::models::{DownloadOutcome, DownloadTask, FileRecord, ResultTally};
use super::progress::{FileEvent, ProgressReporter};
use crate::base_system::context::Config;
use crate::base_system::stop_signal::StopSignal;
use crate::network::Transport;

const ADMISSION_POLL: Duration = Duration::from_millis(100);

pub struct DownloadCoordinator<'a> {
    transport: &'a Transport,
    config: &'a Config,
    progress: ProgressReporter,
}

impl<'a> DownloadCoordinator<'a> {
    pub fn new(transport: &'a Transport, config: &'a Config, progress: ProgressReporter) -> Self {
        Self {
            transport,
            config,
            progress,
        }
    }

    pub fn download_all(
        &self,
        records: &[FileRecord],
        output_dir: &Path,
        token: Option<&str>,
        concurrency_limit: usize,
        stop: &StopSignal,
    ) -> ResultTally {
        let tally = Mutex::new(ResultTally {
            total: records.len(),
            ..ResultTally::default()
        });

        if let Err(err) = std::fs::create_dir_all(output_dir) {
            error!(
                target: "download",
                dir = %output_dir.display(),
                error = %err,
                "无法创建输出目录"
            );
        }

        let downloader = FileDownloader::new(self.transport, self.config, token);
        let workers = concurrency_limit.max(1).min(records.len().max(1));
        let (tx, rx) = channel::bounded::<DownloadTask>(0);

        thread::scope(|scope| {
            for idx in 0..workers {
                let rx = rx.clone();
                let downloader = &downloader;
                let tally = &tally;
                let spawned = thread::Builder::new()
                    .name(format!("download-{idx}"))
                    .spawn_scoped(scope, move || {
                        for task in rx.iter() {
                            self.run_task(downloader, &task, stop, tally);
                        }
                    });
                if let Err(err) = spawned {
                    error!(target: "download", error = %err, "无法启动下载线程");
                }
            }
            drop(rx);

            for record in records {
                if stop.is_stopped() {
                    warn!(target: "download", "收到停止信号，不再调度新的下载");
                    break;
                }

                let task = DownloadTask::new(record.clone(), output_dir);
                if record.is_complete_at(&task.local_path) {
                    self.progress.println(format!("已存在: {}", record.repo_path));
                    self.progress.emit(FileEvent::Skipped {
                        path: record.repo_path.clone(),
                    });
                    lock(&tally).completed += 1;
                    continue;
                }

                if !admit(&tx, task, stop) {
                    break;
                }
            }
            drop(tx);
        });

        tally.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn run_task(
        &self,
        downloader: &FileDownloader<'_>,
        task: &DownloadTask,
        stop: &StopSignal,
        tally: &Mutex<ResultTally>,
    ) {
        let name = task.record.repo_path.as_str();
        self.progress.emit(FileEvent::Started {
            path: name.to_string(),
        });
        debug!(target: "download", file = name, url = %task.record.source_url, "开始下载");

        let ok = match downloader.download(task, stop, &self.progress) {
            Ok(outcome) => {
                if let DownloadOutcome::Downloaded(state) = outcome {
                    debug!(
                        target: "download",
                        file = name,
                        written = state.bytes_written,
                        resumed_from = state.local_existing_bytes,
                        "下载完成"
                    );
                }
                lock(tally).completed += 1;
                self.progress.println(format!("已完成: {name}"));
                true
            }
            Err(err) => {
                if err.is_cancelled() {
                    info!(target: "download", file = name, "下载已取消");
                } else {
                    error!(target: "download", file = name, error = %err, "下载失败");
                    self.progress.println(format!("下载失败 {name}: {err}"));
                }
                lock(tally).failed.push(name.to_string());
                false
            }
        };

        self.progress.emit(FileEvent::Finished {
            path: name.to_string(),
            ok,
        });
    }
}

/// 阻塞直到有 worker 接手任务；等待期间每 100ms 复查停止信号。
fn admit(tx: &channel::Sender<DownloadTask>, mut task: DownloadTask, stop: &StopSignal) -> bool {
    loop {
        match tx.send_timeout(task, ADMISSION_POLL) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(back)) => {
                if stop.is_stopped() {
                    warn!(target: "download", "收到停止信号，不再调度新的下载");
                    return false;
                }
                task = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                error!(target: "download", "下载线程已全部退出");
                return false;
            }
        }
    }
}

fn lock(tally: &Mutex<ResultTally>) -> std::sync::MutexGuard<'_, ResultTally> {
    tally.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
