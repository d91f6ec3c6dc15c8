//! 进度上报：每个活动文件一个 CLI 进度条，外加可选的逐文件事件回调。

use std::sync::Arc;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::debug;

/// 单个文件的生命周期事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// 本地已完整，未发起请求。
    Skipped { path: String },
    Started { path: String },
    Finished { path: String, ok: bool },
}

pub type EventCallback = Arc<dyn Fn(&FileEvent) + Send + Sync>;

#[derive(Clone)]
pub struct ProgressReporter {
    mp: Option<MultiProgress>,
    cb: Option<EventCallback>,
}

impl ProgressReporter {
    /// 终端进度条（stderr）。
    pub fn cli() -> Self {
        Self {
            mp: Some(MultiProgress::with_draw_target(ProgressDrawTarget::stderr())),
            cb: None,
        }
    }

    /// 不绘制任何内容。
    pub fn hidden() -> Self {
        Self { mp: None, cb: None }
    }

    pub fn with_callback(mut self, cb: EventCallback) -> Self {
        self.cb = Some(cb);
        self
    }

    pub(crate) fn emit(&self, event: FileEvent) {
        if let Some(cb) = self.cb.as_ref() {
            cb(&event);
        }
    }

    /// 为一个文件创建进度条；总大小未知时只显示已下载字节数。
    pub(crate) fn file_bar(&self, name: &str) -> FileProgress {
        let Some(mp) = self.mp.as_ref() else {
            return FileProgress {
                bar: ProgressBar::hidden(),
            };
        };
        let bar = mp.add(ProgressBar::new(0));
        bar.set_style(unknown_style());
        bar.set_message(short_name(name));
        FileProgress { bar }
    }

    /// 在进度条上方打印一行，不打乱绘制；进度条不可见时直接写 stdout。
    pub fn println(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        match self.visible_bars() {
            Some(mp) => {
                if let Err(err) = mp.println(line) {
                    debug!(target: "download", error = %err, "进度条输出失败，改写 stderr");
                    eprintln!("{line}");
                }
            }
            None => println!("{line}"),
        }
    }

    /// 隐藏的 MultiProgress 会吞掉 println，这种情况按无进度条处理。
    fn visible_bars(&self) -> Option<&MultiProgress> {
        self.mp.as_ref().filter(|mp| !mp.is_hidden())
    }
}

pub(crate) struct FileProgress {
    bar: ProgressBar,
}

impl FileProgress {
    pub(crate) fn start(&self, position: u64, total: u64) {
        if total > 0 {
            self.bar.set_style(known_style());
            self.bar.set_length(total);
        }
        self.bar.set_position(position);
    }

    pub(crate) fn inc(&self, n: u64) {
        self.bar.inc(n);
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for FileProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

fn known_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg:30} [{bar:30.green/blue}] {percent:>3}% {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

fn unknown_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:30} 下载中 {bytes} ({bytes_per_sec})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn short_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}
