//! 进程级停止信号：Ctrl-C 置位，下载线程在分块边界轮询。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

const POLL_SLICE: Duration = Duration::from_millis(100);

/// 只会被置位一次、永不清除的共享标志。
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// 分片睡眠，每 100ms 检查一次标志。返回 `false` 表示睡眠被停止信号打断。
    pub fn sleep(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_stopped() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }

    /// 注册 Ctrl-C 处理：只置位标志，让进行中的下载自行收尾。
    pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            if !signal.is_stopped() {
                warn!(target: "startup", "检测到中断信号，正在停止下载...");
            }
            signal.stop();
        })
    }
}
