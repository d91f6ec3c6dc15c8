//! 网络错误分类与退避时长。

use std::time::Duration;

/// 传输层错误的粗分类，决定退避方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureKind {
    /// 连接被拒/断开、TLS 握手失败：指数退避。
    Disconnect,
    /// 超时：固定 1 秒。
    Timeout,
    Unknown,
}

impl FailureKind {
    pub(crate) fn classify(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Disconnect
        } else {
            Self::Unknown
        }
    }
}

/// `attempt` 从 0 开始计数。
pub(crate) fn backoff_for(kind: FailureKind, attempt: u32) -> Duration {
    match kind {
        FailureKind::Disconnect => {
            let secs = 1u64.checked_shl(attempt.min(6)).unwrap_or(64);
            Duration::from_secs(secs)
        }
        FailureKind::Timeout | FailureKind::Unknown => Duration::from_secs(1),
    }
}
