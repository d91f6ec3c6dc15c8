//! hf-fast：Hugging Face 兼容仓库的并发下载器。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/停止信号/文件探测等基础设施
//! - `network`：HTTP 传输层（重定向、重试、LFS 镜像改写）
//! - `download`：元数据、文件筛选、单文件续传、并发调度、校验与汇总
//! - `error`：错误类型

pub mod base_system;
pub mod download;
pub mod error;
pub mod network;

pub use base_system::context::Config;
pub use base_system::stop_signal::StopSignal;
pub use error::{FetchError, Result};
