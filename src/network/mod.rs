//! 网络层入口。
//!
//! - `transport` — 请求、重定向、重试与镜像改写
//! - `retry`     — 错误分类与退避时长

pub(crate) mod retry;
pub mod transport;

pub use transport::{Response, Transport, auth_headers};
