//! 全局配置结构（Config）与默认值。
//!
//! 启动时构造一次，随后以引用传入 Transport / 元数据 / 下载调度，不存在可变全局状态。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

pub const DEFAULT_ENDPOINT: &str = "https://aifasthub.com";
pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 网络配置
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_lfs_host_patterns")]
    pub lfs_host_patterns: Vec<String>,

    // 下载配置
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub save_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            revision: default_revision(),
            max_workers: default_max_workers(),
            request_timeout: default_request_timeout(),
            max_retries: default_max_retries(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            lfs_host_patterns: default_lfs_host_patterns(),
            chunk_size: default_chunk_size(),
            save_path: String::new(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 10] = [
            FieldMeta {
                name: "endpoint",
                description: "API 端点（元数据与文件下载均走此地址）",
            },
            FieldMeta {
                name: "revision",
                description: "默认仓库修订/标签",
            },
            FieldMeta {
                name: "max_workers",
                description: "最大并发下载数",
            },
            FieldMeta {
                name: "request_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "网络错误时单个请求的最大尝试次数",
            },
            FieldMeta {
                name: "max_redirects",
                description: "最大重定向次数",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "lfs_host_patterns",
                description: "大文件（LFS）存储域名特征，命中时改走 endpoint/resolve 代理",
            },
            FieldMeta {
                name: "chunk_size",
                description: "流式写盘的分块大小（字节，上限 64 MiB）",
            },
            FieldMeta {
                name: "save_path",
                description: "保存路径（留空表示当前目录）",
            },
        ];
        &FIELDS
    }
}

impl Config {
    /// 规范化后的端点（去掉结尾的 `/`）。
    pub fn endpoint_base(&self) -> &str {
        self.endpoint.trim().trim_end_matches('/')
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// 写盘分块大小，限制在 1 字节到 64 MiB 之间。
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn default_save_dir(&self) -> PathBuf {
        if self.save_path.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.save_path)
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_max_workers() -> usize {
    4
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_redirects() -> u32 {
    5
}

fn default_user_agent() -> String {
    concat!("hf-fast/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_lfs_host_patterns() -> Vec<String> {
    vec![
        "cdn-lfs".to_string(),
        "lfs.huggingface.co".to_string(),
        "cdn-lfs.huggingface.co".to_string(),
    ]
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
