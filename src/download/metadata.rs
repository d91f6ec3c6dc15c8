//! 仓库修订元数据：`GET {endpoint}/api/{models|datasets}/{repo}/revision/{rev}`。

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::models::RepoRef;
use crate::error::{FetchError, Result};
use crate::network::{Transport, auth_headers};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepoMetadata {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub siblings: Vec<Sibling>,
    /// 服务端预先统计的仓库总占用。
    #[serde(default, rename = "usedStorage")]
    pub used_storage: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Sibling {
    #[serde(default)]
    pub rfilename: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LfsInfo {
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl Sibling {
    /// 负数或缺失视为 0（未知）。
    pub fn known_size(&self) -> u64 {
        self.size
            .or_else(|| self.lfs.as_ref().and_then(|l| l.size))
            .filter(|s| *s > 0)
            .map(|s| s as u64)
            .unwrap_or(0)
    }

    pub fn checksum(&self) -> Option<&str> {
        self.sha256
            .as_deref()
            .or_else(|| self.lfs.as_ref().and_then(|l| l.sha256.as_deref()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

pub fn fetch_metadata(
    transport: &Transport,
    endpoint: &str,
    repo: &RepoRef,
    token: Option<&str>,
) -> Result<RepoMetadata> {
    let url = repo.metadata_url(endpoint);
    info!(target: "metadata", %repo, "获取仓库元数据");
    debug!(target: "metadata", %url, "元数据地址");

    let body = transport.fetch_bytes(&url, &auth_headers(token))?;
    parse_metadata(&url, &body)
}

pub(crate) fn parse_metadata(url: &str, body: &[u8]) -> Result<RepoMetadata> {
    let raw: Value = serde_json::from_slice(body).map_err(|source| FetchError::Metadata {
        url: url.to_string(),
        source,
    })?;
    debug!(target: "metadata", "API 响应: {raw:#}");

    serde_json::from_value(raw).map_err(|source| FetchError::Metadata {
        url: url.to_string(),
        source,
    })
}
