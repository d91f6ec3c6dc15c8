//! HTTP 传输层：手动跟随重定向、网络错误退避重试、LFS 域名改走镜像。
//!
//! 一个 `Transport` 由所有下载线程共享；每次请求互不影响。

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONNECTION, HeaderMap,
    HeaderName, HeaderValue, LOCATION, USER_AGENT,
};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, error, warn};

use super::retry::{FailureKind, backoff_for};
use crate::base_system::context::Config;
use crate::base_system::stop_signal::StopSignal;
use crate::error::{FetchError, Result};

/// 一次请求的结果：状态、响应头与尚未读取的响应体。
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: reqwest::blocking::Response,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// 最终（重定向之后）的地址。
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn content_length(&self) -> Option<u64> {
        header_u64(&self.headers, CONTENT_LENGTH)
    }

    /// `Content-Range: bytes a-b/TOTAL` 或 `bytes */TOTAL` 中的 TOTAL。
    pub fn content_range_total(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
    }

    pub fn into_body(self) -> reqwest::blocking::Response {
        self.body
    }
}

impl From<reqwest::blocking::Response> for Response {
    fn from(body: reqwest::blocking::Response) -> Self {
        Self {
            status: body.status(),
            headers: body.headers().clone(),
            url: body.url().clone(),
            body,
        }
    }
}

pub struct Transport {
    client: Client,
    endpoint: String,
    user_agent: HeaderValue,
    lfs_host_patterns: Vec<String>,
    max_retries: u32,
    max_redirects: u32,
    stop: StopSignal,
}

impl Transport {
    pub fn new(config: &Config, stop: StopSignal) -> Result<Self> {
        // reqwest 未启用 gzip，要求 identity 编码以保证 Content-Length 与落盘字节一致。
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout())
            .timeout(None::<Duration>)
            .build()
            .map_err(FetchError::Client)?;

        let user_agent = HeaderValue::from_str(config.user_agent.trim())
            .unwrap_or_else(|_| HeaderValue::from_static("hf-fast"));

        Ok(Self {
            client,
            endpoint: config.endpoint_base().to_string(),
            user_agent,
            lfs_host_patterns: config
                .lfs_host_patterns
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            max_retries: config.max_retries.max(1),
            max_redirects: config.max_redirects,
            stop,
        })
    }

    /// 发起请求并返回流式响应。2xx 与 416 原样返回，3xx 自动跟随，其余状态码视为失败。
    pub fn request(&self, method: Method, url: &str, headers: &HeaderMap) -> Result<Response> {
        let mut current = self.mirror_rewrite(parse_url(url)?)?;
        let mut redirects_left = self.max_redirects;

        loop {
            let resp = self.send_with_retry(&method, &current, headers)?;
            let status = resp.status();

            if status.is_success() || status == StatusCode::RANGE_NOT_SATISFIABLE {
                return Ok(Response::from(resp));
            }

            if is_redirect(status) {
                let Some(location) = resp.headers().get(LOCATION).and_then(|v| v.to_str().ok())
                else {
                    return Err(FetchError::Status {
                        url: current.to_string(),
                        status,
                    });
                };
                if redirects_left == 0 {
                    error!(target: "transport", url = %current, "重定向次数过多");
                    return Err(FetchError::TooManyRedirects {
                        url: current.to_string(),
                        limit: self.max_redirects,
                    });
                }
                redirects_left -= 1;

                let next = current.join(location).map_err(|e| FetchError::InvalidUrl {
                    url: location.to_string(),
                    reason: e.to_string(),
                })?;
                let next = self.mirror_rewrite(next)?;
                debug!(target: "transport", from = %current, to = %next, "重定向");
                current = next;
                continue;
            }

            warn!(
                target: "transport",
                url = %current,
                status = %status,
                "HTTP 错误: {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            return Err(FetchError::Status {
                url: current.to_string(),
                status,
            });
        }
    }

    /// GET 并完整读取响应体。
    pub fn fetch_bytes(&self, url: &str, headers: &HeaderMap) -> Result<Vec<u8>> {
        let resp = self.request(Method::GET, url, headers)?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                url: resp.url().to_string(),
                status: resp.status(),
            });
        }
        let final_url = resp.url().to_string();
        let bytes = resp
            .into_body()
            .bytes()
            .map_err(|source| FetchError::Network {
                url: final_url,
                attempts: 1,
                source,
            })?;
        Ok(bytes.to_vec())
    }

    fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<reqwest::blocking::Response> {
        let headers = self.outbound_headers(method, headers);
        let mut attempt = 0u32;

        loop {
            debug!(target: "transport", %method, %url, attempt = attempt + 1, "HTTP 请求");
            let err = match self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .send()
            {
                Ok(resp) => return Ok(resp),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= self.max_retries {
                error!(
                    target: "transport",
                    %url,
                    error = %err,
                    "连接失败，已达到最大重试次数"
                );
                return Err(FetchError::Network {
                    url: url.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }

            let kind = FailureKind::classify(&err);
            let wait = backoff_for(kind, attempt - 1);
            warn!(
                target: "transport",
                %url,
                ?kind,
                error = %err,
                "请求失败 (尝试 {}/{})，{}s 后重试",
                attempt,
                self.max_retries,
                wait.as_secs()
            );
            if !self.stop.sleep(wait) {
                return Err(FetchError::Cancelled);
            }
        }
    }

    fn outbound_headers(&self, method: &Method, headers: &HeaderMap) -> HeaderMap {
        let mut out = headers.clone();
        if !out.contains_key(USER_AGENT) {
            out.insert(USER_AGENT, self.user_agent.clone());
        }
        if *method == Method::GET || *method == Method::POST {
            out.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        } else {
            out.remove(ACCEPT_RANGES);
        }
        out
    }

    fn mirror_rewrite(&self, url: Url) -> Result<Url> {
        match mirror_url(&url, &self.endpoint, &self.lfs_host_patterns) {
            Some(rewritten) => {
                debug!(target: "transport", from = %url, to = %rewritten, "LFS 文件，使用代理地址");
                parse_url(&rewritten)
            }
            None => Ok(url),
        }
    }
}

/// 可选的 `Authorization: Bearer {token}`；空 token 视为未提供。
pub fn auth_headers(token: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty())
        && let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}"))
    {
        headers.insert(AUTHORIZATION, value);
    }
    headers
}

/// 主机名命中 LFS 特征时返回 `{endpoint}/resolve/{path}`。
pub(crate) fn mirror_url(url: &Url, endpoint: &str, patterns: &[String]) -> Option<String> {
    let host = url.host_str()?;
    if !patterns.iter().any(|p| host.contains(p.as_str())) {
        return None;
    }
    Some(format!(
        "{}/resolve/{}",
        endpoint,
        url.path().trim_start_matches('/')
    ))
}

pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    value
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|s| *s != "*")
        .and_then(|s| s.parse::<u64>().ok())
}

pub(crate) fn header_u64(headers: &HeaderMap, name: HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
