//! 网络/文件读取原语
//!
//! worker 线程通过 `Fetcher` 取得资源的原始字节。非 2xx 的状态码不算作
//! `Err`：由 worker 统一转换为资源级别的失败。`Err` 只表示传输层异常。

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;

pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    pub fn with_status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 被 worker 的多个线程同时调用
pub trait Fetcher: Send + Sync {
    fn fetch(&self, uri: &str) -> anyhow::Result<FetchResponse>;
}

/// 基于 reqwest blocking client 的 HTTP 读取
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}
// new & init
impl HttpFetcher {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            // 不设置超时：卡住的请求只影响它自己的资源
            .timeout(None::<std::time::Duration>)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client })
    }
}
impl Fetcher for HttpFetcher {
    fn fetch(&self, uri: &str) -> anyhow::Result<FetchResponse> {
        log::debug!("GET {}", uri);
        let mut response = self.client.get(uri).send().with_context(|| format!("failed to send request for {uri}"))?;

        let status = response.status().as_u16();
        let mut body = Vec::new();
        if response.status().is_success() {
            response.read_to_end(&mut body).with_context(|| format!("failed to read response body of {uri}"))?;
        }

        Ok(FetchResponse { status, body })
    }
}

/// 从本地目录读取，文件不存在时返回 404
pub struct FileFetcher {
    root: PathBuf,
}
impl FileFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `file://` 前缀和开头的 `/` 都相对于 root 解析；不允许 `..` 跳出 root
    fn resolve(&self, uri: &str) -> Option<PathBuf> {
        let rel = uri.strip_prefix("file://").unwrap_or(uri).trim_start_matches('/');
        let rel = Path::new(rel);
        if rel.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return None;
        }
        Some(self.root.join(rel))
    }
}
impl Fetcher for FileFetcher {
    fn fetch(&self, uri: &str) -> anyhow::Result<FetchResponse> {
        let Some(path) = self.resolve(uri) else {
            return Ok(FetchResponse::with_status(403));
        };

        match std::fs::read(&path) {
            Ok(body) => Ok(FetchResponse::ok(body)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchResponse::with_status(404)),
            Err(e) => Err(e).with_context(|| format!("failed to read {:?}", path)),
        }
    }
}

/// http(s) 走网络，其余走本地目录
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}
impl DefaultFetcher {
    pub fn new(asset_root: impl Into<PathBuf>, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(user_agent)?,
            file: FileFetcher::new(asset_root),
        })
    }
}
impl Fetcher for DefaultFetcher {
    fn fetch(&self, uri: &str) -> anyhow::Result<FetchResponse> {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            self.http.fetch(uri)
        } else {
            self.file.fetch(uri)
        }
    }
}
