use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::asset_worker::WorkerSettings;
use crate::binary_loader::BinaryLoader;
use crate::fetcher::{DefaultFetcher, Fetcher};
use crate::loader::LoaderTable;
use crate::texture_loader::TextureLoader;

/// 加载管线配置，对应 TOML 中的三个 section，所有字段都有默认值
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetPipelineConfig {
    pub worker: WorkerConfig,
    pub fetch: FetchConfig,
    pub texture: TextureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// worker 批量发回结果的间隔
    pub tick_interval_ms: u64,
    /// 并发 fetch/解码的线程数
    pub fetch_threads: usize,
}
impl Default for WorkerConfig {
    fn default() -> Self {
        let defaults = WorkerSettings::default();
        Self {
            tick_interval_ms: defaults.tick_interval.as_millis() as u64,
            fetch_threads: defaults.fetch_threads,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// 非 http(s) uri 的根目录；相对路径基于配置文件所在目录
    pub asset_root: PathBuf,
    pub user_agent: String,
}
impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("assets"),
            user_agent: "Kiln-Asset-Fetcher/1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// false 时 worker 不解码图片，解码推迟到主线程的同步阶段
    pub async_decode: bool,
}
impl Default for TextureConfig {
    fn default() -> Self {
        Self { async_decode: true }
    }
}

// new & init
impl AssetPipelineConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;

        let mut config = Self::from_toml_str(&content).with_context(|| format!("failed to parse config {:?}", path))?;
        if config.fetch.asset_root.is_relative()
            && let Some(dir) = path.parent()
        {
            config.fetch.asset_root = dir.join(&config.fetch.asset_root);
        }
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        anyhow::ensure!(config.worker.tick_interval_ms > 0, "worker.tick_interval_ms must be positive");
        anyhow::ensure!(config.worker.fetch_threads > 0, "worker.fetch_threads must be positive");
        Ok(config)
    }
}
// tools
impl AssetPipelineConfig {
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            tick_interval: Duration::from_millis(self.worker.tick_interval_ms),
            fetch_threads: self.worker.fetch_threads,
        }
    }

    /// 内置的 loader: Texture 和 Binary
    pub fn loader_table(&self) -> Arc<LoaderTable> {
        LoaderTable::builder()
            .register(TextureLoader::KIND, TextureLoader::with_async_decode(self.texture.async_decode))
            .register(BinaryLoader::KIND, BinaryLoader)
            .build()
    }

    pub fn fetcher(&self) -> anyhow::Result<Arc<dyn Fetcher>> {
        Ok(Arc::new(DefaultFetcher::new(self.fetch.asset_root.clone(), &self.fetch.user_agent)?))
    }
}
