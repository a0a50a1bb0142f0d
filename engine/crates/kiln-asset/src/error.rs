use std::any::Any;

use thiserror::Error;

/// 单个资源加载失败的原因
///
/// 所有错误都只影响出错的那个资源：在产生它的阶段被捕获，
/// 转成字符串写进 `Resource::error`，资源状态变为 `Failed`。
/// 不会作为错误跨越 worker/主线程边界传播。
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no loader registered for resource type '{kind}' (uri: {uri})")]
    UnknownLoaderType { uri: String, kind: String },

    #[error("failed to fetch '{uri}': {reason}")]
    NetworkFailure { uri: String, reason: String },

    #[error("failed to decode '{uri}': {reason}")]
    DecodeFailure { uri: String, reason: String },

    #[error("device rejected '{uri}': {reason}")]
    DeviceUploadFailure { uri: String, reason: String },
}

impl LoadError {
    pub fn network_status(uri: &str, status: u16) -> Self {
        Self::NetworkFailure {
            uri: uri.to_string(),
            reason: format!("HTTP status {status}"),
        }
    }
}

/// 调用方的编程错误，在调用处立即返回，不会延迟到 update
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource '{0}' is already registered")]
    DuplicateUri(String),

    #[error("resource '{0}' is not registered")]
    UnknownUri(String),
}

/// 把 `catch_unwind` 捕获到的 panic 转成可读的失败原因
pub(crate) fn panic_message(source: &str, panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("{source} panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("{source} panicked: {msg}")
    } else {
        format!("{source} panicked")
    }
}
