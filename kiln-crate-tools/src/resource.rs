use std::path::{Path, PathBuf};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
///
/// # 使用示例
/// ```ignore
/// let texture = KilnPath::assets_path("uv_checker.png"); // assets/uv_checker.png
/// let config = KilnPath::config_path();                  // kiln.toml
/// ```
pub struct KilnPath {}
// 核心路径
impl KilnPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        // 本 crate 位于工作区根目录下一层
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().unwrap_or(manifest_dir).to_path_buf()
    }

    pub fn target_path() -> PathBuf {
        Self::workspace_path().join("target")
    }
}
// 根目录下
impl KilnPath {
    /// 获取 `assets/` 目录
    pub fn assets_dir() -> PathBuf {
        Self::workspace_path().join("assets")
    }

    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::assets_dir().join(filename)
    }

    /// 默认的管线配置文件
    pub fn config_path() -> PathBuf {
        Self::workspace_path().join("kiln.toml")
    }
}
