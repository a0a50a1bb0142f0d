//! 异步资源加载管线
//!
//! 主线程持有 `ResourceManager`，每帧调用一次 `update` 推进所有资源的状态机；
//! `Asset-Worker` 线程负责 fetch 和 loader 的异步阶段 (例如图片解码)，
//! 完成的资源按固定间隔批量发回。GPU 上传等需要设备的工作只在主线程的同步阶段执行。
//!
//! # 状态流转
//! `Initializing -> LoadingAsync -> LoadingSync -> Loaded`，任一阶段失败变为 `Failed`，
//! 任意状态都可以被标记为 `Unloaded` 并在下一帧移除。
//!
//! # 使用示例
//! ```ignore
//! use kiln_asset::{AssetPipelineConfig, HeadlessDevice, Resource, ResourceManager};
//!
//! let config = AssetPipelineConfig::default();
//! let mut manager = ResourceManager::from_config(&config)?;
//! let mut device = HeadlessDevice::new();
//!
//! manager.load_resource_list([Resource::texture("textures/albedo.png")])?;
//! while !manager.is_settled() {
//!     manager.update(&mut device);
//! }
//! ```

pub mod asset_worker;
pub mod binary_loader;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod gfx_device;
pub mod image_decoder;
pub mod loader;
pub mod resource;
pub mod resource_manager;
pub mod texture;
pub mod texture_loader;
pub mod transport;

#[cfg(test)]
mod test_utils;

pub use config::AssetPipelineConfig;
pub use error::{LoadError, RegistryError};
pub use gfx_device::{GfxDevice, HeadlessDevice, TextureHandle};
pub use loader::{LoadContext, LoaderTable, ResourceLoader};
pub use resource::{Resource, ResourceForm, ResourceStatus, Transferable};
pub use resource_manager::{ResourceManager, StatusCounts};
