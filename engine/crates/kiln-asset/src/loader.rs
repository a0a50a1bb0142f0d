use std::collections::HashMap;
use std::sync::Arc;

use crate::error::LoadError;
use crate::gfx_device::GfxDevice;
use crate::resource::{Resource, ResourceForm};

/// 同步阶段和卸载阶段可以访问的主线程上下文
pub struct LoadContext<'a> {
    pub device: &'a mut dyn GfxDevice,
    /// 当前帧序号，只用于日志
    pub frame_id: u64,
}

/// 一种资源类型的加载策略
///
/// 三个阶段:
/// 1. `load_async`: 在 worker 线程执行，拿到 fetch 得到的字节，完成所有不需要设备的工作。
///    返回资源的新形态，其中的缓冲随消息一起移交给主线程。
/// 2. `load_sync`: 在主线程执行，可以访问设备。返回 `false` 表示尚未完成，下一帧会再次调用，
///    因此必须可以重复调用。
/// 3. `unload`: 在主线程执行，释放设备资源和平台句柄。
///
/// loader 本身不保存任何可变状态，同一类型的多个资源可以同时处于加载中。
pub trait ResourceLoader: Send + Sync {
    fn load_async(&self, resource: &Resource, payload: Vec<u8>) -> Result<ResourceForm, LoadError>;

    fn load_sync(&self, resource: &mut Resource, ctx: &mut LoadContext) -> Result<bool, LoadError>;

    fn unload(&self, resource: &mut Resource, ctx: &mut LoadContext);
}

/// 资源类型 -> loader 的映射
///
/// 启动时构建一次之后不再修改，由注册表和 worker 通过 `Arc` 只读共享。
#[derive(Default)]
pub struct LoaderTable {
    loaders: HashMap<String, Arc<dyn ResourceLoader>>,
}
// new & init
impl LoaderTable {
    pub fn builder() -> LoaderTableBuilder {
        LoaderTableBuilder::default()
    }
}
// getters
impl LoaderTable {
    #[inline]
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn ResourceLoader>> {
        self.loaders.get(kind)
    }

    pub fn resolve(&self, resource: &Resource) -> Result<&Arc<dyn ResourceLoader>, LoadError> {
        self.get(resource.kind()).ok_or_else(|| LoadError::UnknownLoaderType {
            uri: resource.uri().to_string(),
            kind: resource.kind().to_string(),
        })
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.loaders.keys().map(String::as_str)
    }
}

#[derive(Default)]
pub struct LoaderTableBuilder {
    loaders: HashMap<String, Arc<dyn ResourceLoader>>,
}
impl LoaderTableBuilder {
    /// 同一类型重复注册时，后注册的覆盖先注册的
    pub fn register(mut self, kind: impl Into<String>, loader: impl ResourceLoader + 'static) -> Self {
        let kind = kind.into();
        if self.loaders.insert(kind.clone(), Arc::new(loader)).is_some() {
            log::warn!("loader for resource type '{}' registered twice, keeping the last one", kind);
        }
        self
    }

    pub fn build(self) -> Arc<LoaderTable> {
        Arc::new(LoaderTable { loaders: self.loaders })
    }
}
