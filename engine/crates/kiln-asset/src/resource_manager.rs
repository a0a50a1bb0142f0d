use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::asset_worker::{AssetWorker, WorkerSettings};
use crate::config::AssetPipelineConfig;
use crate::error::RegistryError;
use crate::fetcher::Fetcher;
use crate::gfx_device::GfxDevice;
use crate::loader::{LoadContext, LoaderTable};
use crate::resource::{Resource, ResourceForm, ResourceStatus};
use crate::texture::{ResidentTexture, TextureForm};
use crate::transport::{ResourceBatch, TransportReceiver, transport_channel};

/// 各状态的资源数量
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct StatusCounts {
    pub initializing: usize,
    pub loading_async: usize,
    pub loading_sync: usize,
    pub loaded: usize,
    pub failed: usize,
    pub unloaded: usize,
}

/// 资源管理器 (注册表)
///
/// 整个异步加载管线在主线程侧的协调者。
/// 职责:
/// 1. 持有所有资源的权威副本，以 uri 为键，按注册顺序遍历。
/// 2. 每帧 `update` 推进状态机：派发新资源给 worker、执行 loader 的同步阶段、执行卸载。
/// 3. 在自己的 update 中处理 worker 发回的消息，不在任何回调中处理。
///
/// 设备只通过 `update` 的参数传入，worker 线程无法访问。
///
/// Drop 时不等待进行中的 fetch：worker 线程立即退出，仍在线程池中的任务结束后结果被丢弃。
/// 设备资源不会被自动释放，需要先 `unload_all` 并调用一次 `update`。
pub struct ResourceManager {
    /// 注册顺序即处理顺序；删除使用 retain，不打乱其余资源的相对顺序
    resources: IndexMap<String, Resource>,

    loaders: Arc<LoaderTable>,
    /// 先于 reply_receiver 销毁：worker 退出前的最后一次发送仍有接收方
    worker: AssetWorker,
    reply_receiver: TransportReceiver,

    next_ticket: u64,
    frame_id: u64,
}
// new & init
impl ResourceManager {
    pub fn new(loaders: Arc<LoaderTable>, fetcher: Arc<dyn Fetcher>, settings: &WorkerSettings) -> anyhow::Result<Self> {
        let (reply_sender, reply_receiver) = transport_channel();
        let worker = AssetWorker::spawn(loaders.clone(), fetcher, settings, reply_sender)?;

        Ok(Self {
            resources: IndexMap::new(),
            loaders,
            worker,
            reply_receiver,
            next_ticket: 1,
            frame_id: 0,
        })
    }

    pub fn from_config(config: &AssetPipelineConfig) -> anyhow::Result<Self> {
        Self::new(config.loader_table(), config.fetcher()?, &config.worker_settings())
    }
}
// getters
impl ResourceManager {
    #[inline]
    pub fn get(&self, uri: &str) -> Option<&Resource> {
        self.resources.get(uri)
    }

    #[inline]
    pub fn status(&self, uri: &str) -> Option<ResourceStatus> {
        self.resources.get(uri).map(Resource::status)
    }

    /// 已加载纹理的设备句柄
    pub fn texture(&self, uri: &str) -> Option<ResidentTexture> {
        let resource = self.resources.get(uri)?;
        match resource.form() {
            ResourceForm::Texture(TextureForm::Resident(texture)) if resource.status() == ResourceStatus::Loaded => {
                Some(*texture)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for resource in self.resources.values() {
            let slot = match resource.status() {
                ResourceStatus::Initializing => &mut counts.initializing,
                ResourceStatus::LoadingAsync => &mut counts.loading_async,
                ResourceStatus::LoadingSync => &mut counts.loading_sync,
                ResourceStatus::Loaded => &mut counts.loaded,
                ResourceStatus::Failed => &mut counts.failed,
                ResourceStatus::Unloaded => &mut counts.unloaded,
            };
            *slot += 1;
        }
        counts
    }

    /// 所有资源都已经 Loaded 或 Failed，且没有等待删除的资源
    pub fn is_settled(&self) -> bool {
        self.resources.values().all(|r| r.status().is_terminal())
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
}
// tools
impl ResourceManager {
    /// 注册一批新资源
    ///
    /// 任何一个 uri 已经注册过 (或在这批中重复) 时整批都不注册，直接返回错误。
    pub fn load_resource_list(&mut self, resources: impl IntoIterator<Item = Resource>) -> Result<(), RegistryError> {
        let resources: Vec<Resource> = resources.into_iter().collect();

        let mut seen = HashSet::with_capacity(resources.len());
        for resource in &resources {
            if self.resources.contains_key(resource.uri()) || !seen.insert(resource.uri()) {
                return Err(RegistryError::DuplicateUri(resource.uri().to_string()));
            }
        }

        for mut resource in resources {
            resource.ticket = self.next_ticket;
            self.next_ticket += 1;
            resource.status = ResourceStatus::Initializing;
            resource.error = None;
            resource.form = ResourceForm::Empty;

            log::info!("Request load {} resource: {}", resource.kind(), resource.uri());
            self.resources.insert(resource.uri().to_string(), resource);
        }
        Ok(())
    }

    /// 标记一批资源为 Unloaded，下一次 update 时卸载并移除
    ///
    /// 任何一个 uri 未注册时整批都不处理，直接返回错误。
    pub fn unload_resource_list<I>(&mut self, uris: I) -> Result<(), RegistryError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let uris: Vec<I::Item> = uris.into_iter().collect();
        for uri in &uris {
            let uri: &str = uri.as_ref();
            if !self.resources.contains_key(uri) {
                return Err(RegistryError::UnknownUri(uri.to_string()));
            }
        }

        for uri in &uris {
            let uri: &str = uri.as_ref();
            if let Some(resource) = self.resources.get_mut(uri) {
                log::info!("Request unload resource: {} ({})", resource.uri(), resource.status());
                resource.set_status(ResourceStatus::Unloaded);
            }
        }
        Ok(())
    }

    /// 卸载所有已注册的资源
    pub fn unload_all(&mut self) {
        for resource in self.resources.values_mut() {
            resource.set_status(ResourceStatus::Unloaded);
        }
    }

    /// 驱动加载流程 (每帧调用一次)
    ///
    /// 1. 按注册顺序遍历资源，每个资源最多推进一次：
    ///    - Initializing: 标记为 LoadingAsync，快照加入发往 worker 的批次
    ///    - LoadingSync: 执行 loader 的同步阶段
    ///    - Unloaded: 执行 loader 的卸载阶段，之后从注册表中移除
    /// 2. 发送本帧的批次。
    /// 3. 处理 worker 发回的消息：对应资源变为 LoadingSync 或 Failed，同步阶段在下一帧执行。
    pub fn update(&mut self, device: &mut dyn GfxDevice) {
        let _span = tracy_client::span!("ResourceManager::update");
        self.frame_id = self.frame_id.wrapping_add(1);

        let mut ctx = LoadContext {
            device,
            frame_id: self.frame_id,
        };
        let mut outgoing = ResourceBatch::new();
        let mut unloaded = 0usize;

        for resource in self.resources.values_mut() {
            match resource.status() {
                ResourceStatus::Initializing => {
                    resource.set_status(ResourceStatus::LoadingAsync);
                    outgoing.push(resource.snapshot());
                }
                ResourceStatus::LoadingSync => {
                    Self::run_sync_phase(&self.loaders, resource, &mut ctx);
                }
                ResourceStatus::Unloaded => {
                    Self::run_unload_phase(&self.loaders, resource, &mut ctx);
                    unloaded += 1;
                }
                ResourceStatus::LoadingAsync | ResourceStatus::Loaded | ResourceStatus::Failed => {}
            }
        }

        if unloaded > 0 {
            self.resources.retain(|_, r| r.status() != ResourceStatus::Unloaded);
            log::debug!("[F{}] removed {} unloaded resource(s)", self.frame_id, unloaded);
        }

        if !outgoing.is_empty() {
            log::debug!("[F{}] dispatching {} resource(s) to worker", self.frame_id, outgoing.len());
            self.worker.request_load(outgoing);
        }

        self.receive_replies();
    }

    fn run_sync_phase(loaders: &LoaderTable, resource: &mut Resource, ctx: &mut LoadContext) {
        let _span = tracy_client::span!("ResourceManager::run_sync_phase");
        let loader = match loaders.resolve(resource) {
            Ok(loader) => loader,
            Err(e) => {
                resource.fail(e);
                return;
            }
        };

        match loader.load_sync(resource, ctx) {
            Ok(true) => {
                resource.set_status(ResourceStatus::Loaded);
                log::info!("Resource loaded: {}", resource.uri());
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("Sync phase failed for {}: {}", resource.uri(), e);
                // 同步阶段可能已经创建了部分设备资源，失败前先释放
                loader.unload(resource, ctx);
                resource.fail(e);
            }
        }
    }

    fn run_unload_phase(loaders: &LoaderTable, resource: &mut Resource, ctx: &mut LoadContext) {
        // 类型未知的资源没有 loader，也不可能持有设备资源
        if let Some(loader) = loaders.get(resource.kind()) {
            loader.unload(resource, ctx);
        }
        resource.form = ResourceForm::Empty;
        log::info!("Resource unloaded: {}", resource.uri());
    }

    /// worker 的回复只在这里处理
    ///
    /// 回复只会覆盖同一次注册且仍处于 LoadingAsync 的资源；
    /// 期间被卸载 (或卸载后重新注册) 的资源的回复直接丢弃。
    fn receive_replies(&mut self) {
        for batch in self.reply_receiver.drain() {
            let _span = tracy_client::span!("ResourceManager::receive_replies");
            for reply in batch {
                match self.resources.get_mut(reply.uri()) {
                    Some(entry) if entry.ticket == reply.ticket && entry.status() == ResourceStatus::LoadingAsync => {
                        if let Some(error) = reply.error() {
                            log::warn!("[F{}] {} failed in worker: {}", self.frame_id, reply.uri(), error);
                        }
                        *entry = reply;
                    }
                    _ => {
                        log::debug!("[F{}] discarding stale reply for {}", self.frame_id, reply.uri());
                    }
                }
            }
        }
    }
}
