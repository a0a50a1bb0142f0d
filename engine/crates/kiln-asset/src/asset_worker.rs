use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender};
use crossbeam_utils::sync::WaitGroup;

use crate::error::{LoadError, panic_message};
use crate::fetcher::Fetcher;
use crate::loader::LoaderTable;
use crate::resource::{Resource, ResourceForm, ResourceStatus};
use crate::transport::{ResourceBatch, TransportReceiver, TransportSender, transport_channel};

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// 完成的资源按这个间隔批量发回注册表
    pub tick_interval: Duration,
    /// 同时进行 fetch/解码的线程数
    pub fetch_threads: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            fetch_threads: 4,
        }
    }
}

/// 资源异步阶段的执行者
///
/// ## 架构设计
/// - 内部的 `Asset-Worker` 线程负责调度：接收注册表发来的批次，把每个资源分发到线程池
/// - rayon 线程池执行 fetch + loader 的异步阶段，同一批次内的资源并发处理
/// - 完成的资源先进入 `done` channel 累积，`Asset-Worker` 线程按固定间隔统一发回，
///   没有完成的资源时跳过本次发送
/// - 所有失败都在资源内部变成 `Failed` 状态，不会作为错误出现在 channel 上
///
/// ## 线程生命周期
/// `Asset-Worker` 线程的生命周期与 `AssetWorker` 实例绑定。Drop 时：
/// 1. 请求 channel 被关闭，调度循环退出。
/// 2. 只有通过 `join` 销毁时才等待已分发的任务完成；之后发送一次剩余结果。
/// 3. join 调度线程。
///
/// 直接 drop 不等待进行中的 fetch (fetch 没有超时，可能永远不返回)；
/// 这些任务在线程池中自行结束，结果被丢弃。
pub struct AssetWorker {
    /// 用于向 worker 发送加载请求
    request_sender: Option<TransportSender>,
    /// 退出前是否等待进行中的任务
    wait_in_flight: Arc<AtomicBool>,

    dispatch_thread: Option<thread::JoinHandle<()>>,
}
// new & init
impl AssetWorker {
    /// 结果通过 `reply_sender` 发回
    pub fn spawn(
        loaders: Arc<LoaderTable>,
        fetcher: Arc<dyn Fetcher>,
        settings: &WorkerSettings,
        reply_sender: TransportSender,
    ) -> anyhow::Result<Self> {
        let (request_sender, request_receiver) = transport_channel();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.fetch_threads.max(1))
            .thread_name(|index| format!("Asset-Fetch-{}", index))
            .build()
            .context("failed to create asset fetch thread pool")?;

        let tick_interval = settings.tick_interval.max(Duration::from_millis(1));
        let wait_in_flight = Arc::new(AtomicBool::new(false));
        let dispatcher_wait_in_flight = wait_in_flight.clone();
        let dispatch_thread = thread::Builder::new()
            .name("Asset-Worker".to_string())
            .spawn(move || {
                let dispatcher = Dispatcher {
                    loaders,
                    fetcher,
                    pool,
                    reply_sender,
                };
                dispatcher.run(request_receiver, tick_interval, &dispatcher_wait_in_flight);
            })
            .context("failed to spawn asset worker thread")?;

        log::info!(
            "Asset worker started: {} fetch thread(s), flush every {:?}",
            settings.fetch_threads.max(1),
            tick_interval
        );

        Ok(Self {
            request_sender: Some(request_sender),
            wait_in_flight,
            dispatch_thread: Some(dispatch_thread),
        })
    }
}
// tools
impl AssetWorker {
    pub fn request_load(&self, batch: ResourceBatch) {
        if let Some(sender) = &self.request_sender
            && let Err(e) = sender.send(batch)
        {
            log::error!("Failed to send asset load request: {}", e);
        }
    }

    /// 等待所有已分发的任务完成，发送最后一批结果后销毁 worker
    ///
    /// 有 fetch 卡住时会一直阻塞。
    pub fn join(self) {
        self.wait_in_flight.store(true, Ordering::SeqCst);
    }
}
impl Drop for AssetWorker {
    fn drop(&mut self) {
        // 必须先 drop sender，否则调度线程不会退出，join 会死锁
        self.request_sender = None;

        if self.wait_in_flight.load(Ordering::SeqCst) {
            log::info!("Asset worker is being joined, waiting for tasks to complete...");
        } else {
            log::info!("Asset worker is being dropped, in-flight tasks are detached");
        }
        if let Some(thread) = self.dispatch_thread.take()
            && thread.join().is_err()
        {
            log::error!("Failed to join asset worker thread");
        }
        log::info!("Asset worker stopped.");
    }
}

/// 只存在于 `Asset-Worker` 线程中
struct Dispatcher {
    loaders: Arc<LoaderTable>,
    fetcher: Arc<dyn Fetcher>,
    pool: rayon::ThreadPool,
    reply_sender: TransportSender,
}
impl Dispatcher {
    fn run(&self, request_receiver: TransportReceiver, tick_interval: Duration, wait_in_flight: &AtomicBool) {
        let ticker = crossbeam_channel::tick(tick_interval);
        let (done_sender, done_receiver) = crossbeam_channel::unbounded::<Resource>();
        let wait_group = WaitGroup::new();

        loop {
            crossbeam_channel::select! {
                recv(request_receiver.raw()) -> msg => match msg {
                    Ok(batch) => self.dispatch(batch, &done_sender, &wait_group),
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.flush(&done_receiver),
            }
        }

        if wait_in_flight.load(Ordering::SeqCst) {
            wait_group.wait();
        }
        self.flush(&done_receiver);
    }

    fn dispatch(&self, batch: ResourceBatch, done_sender: &Sender<Resource>, wait_group: &WaitGroup) {
        let _span = tracy_client::span!("AssetWorker::dispatch");
        log::debug!("Asset worker received {} resource(s)", batch.len());

        for resource in batch {
            let done_sender = done_sender.clone();
            let loaders = self.loaders.clone();
            let fetcher = self.fetcher.clone();
            // 任务结束时闭包销毁，wg_task 随之 drop
            let wg_task = wait_group.clone();

            self.pool.spawn(move || {
                // 线程池没有 panic handler，任何 panic 都必须在任务内部捕获，
                // 否则进程会被终止，资源也会永远停留在 LoadingAsync
                let fallback = resource.snapshot();
                let resource = catch_unwind(AssertUnwindSafe(|| run_async_phase(resource, &loaders, fetcher.as_ref())))
                    .unwrap_or_else(|panic| {
                        let mut resource = fallback;
                        let reason = panic_message("async phase", panic.as_ref());
                        log::error!("Failed to load {}: {}", resource.uri(), reason);
                        resource.fail(reason);
                        resource
                    });
                let _ = done_sender.send(resource);
                drop(wg_task);
            });
        }
    }

    fn flush(&self, done_receiver: &Receiver<Resource>) {
        let batch: ResourceBatch = done_receiver.try_iter().collect();
        if batch.is_empty() {
            return;
        }

        let _span = tracy_client::span!("AssetWorker::flush");
        log::debug!(
            "Asset worker flushing {} resource(s), {} bytes transferred",
            batch.len(),
            batch.transferred_bytes()
        );
        if let Err(e) = self.reply_sender.send(batch) {
            log::warn!("Asset worker reply dropped: {}", e);
        }
    }
}

/// 单个资源的异步阶段 (运行在线程池中)
/// 执行: 查找 loader -> fetch -> loader 异步阶段
fn run_async_phase(mut resource: Resource, loaders: &LoaderTable, fetcher: &dyn Fetcher) -> Resource {
    let _span = tracy_client::span!("run_async_phase");

    match load_async(&resource, loaders, fetcher) {
        Ok(form) => {
            resource.form = form;
            resource.set_status(ResourceStatus::LoadingSync);
        }
        Err(e) => {
            log::error!("Failed to load {}: {}", resource.uri(), e);
            resource.fail(e);
        }
    }
    resource
}

fn load_async(resource: &Resource, loaders: &LoaderTable, fetcher: &dyn Fetcher) -> Result<ResourceForm, LoadError> {
    let loader = loaders.resolve(resource)?;
    let uri = resource.uri();

    let response = catch_unwind(AssertUnwindSafe(|| fetcher.fetch(uri)))
        .unwrap_or_else(|panic| Err(anyhow::anyhow!(panic_message("fetcher", panic.as_ref()))))
        .map_err(|e| LoadError::NetworkFailure {
            uri: uri.to_string(),
            reason: format!("{e:#}"),
        })?;
    if !response.is_success() {
        return Err(LoadError::network_status(uri, response.status));
    }

    // loader 中的 panic 不能逃逸到线程池
    catch_unwind(AssertUnwindSafe(|| loader.load_async(resource, response.body))).unwrap_or_else(|panic| {
        Err(LoadError::DecodeFailure {
            uri: uri.to_string(),
            reason: panic_message("loader", panic.as_ref()),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary_loader::BinaryLoader;
    use crate::loader::{LoadContext, ResourceLoader};
    use crate::test_utils::{MemoryFetcher, wait_until};
    use std::time::Instant;

    fn queued(uri: &str, kind: &str) -> Resource {
        let mut resource = Resource::new(uri, kind);
        resource.status = ResourceStatus::LoadingAsync;
        resource
    }

    fn spawn_worker(fetcher: MemoryFetcher, tick_interval: Duration) -> (AssetWorker, TransportReceiver) {
        let loaders = LoaderTable::builder()
            .register(BinaryLoader::KIND, BinaryLoader)
            .register("Explodes", PanickingLoader)
            .build();
        let (reply_sender, reply_receiver) = transport_channel();
        let settings = WorkerSettings {
            tick_interval,
            fetch_threads: 2,
        };
        let worker = AssetWorker::spawn(loaders, Arc::new(fetcher), &settings, reply_sender).unwrap();
        (worker, reply_receiver)
    }

    fn collect_replies(rx: &TransportReceiver, expected: usize) -> Vec<Resource> {
        let mut resources = Vec::new();
        wait_until(|| {
            for batch in rx.drain() {
                resources.extend(batch);
            }
            resources.len() >= expected
        });
        resources
    }

    struct PanickingLoader;
    impl ResourceLoader for PanickingLoader {
        fn load_async(&self, _resource: &Resource, _payload: Vec<u8>) -> Result<ResourceForm, LoadError> {
            panic!("decoder exploded")
        }
        fn load_sync(&self, _resource: &mut Resource, _ctx: &mut LoadContext) -> Result<bool, LoadError> {
            Ok(true)
        }
        fn unload(&self, _resource: &mut Resource, _ctx: &mut LoadContext) {}
    }

    #[test]
    fn test_failures_stay_per_resource() {
        let fetcher = MemoryFetcher::default()
            .with_file("ok.bin", b"payload".to_vec())
            .with_file("boom.bin", b"x".to_vec())
            .with_status("gone.bin", 404);
        let (worker, rx) = spawn_worker(fetcher, Duration::from_millis(10));

        worker.request_load(
            [
                queued("ok.bin", "Binary"),
                queued("mesh.obj", "Mesh"),
                queued("gone.bin", "Binary"),
                queued("boom.bin", "Explodes"),
            ]
            .into_iter()
            .collect(),
        );

        let mut resources = collect_replies(&rx, 4);
        resources.sort_by(|a, b| a.uri().cmp(b.uri()));
        let by_uri = |uri: &str| resources.iter().find(|r| r.uri() == uri).unwrap();

        let ok = by_uri("ok.bin");
        assert_eq!(ok.status(), ResourceStatus::LoadingSync);
        assert_eq!(ok.form().transferables()[0].as_slice(), b"payload");

        let unknown = by_uri("mesh.obj");
        assert_eq!(unknown.status(), ResourceStatus::Failed);
        assert!(unknown.error().unwrap().contains("no loader registered for resource type 'Mesh'"));

        let gone = by_uri("gone.bin");
        assert_eq!(gone.status(), ResourceStatus::Failed);
        assert!(gone.error().unwrap().contains("404"));

        let boom = by_uri("boom.bin");
        assert_eq!(boom.status(), ResourceStatus::Failed);
        assert!(boom.error().unwrap().contains("decoder exploded"));

        drop(worker);
    }

    #[test]
    fn test_unknown_type_is_not_fetched() {
        let fetcher = MemoryFetcher::default().with_file("mesh.obj", b"v 0 0 0".to_vec());
        let fetch_log = fetcher.fetch_log();
        let (worker, rx) = spawn_worker(fetcher, Duration::from_millis(10));

        worker.request_load([queued("mesh.obj", "Mesh")].into_iter().collect());
        let resources = collect_replies(&rx, 1);

        assert_eq!(resources[0].status(), ResourceStatus::Failed);
        assert!(fetch_log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_results_are_held_until_tick() {
        let fetcher = MemoryFetcher::default().with_file("a.bin", vec![1]);
        let (worker, rx) = spawn_worker(fetcher, Duration::from_millis(300));

        let sent_at = Instant::now();
        worker.request_load([queued("a.bin", "Binary")].into_iter().collect());
        let resources = collect_replies(&rx, 1);

        // 内存 fetch 几乎立即完成，结果仍然要等到下一次 tick 才发出
        assert!(sent_at.elapsed() >= Duration::from_millis(100));
        assert_eq!(resources.len(), 1);
    }

    #[test]
    fn test_fetch_panic_and_transport_error_stay_per_resource() {
        let fetcher = MemoryFetcher::default()
            .with_panic("crash.bin")
            .with_error("reset.bin", "connection reset by peer")
            .with_file("ok.bin", vec![1, 2, 3])
            .with_file("later.bin", vec![4]);
        let (worker, rx) = spawn_worker(fetcher, Duration::from_millis(10));

        worker.request_load(
            [
                queued("crash.bin", "Binary"),
                queued("reset.bin", "Binary"),
                queued("ok.bin", "Binary"),
            ]
            .into_iter()
            .collect(),
        );
        let resources = collect_replies(&rx, 3);
        let by_uri = |uri: &str| resources.iter().find(|r| r.uri() == uri).unwrap();

        let crash = by_uri("crash.bin");
        assert_eq!(crash.status(), ResourceStatus::Failed);
        assert!(crash.error().unwrap().contains("fetcher panicked: fetcher crashed on crash.bin"));

        let reset = by_uri("reset.bin");
        assert_eq!(reset.status(), ResourceStatus::Failed);
        let reason = reset.error().unwrap();
        assert!(reason.starts_with("failed to fetch 'reset.bin'"));
        assert!(reason.contains("connection reset by peer"));

        assert_eq!(by_uri("ok.bin").status(), ResourceStatus::LoadingSync);

        // 线程池在 panic 之后仍然可用
        worker.request_load([queued("later.bin", "Binary")].into_iter().collect());
        let later = collect_replies(&rx, 1);
        assert_eq!(later[0].status(), ResourceStatus::LoadingSync);
    }

    #[test]
    fn test_join_flushes_in_flight_work() {
        let fetcher = MemoryFetcher::default().with_delayed_file("slow.bin", vec![5; 32], Duration::from_millis(50));
        let (worker, rx) = spawn_worker(fetcher, Duration::from_secs(60));

        worker.request_load([queued("slow.bin", "Binary")].into_iter().collect());
        worker.join();

        let batch = rx.try_recv().expect("final flush on shutdown");
        let resource = batch.into_iter().next().unwrap();
        assert_eq!(resource.status(), ResourceStatus::LoadingSync);
    }

    #[test]
    fn test_drop_does_not_wait_for_hung_fetch() {
        let fetcher = MemoryFetcher::default().with_delayed_file("hung.bin", vec![0; 8], Duration::from_secs(5));
        let fetch_log = fetcher.fetch_log();
        let (worker, rx) = spawn_worker(fetcher, Duration::from_millis(10));

        worker.request_load([queued("hung.bin", "Binary")].into_iter().collect());
        std::thread::sleep(Duration::from_millis(20));

        let dropped_at = Instant::now();
        drop(worker);
        assert!(dropped_at.elapsed() < Duration::from_secs(2));

        // 结果没有被发出，fetch 仍在线程池中
        assert!(rx.try_recv().is_none());
        assert!(fetch_log.lock().unwrap().is_empty());
    }
}
