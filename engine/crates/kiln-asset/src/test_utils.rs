//! 测试共用的辅助工具

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::fetcher::{FetchResponse, Fetcher};
use crate::image_decoder::{DecodeCompleter, ImageDecoder, PendingDecode};
use crate::resource::Transferable;
use crate::texture::decode_rgba8;

const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// 轮询直到条件成立，超时则 panic
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached within {:?}", WAIT_TIMEOUT);
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// 单色 PNG
pub fn encode_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
    bytes
}

enum MemoryReply {
    Response { status: u16, body: Vec<u8> },
    /// 传输层错误
    Error(String),
    Panic,
}

struct MemoryEntry {
    reply: MemoryReply,
    delay: Duration,
}

/// 内存中的 fetch，可以为每个 uri 指定状态码、传输错误和延迟；未登记的 uri 返回 404
#[derive(Default)]
pub struct MemoryFetcher {
    entries: HashMap<String, MemoryEntry>,
    fetch_log: Arc<Mutex<Vec<String>>>,
}
impl MemoryFetcher {
    pub fn with_file(self, uri: &str, body: Vec<u8>) -> Self {
        self.with_delayed_file(uri, body, Duration::ZERO)
    }

    pub fn with_delayed_file(self, uri: &str, body: Vec<u8>, delay: Duration) -> Self {
        self.with_reply(uri, MemoryReply::Response { status: 200, body }, delay)
    }

    pub fn with_status(self, uri: &str, status: u16) -> Self {
        let reply = MemoryReply::Response {
            status,
            body: Vec::new(),
        };
        self.with_reply(uri, reply, Duration::ZERO)
    }

    /// fetch 返回 `Err`，模拟连接中断
    pub fn with_error(self, uri: &str, message: &str) -> Self {
        self.with_reply(uri, MemoryReply::Error(message.to_string()), Duration::ZERO)
    }

    pub fn with_panic(self, uri: &str) -> Self {
        self.with_reply(uri, MemoryReply::Panic, Duration::ZERO)
    }

    fn with_reply(mut self, uri: &str, reply: MemoryReply, delay: Duration) -> Self {
        self.entries.insert(uri.to_string(), MemoryEntry { reply, delay });
        self
    }

    /// 已经发起过的 fetch，按完成顺序
    pub fn fetch_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.fetch_log.clone()
    }
}
impl Fetcher for MemoryFetcher {
    fn fetch(&self, uri: &str) -> anyhow::Result<FetchResponse> {
        let entry = self.entries.get(uri);
        if let Some(entry) = entry {
            std::thread::sleep(entry.delay);
        }
        self.fetch_log.lock().unwrap().push(uri.to_string());

        match entry.map(|e| &e.reply) {
            Some(MemoryReply::Response { status, body }) => Ok(FetchResponse {
                status: *status,
                body: body.clone(),
            }),
            Some(MemoryReply::Error(message)) => Err(anyhow::anyhow!("{message}")).context("connection lost"),
            Some(MemoryReply::Panic) => panic!("fetcher crashed on {uri}"),
            None => Ok(FetchResponse::with_status(404)),
        }
    }
}

/// 由测试控制何时完成的平台解码
#[derive(Default)]
pub struct ManualDecoder {
    started: AtomicUsize,
    queued: Mutex<Vec<(String, Transferable, DecodeCompleter)>>,
}
impl ManualDecoder {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// 完成所有已经发起的解码
    pub fn finish_all(&self) {
        let queued = std::mem::take(&mut *self.queued.lock().unwrap());
        for (uri, bytes, completer) in queued {
            completer.complete(decode_rgba8(&uri, bytes.as_slice()).map_err(|e| e.to_string()));
        }
    }
}
impl ImageDecoder for ManualDecoder {
    fn begin_decode(&self, uri: &str, encoded: Transferable) -> PendingDecode {
        self.started.fetch_add(1, Ordering::SeqCst);
        let (pending, completer) = PendingDecode::new();
        self.queued.lock().unwrap().push((uri.to_string(), encoded, completer));
        pending
    }
}
