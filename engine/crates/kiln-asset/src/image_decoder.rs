use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::error::panic_message;
use crate::resource::Transferable;
use crate::texture::{DecodedImage, decode_rgba8};

static NEXT_DECODE_ID: AtomicU64 = AtomicU64::new(1);

/// 平台图片解码原语
///
/// 在 worker 无法解码图片的运行时里，纹理在同步阶段调用它发起解码，
/// 之后每帧轮询返回的 `PendingDecode`，不阻塞主线程。
pub trait ImageDecoder: Send + Sync {
    fn begin_decode(&self, uri: &str, encoded: Transferable) -> PendingDecode;
}

pub enum DecodePoll {
    Pending,
    Ready(Result<DecodedImage, String>),
}

/// 一次正在进行的解码
///
/// 每次轮询都作用在同一个对象上；解码结果只会被取走一次。
pub struct PendingDecode {
    id: u64,
    result_receiver: Receiver<Result<DecodedImage, String>>,
}

/// 解码方持有，用于交付结果
pub struct DecodeCompleter {
    result_sender: Sender<Result<DecodedImage, String>>,
}

impl DecodeCompleter {
    pub fn complete(self, result: Result<DecodedImage, String>) {
        // 接收方已经被卸载时结果直接丢弃
        let _ = self.result_sender.send(result);
    }
}

impl PendingDecode {
    pub fn new() -> (Self, DecodeCompleter) {
        let (result_sender, result_receiver) = crossbeam_channel::bounded(1);
        let pending = Self {
            id: NEXT_DECODE_ID.fetch_add(1, Ordering::Relaxed),
            result_receiver,
        };
        (pending, DecodeCompleter { result_sender })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn poll(&self) -> DecodePoll {
        match self.result_receiver.try_recv() {
            Ok(result) => DecodePoll::Ready(result),
            Err(TryRecvError::Empty) => DecodePoll::Pending,
            Err(TryRecvError::Disconnected) => DecodePoll::Ready(Err("decoder dropped the request".to_string())),
        }
    }
}

impl fmt::Debug for PendingDecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDecode").field("id", &self.id).finish()
    }
}

/// 在 rayon 全局线程池中执行解码
///
/// 全局线程池没有 panic handler，任务中的 panic 会终止进程；
/// 这里捕获 panic 并作为这次解码的失败结果交付。
pub fn spawn_decode<F>(decode: F) -> PendingDecode
where
    F: FnOnce() -> Result<DecodedImage, String> + Send + 'static,
{
    let (pending, completer) = PendingDecode::new();
    rayon::spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(decode))
            .unwrap_or_else(|panic| Err(panic_message("decoder", panic.as_ref())));
        completer.complete(result);
    });
    pending
}

/// 默认实现：在 rayon 全局线程池中解码
#[derive(Default)]
pub struct RayonImageDecoder;

impl ImageDecoder for RayonImageDecoder {
    fn begin_decode(&self, uri: &str, encoded: Transferable) -> PendingDecode {
        let uri = uri.to_string();
        spawn_decode(move || decode_rgba8(&uri, encoded.as_slice()).map_err(|e| e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{encode_png, wait_until};

    #[test]
    fn test_pending_until_completed() {
        let (pending, completer) = PendingDecode::new();
        assert!(matches!(pending.poll(), DecodePoll::Pending));
        assert!(matches!(pending.poll(), DecodePoll::Pending));

        completer.complete(Err("nope".to_string()));
        match pending.poll() {
            DecodePoll::Ready(Err(reason)) => assert_eq!(reason, "nope"),
            _ => panic!("expected a finished decode"),
        }
    }

    #[test]
    fn test_dropped_completer_reports_error() {
        let (pending, completer) = PendingDecode::new();
        drop(completer);
        assert!(matches!(pending.poll(), DecodePoll::Ready(Err(_))));
    }

    fn wait_ready(pending: &PendingDecode) -> Result<DecodedImage, String> {
        let mut decoded = None;
        wait_until(|| match pending.poll() {
            DecodePoll::Pending => false,
            DecodePoll::Ready(result) => {
                decoded = Some(result);
                true
            }
        });
        decoded.unwrap()
    }

    #[test]
    fn test_decode_panic_becomes_error() {
        let pending = spawn_decode(|| panic!("corrupt chunk"));
        let reason = wait_ready(&pending).unwrap_err();
        assert_eq!(reason, "decoder panicked: corrupt chunk");

        // 全局线程池仍然可用
        let pending = spawn_decode(|| decode_rgba8("a.png", &encode_png(1, 1, [0; 4])).map_err(|e| e.to_string()));
        assert!(wait_ready(&pending).is_ok());
    }

    #[test]
    fn test_rayon_decoder() {
        let png = encode_png(4, 4, [1, 2, 3, 4]);
        let pending = RayonImageDecoder.begin_decode("a.png", Transferable::new(png));

        let image = wait_ready(&pending).unwrap();
        assert_eq!((image.width, image.height), (4, 4));
    }
}
