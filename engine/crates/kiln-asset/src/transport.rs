//! 注册表与 worker 之间的消息通道
//!
//! 两个方向使用同一种消息 `ResourceBatch`：
//! - 注册表 -> worker: 需要异步加载的资源快照
//! - worker -> 注册表: 异步阶段完成 (或失败) 的资源
//!
//! 消息按发送顺序到达，只有一个接收方。资源及其形态中的缓冲随消息 move，
//! 发送方在 send 之后不再持有它们；堆上的字节不会被复制。

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use thiserror::Error;

use crate::resource::{Resource, Transferable};

/// 一条消息：有序的资源序列，以及随之移交所有权的缓冲
#[derive(Debug, Default)]
pub struct ResourceBatch {
    resources: Vec<Resource>,
}
impl ResourceBatch {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, resource: Resource) {
        self.resources.push(resource);
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
        self.resources.iter()
    }

    /// 本消息移交的全部缓冲，按资源顺序排列
    pub fn transferables(&self) -> Vec<&Transferable> {
        self.resources.iter().flat_map(|r| r.form().transferables()).collect()
    }

    pub fn transferred_bytes(&self) -> usize {
        self.transferables().iter().map(|t| t.len()).sum()
    }
}
impl IntoIterator for ResourceBatch {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_iter()
    }
}
impl FromIterator<Resource> for ResourceBatch {
    fn from_iter<T: IntoIterator<Item = Resource>>(iter: T) -> Self {
        Self {
            resources: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
#[error("transport channel is closed, {dropped} resource(s) not delivered")]
pub struct TransportClosed {
    pub dropped: usize,
}

pub struct TransportSender {
    sender: Sender<ResourceBatch>,
}
impl TransportSender {
    /// 空消息不发送
    pub fn send(&self, batch: ResourceBatch) -> Result<(), TransportClosed> {
        if batch.is_empty() {
            return Ok(());
        }
        self.sender.send(batch).map_err(|e| TransportClosed { dropped: e.0.len() })
    }
}

pub struct TransportReceiver {
    receiver: Receiver<ResourceBatch>,
}
impl TransportReceiver {
    /// 不阻塞：没有消息时返回 `None`
    pub fn try_recv(&self) -> Option<ResourceBatch> {
        match self.receiver.try_recv() {
            Ok(batch) => Some(batch),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// 取出当前已到达的全部消息，保持到达顺序
    pub fn drain(&self) -> Vec<ResourceBatch> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub(crate) fn raw(&self) -> &Receiver<ResourceBatch> {
        &self.receiver
    }
}

pub fn transport_channel() -> (TransportSender, TransportReceiver) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (TransportSender { sender }, TransportReceiver { receiver })
}
