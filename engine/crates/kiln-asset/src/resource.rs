use std::fmt;

use crate::texture::TextureForm;

/// 资源加载状态机
///
/// 状态流转: Initializing -> LoadingAsync -> LoadingSync -> Loaded
///                                    \              \-> Failed
///                                     \-> Failed
/// 任意状态都可以被调用方标记为 Unloaded，下一次 update 时执行卸载并从注册表中移除
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ResourceStatus {
    /// 刚注册，下一次 update 时派发给 worker
    Initializing,
    /// worker 线程正在 fetch 和解码，主线程侧不做任何事
    LoadingAsync,
    /// worker 已返回，主线程每帧执行同步阶段直到完成 (例如 GPU 上传)
    LoadingSync,
    Loaded,
    Failed,
    Unloaded,
}

impl ResourceStatus {
    /// 不会再自动发生状态迁移
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Loaded | ResourceStatus::Failed)
    }

    /// 状态机中合法的边
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        use ResourceStatus::*;
        match (self, next) {
            (_, Unloaded) => true,
            (Initializing, LoadingAsync) => true,
            (LoadingAsync, LoadingSync | Failed) => true,
            (LoadingSync, Loaded | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 跨线程移交所有权的字节缓冲
///
/// 没有实现 `Clone`：缓冲只能被 move，从 worker 到主线程的过程中
/// 堆上的数据不会被复制，也不会同时被两边持有。
pub struct Transferable(Vec<u8>);

impl Transferable {
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// 底层存储地址，用于确认缓冲是被移交而不是被复制
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }
}

impl From<Vec<u8>> for Transferable {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Transferable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transferable({} bytes)", self.0.len())
    }
}

/// 资源当前持有的唯一一种中间形态
///
/// 每次推进都会整体替换 form，旧的形态 (原始字节、解码后的像素) 随之释放。
#[derive(Debug, Default)]
pub enum ResourceForm {
    #[default]
    Empty,
    Texture(TextureForm),
    /// 只保存原始数据的 loader 产生的缓冲
    Buffers(Vec<Transferable>),
}

impl ResourceForm {
    /// 随资源一起跨线程移交的缓冲
    pub fn transferables(&self) -> Vec<&Transferable> {
        match self {
            ResourceForm::Empty => Vec::new(),
            ResourceForm::Texture(texture) => texture.transferable().into_iter().collect(),
            ResourceForm::Buffers(buffers) => buffers.iter().collect(),
        }
    }

    #[inline]
    pub fn take(&mut self) -> ResourceForm {
        std::mem::take(self)
    }
}

/// 单个资源的描述
///
/// `uri` 是注册表中的唯一键，`kind` 用于选择 loader。
/// 资源不可 Clone：同一时刻只会被注册表或 worker 其中之一持有。
#[derive(Debug)]
pub struct Resource {
    uri: String,
    kind: String,
    pub(crate) ticket: u64,
    pub(crate) status: ResourceStatus,
    pub(crate) error: Option<String>,
    pub(crate) form: ResourceForm,
}
// new & init
impl Resource {
    pub fn new(uri: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
            ticket: 0,
            status: ResourceStatus::Initializing,
            error: None,
            form: ResourceForm::Empty,
        }
    }

    pub fn texture(uri: impl Into<String>) -> Self {
        Self::new(uri, crate::texture_loader::TextureLoader::KIND)
    }

    /// 发送给 worker 的快照：只包含描述信息，不带任何形态数据
    pub(crate) fn snapshot(&self) -> Self {
        Self {
            uri: self.uri.clone(),
            kind: self.kind.clone(),
            ticket: self.ticket,
            status: self.status,
            error: None,
            form: ResourceForm::Empty,
        }
    }
}
// getters
impl Resource {
    #[inline]
    pub fn uri(&self) -> &str {
        &self.uri
    }
    #[inline]
    pub fn kind(&self) -> &str {
        &self.kind
    }
    #[inline]
    pub fn status(&self) -> ResourceStatus {
        self.status
    }
    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
    #[inline]
    pub fn form(&self) -> &ResourceForm {
        &self.form
    }
    /// 供 loader 在同步阶段和卸载阶段替换形态
    #[inline]
    pub fn form_mut(&mut self) -> &mut ResourceForm {
        &mut self.form
    }
}
// tools
impl Resource {
    pub(crate) fn set_status(&mut self, next: ResourceStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {} for {}",
            self.status,
            next,
            self.uri
        );
        self.status = next;
    }

    /// 失败后释放所有中间形态，只保留错误信息
    pub(crate) fn fail(&mut self, error: impl fmt::Display) {
        self.set_status(ResourceStatus::Failed);
        self.error = Some(error.to_string());
        self.form = ResourceForm::Empty;
    }
}
