use slotmap::{SlotMap, new_key_type};
use thiserror::Error;

// 设备侧纹理的强类型句柄
// slotmap 的 generational index 保证句柄销毁后不会被误用到新纹理上
new_key_type! { pub struct TextureHandle; }

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TextureFormat {
    /// 目前所有纹理统一解码为 RGBA8
    Rgba8Unorm,
}

impl TextureFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::Rgba8Unorm => 4,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn rgba8(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8Unorm,
        }
    }

    /// 完整像素数据应有的字节数
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("pixel data is {actual} bytes, texture {width}x{height} needs {expected}")]
    PixelSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("texture size {width}x{height} is outside of the supported range 1..={max}")]
    UnsupportedSize { width: u32, height: u32, max: u32 },
}

/// 渲染设备能力
///
/// 加载管线只在主线程的同步阶段通过 `&mut` 访问设备；
/// worker 线程拿不到这个引用。
pub trait GfxDevice {
    fn create_texture(&mut self, uri: &str, desc: &TextureDesc, pixels: &[u8]) -> Result<TextureHandle, DeviceError>;

    fn remove_texture(&mut self, handle: TextureHandle);
}

pub struct HeadlessTexture {
    pub name: String,
    pub desc: TextureDesc,
    pub pixels: Vec<u8>,
}

/// 不依赖图形 API 的内存设备
///
/// 纹理数据保存在 SlotMap 中，用于 headless 程序和测试。
pub struct HeadlessDevice {
    textures: SlotMap<TextureHandle, HeadlessTexture>,
    max_texture_dimension: u32,

    created_count: usize,
    removed_count: usize,
}
impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl HeadlessDevice {
    pub const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;

    pub fn new() -> Self {
        Self::with_max_dimension(Self::DEFAULT_MAX_TEXTURE_DIMENSION)
    }

    pub fn with_max_dimension(max_texture_dimension: u32) -> Self {
        Self {
            textures: SlotMap::with_key(),
            max_texture_dimension,
            created_count: 0,
            removed_count: 0,
        }
    }
}
// getters
impl HeadlessDevice {
    #[inline]
    pub fn texture(&self, handle: TextureHandle) -> Option<&HeadlessTexture> {
        self.textures.get(handle)
    }
    /// 当前存活的纹理数量
    #[inline]
    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }
    #[inline]
    pub fn created_count(&self) -> usize {
        self.created_count
    }
    #[inline]
    pub fn removed_count(&self) -> usize {
        self.removed_count
    }
}
impl GfxDevice for HeadlessDevice {
    fn create_texture(&mut self, uri: &str, desc: &TextureDesc, pixels: &[u8]) -> Result<TextureHandle, DeviceError> {
        let _span = tracy_client::span!("HeadlessDevice::create_texture");
        let max = self.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(DeviceError::UnsupportedSize {
                width: desc.width,
                height: desc.height,
                max,
            });
        }
        if pixels.len() != desc.byte_size() {
            return Err(DeviceError::PixelSizeMismatch {
                width: desc.width,
                height: desc.height,
                expected: desc.byte_size(),
                actual: pixels.len(),
            });
        }

        let handle = self.textures.insert(HeadlessTexture {
            name: uri.to_string(),
            desc: *desc,
            pixels: pixels.to_vec(),
        });
        self.created_count += 1;
        log::debug!("HeadlessDevice created texture {:?} for {}", handle, uri);
        Ok(handle)
    }

    fn remove_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(handle).is_some() {
            self.removed_count += 1;
        } else {
            log::warn!("HeadlessDevice: remove of unknown texture {:?}", handle);
        }
    }
}
