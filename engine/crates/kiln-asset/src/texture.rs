use crate::error::LoadError;
use crate::gfx_device::{TextureDesc, TextureHandle};
use crate::image_decoder::PendingDecode;
use crate::resource::Transferable;

/// 解码后的 CPU 端像素数据，准备好上传到 GPU
#[derive(Debug)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8，行紧密排列
    pub pixels: Transferable,
}

impl DecodedImage {
    #[inline]
    pub fn desc(&self) -> TextureDesc {
        TextureDesc::rgba8(self.width, self.height)
    }
}

/// 已经驻留在设备上的纹理
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResidentTexture {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// 纹理资源在加载过程中的形态
///
/// Encoded  : 尚未解码的原始字节 (运行时不支持在 worker 中解码时使用)
/// Bitmap   : worker 中解码得到的像素
/// Decoding : 主线程发起的平台解码，尚未完成
/// Resident : 已上传到设备，CPU 端像素已释放
#[derive(Debug)]
pub enum TextureForm {
    Encoded(Transferable),
    Bitmap(DecodedImage),
    Decoding(PendingDecode),
    Resident(ResidentTexture),
}

impl TextureForm {
    pub fn transferable(&self) -> Option<&Transferable> {
        match self {
            TextureForm::Encoded(bytes) => Some(bytes),
            TextureForm::Bitmap(image) => Some(&image.pixels),
            TextureForm::Decoding(_) | TextureForm::Resident(_) => None,
        }
    }
}

/// 图片解码：字节 -> RGBA8
pub fn decode_rgba8(uri: &str, bytes: &[u8]) -> Result<DecodedImage, LoadError> {
    let _span = tracy_client::span!("decode_rgba8");

    let img = image::load_from_memory(bytes).map_err(|e| LoadError::DecodeFailure {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;

    // 统一转换为 RGBA8
    let img = img.into_rgba8();
    let (width, height) = img.dimensions();

    Ok(DecodedImage {
        width,
        height,
        pixels: Transferable::new(img.into_raw()),
    })
}
