use std::sync::Arc;

use crate::error::LoadError;
use crate::image_decoder::{DecodePoll, ImageDecoder, RayonImageDecoder};
use crate::loader::{LoadContext, ResourceLoader};
use crate::resource::{Resource, ResourceForm, Transferable};
use crate::texture::{DecodedImage, ResidentTexture, TextureForm, decode_rgba8};

/// 图片资源的 loader
///
/// 两条路径:
/// - 默认: worker 中直接解码为 RGBA8 像素，同步阶段只做一次上传。
/// - 延迟解码 (`async_decode == false`): worker 只搬运原始字节，同步阶段发起平台解码，
///   之后每帧轮询同一个 `PendingDecode`，完成后再上传。
///
/// 两条路径在上传完成后都只保留设备句柄，CPU 端像素随旧形态一起释放。
pub struct TextureLoader {
    async_decode: bool,
    decoder: Arc<dyn ImageDecoder>,
}
impl Default for TextureLoader {
    fn default() -> Self {
        Self::new()
    }
}
// new & init
impl TextureLoader {
    pub const KIND: &'static str = "Texture";

    pub fn new() -> Self {
        Self {
            async_decode: true,
            decoder: Arc::new(RayonImageDecoder),
        }
    }

    /// worker 不解码，解码推迟到同步阶段由 `decoder` 完成
    pub fn deferred(decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            async_decode: false,
            decoder,
        }
    }

    pub fn with_async_decode(async_decode: bool) -> Self {
        if async_decode { Self::new() } else { Self::deferred(Arc::new(RayonImageDecoder)) }
    }
}
// tools
impl TextureLoader {
    fn upload(resource: &Resource, image: DecodedImage, ctx: &mut LoadContext) -> Result<ResidentTexture, LoadError> {
        let _span = tracy_client::span!("TextureLoader::upload");
        let desc = image.desc();
        let handle = ctx
            .device
            .create_texture(resource.uri(), &desc, image.pixels.as_slice())
            .map_err(|e| LoadError::DeviceUploadFailure {
                uri: resource.uri().to_string(),
                reason: e.to_string(),
            })?;

        log::debug!(
            "[F{}] texture {} uploaded as {:?} ({}x{})",
            ctx.frame_id,
            resource.uri(),
            handle,
            image.width,
            image.height
        );
        // image 在这里 drop，像素数据不会在设备之外再保留一份
        Ok(ResidentTexture {
            handle,
            width: image.width,
            height: image.height,
        })
    }
}
impl ResourceLoader for TextureLoader {
    fn load_async(&self, resource: &Resource, payload: Vec<u8>) -> Result<ResourceForm, LoadError> {
        let form = if self.async_decode {
            TextureForm::Bitmap(decode_rgba8(resource.uri(), &payload)?)
        } else {
            TextureForm::Encoded(Transferable::new(payload))
        };
        Ok(ResourceForm::Texture(form))
    }

    fn load_sync(&self, resource: &mut Resource, ctx: &mut LoadContext) -> Result<bool, LoadError> {
        let ResourceForm::Texture(form) = resource.form.take() else {
            return Err(LoadError::DecodeFailure {
                uri: resource.uri().to_string(),
                reason: "texture resource holds no image data".to_string(),
            });
        };

        let image = match form {
            TextureForm::Bitmap(image) => image,
            TextureForm::Encoded(bytes) => {
                let pending = self.decoder.begin_decode(resource.uri(), bytes);
                log::debug!("texture {} waiting on platform decode #{}", resource.uri(), pending.id());
                resource.form = ResourceForm::Texture(TextureForm::Decoding(pending));
                return Ok(false);
            }
            TextureForm::Decoding(pending) => match pending.poll() {
                DecodePoll::Pending => {
                    resource.form = ResourceForm::Texture(TextureForm::Decoding(pending));
                    return Ok(false);
                }
                DecodePoll::Ready(Ok(image)) => image,
                DecodePoll::Ready(Err(reason)) => {
                    return Err(LoadError::DecodeFailure {
                        uri: resource.uri().to_string(),
                        reason,
                    });
                }
            },
            TextureForm::Resident(texture) => {
                resource.form = ResourceForm::Texture(TextureForm::Resident(texture));
                return Ok(true);
            }
        };

        let texture = Self::upload(resource, image, ctx)?;
        resource.form = ResourceForm::Texture(TextureForm::Resident(texture));
        Ok(true)
    }

    fn unload(&self, resource: &mut Resource, ctx: &mut LoadContext) {
        match resource.form.take() {
            ResourceForm::Texture(TextureForm::Resident(texture)) => {
                ctx.device.remove_texture(texture.handle);
            }
            ResourceForm::Texture(TextureForm::Decoding(pending)) => {
                // 解码结果到达时接收端已经不存在，直接丢弃
                log::debug!("texture {} unloaded during platform decode #{}", resource.uri(), pending.id());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx_device::HeadlessDevice;
    use crate::resource::ResourceStatus;
    use crate::test_utils::{ManualDecoder, encode_png};

    fn loading_sync(uri: &str, form: ResourceForm) -> Resource {
        let mut resource = Resource::texture(uri);
        resource.status = ResourceStatus::LoadingSync;
        resource.form = form;
        resource
    }

    #[test]
    fn test_async_decode_then_upload() {
        let loader = TextureLoader::new();
        let png = encode_png(5, 3, [255, 0, 0, 255]);

        let probe = Resource::texture("red.png");
        let form = loader.load_async(&probe, png).unwrap();
        assert!(matches!(form, ResourceForm::Texture(TextureForm::Bitmap(_))));

        let mut resource = loading_sync("red.png", form);
        let mut device = HeadlessDevice::new();
        let mut ctx = LoadContext {
            device: &mut device,
            frame_id: 0,
        };
        assert!(loader.load_sync(&mut resource, &mut ctx).unwrap());

        let ResourceForm::Texture(TextureForm::Resident(texture)) = resource.form() else {
            panic!("texture should be resident");
        };
        assert_eq!((texture.width, texture.height), (5, 3));
        assert!(resource.form().transferables().is_empty());

        let handle = texture.handle;
        assert_eq!(device.texture(handle).unwrap().pixels[0..4], [255, 0, 0, 255]);
    }

    #[test]
    fn test_async_decode_failure() {
        let loader = TextureLoader::new();
        let err = loader.load_async(&Resource::texture("bad.png"), vec![0, 1, 2]).unwrap_err();
        assert!(matches!(err, LoadError::DecodeFailure { .. }));
    }

    #[test]
    fn test_deferred_decode_polls_same_request() {
        let decoder = Arc::new(ManualDecoder::default());
        let loader = TextureLoader::deferred(decoder.clone());
        let png = encode_png(2, 2, [0, 255, 0, 255]);

        let form = loader.load_async(&Resource::texture("green.png"), png).unwrap();
        assert!(matches!(form, ResourceForm::Texture(TextureForm::Encoded(_))));
        let mut resource = loading_sync("green.png", form);

        let mut device = HeadlessDevice::new();
        let mut pending_id = None;
        for _ in 0..5 {
            let mut ctx = LoadContext {
                device: &mut device,
                frame_id: 0,
            };
            assert!(!loader.load_sync(&mut resource, &mut ctx).unwrap());

            let ResourceForm::Texture(TextureForm::Decoding(pending)) = resource.form() else {
                panic!("texture should be decoding");
            };
            assert_eq!(*pending_id.get_or_insert(pending.id()), pending.id());
        }
        assert_eq!(decoder.started(), 1);
        assert_eq!(device.created_count(), 0);

        decoder.finish_all();
        let mut ctx = LoadContext {
            device: &mut device,
            frame_id: 1,
        };
        assert!(loader.load_sync(&mut resource, &mut ctx).unwrap());
        assert_eq!(decoder.started(), 1);
        assert_eq!(device.created_count(), 1);
        assert!(matches!(resource.form(), ResourceForm::Texture(TextureForm::Resident(_))));

        // 完成之后再次调用不会重复上传
        let mut ctx = LoadContext {
            device: &mut device,
            frame_id: 2,
        };
        assert!(loader.load_sync(&mut resource, &mut ctx).unwrap());
        assert_eq!(device.created_count(), 1);
    }

    #[test]
    fn test_device_rejection() {
        let loader = TextureLoader::new();
        let png = encode_png(16, 16, [0, 0, 0, 255]);
        let form = loader.load_async(&Resource::texture("big.png"), png).unwrap();
        let mut resource = loading_sync("big.png", form);

        let mut device = HeadlessDevice::with_max_dimension(8);
        let mut ctx = LoadContext {
            device: &mut device,
            frame_id: 0,
        };
        let err = loader.load_sync(&mut resource, &mut ctx).unwrap_err();
        assert!(matches!(err, LoadError::DeviceUploadFailure { .. }));
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_unload_releases_device_texture() {
        let loader = TextureLoader::new();
        let form = loader.load_async(&Resource::texture("a.png"), encode_png(1, 1, [9, 9, 9, 9])).unwrap();
        let mut resource = loading_sync("a.png", form);

        let mut device = HeadlessDevice::new();
        let mut ctx = LoadContext {
            device: &mut device,
            frame_id: 0,
        };
        assert!(loader.load_sync(&mut resource, &mut ctx).unwrap());
        loader.unload(&mut resource, &mut ctx);

        assert!(matches!(resource.form(), ResourceForm::Empty));
        assert_eq!(device.live_texture_count(), 0);
        assert_eq!(device.removed_count(), 1);
    }
}
