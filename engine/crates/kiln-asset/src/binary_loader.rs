use crate::error::LoadError;
use crate::loader::{LoadContext, ResourceLoader};
use crate::resource::{Resource, ResourceForm, Transferable};

/// 原始数据文件：不解码，fetch 得到的字节原样移交给主线程
pub struct BinaryLoader;

impl BinaryLoader {
    pub const KIND: &'static str = "Binary";
}

impl ResourceLoader for BinaryLoader {
    fn load_async(&self, _resource: &Resource, payload: Vec<u8>) -> Result<ResourceForm, LoadError> {
        Ok(ResourceForm::Buffers(vec![Transferable::new(payload)]))
    }

    fn load_sync(&self, _resource: &mut Resource, _ctx: &mut LoadContext) -> Result<bool, LoadError> {
        Ok(true)
    }

    fn unload(&self, resource: &mut Resource, _ctx: &mut LoadContext) {
        resource.form_mut().take();
    }
}
