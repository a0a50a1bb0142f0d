use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use kiln_asset::binary_loader::BinaryLoader;
use kiln_asset::texture_loader::TextureLoader;
use kiln_asset::{AssetPipelineConfig, HeadlessDevice, Resource, ResourceManager, ResourceStatus};
use kiln_crate_tools::init_log::init_log;
use kiln_crate_tools::resource::KilnPath;
use serde::Deserialize;

/// 模拟 60Hz 的帧循环
const FRAME_TIME: Duration = Duration::from_millis(16);
const MAX_FRAMES: u64 = 60 * 30;

#[derive(Debug, Deserialize)]
struct ResourceEntry {
    uri: String,
    #[serde(default = "default_kind")]
    kind: String,
}

fn default_kind() -> String {
    TextureLoader::KIND.to_string()
}

/// 配置文件中的 `[[resources]]`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResourceList {
    resources: Vec<ResourceEntry>,
}

fn load_config(path: &Path) -> anyhow::Result<(AssetPipelineConfig, Vec<ResourceEntry>)> {
    log::info!("Loading config: {:?}", path);
    let config = AssetPipelineConfig::from_file(path)?;

    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read config {:?}", path))?;
    let list: ResourceList = toml::from_str(&content).with_context(|| format!("failed to parse resources in {:?}", path))?;
    Ok((config, list.resources))
}

/// 没有配置文件时，在 target 目录下生成几张图片作为演示
fn demo_config() -> anyhow::Result<(AssetPipelineConfig, Vec<ResourceEntry>)> {
    let dir = KilnPath::target_path().join("kiln-demo");
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {:?}", dir))?;
    log::info!("No kiln.toml found, generating demo assets in {:?}", dir);

    let checker = image::RgbaImage::from_fn(64, 64, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            image::Rgba([255, 255, 255, 255])
        } else {
            image::Rgba([32, 32, 32, 255])
        }
    });
    checker.save(dir.join("checker.png")).context("failed to write checker.png")?;

    let gradient = image::RgbaImage::from_fn(256, 128, |x, y| image::Rgba([x as u8, (y * 2) as u8, 128, 255]));
    gradient.save(dir.join("gradient.png")).context("failed to write gradient.png")?;

    std::fs::write(dir.join("lut.bin"), (0..=255u8).collect::<Vec<_>>()).context("failed to write lut.bin")?;

    let mut config = AssetPipelineConfig::default();
    config.fetch.asset_root = dir;

    let entry = |uri: &str, kind: &str| ResourceEntry {
        uri: uri.to_string(),
        kind: kind.to_string(),
    };
    let entries = vec![
        entry("checker.png", TextureLoader::KIND),
        entry("gradient.png", TextureLoader::KIND),
        entry("lut.bin", BinaryLoader::KIND),
        // 以下两个资源会失败
        entry("missing.png", TextureLoader::KIND),
        entry("model.obj", "Mesh"),
    ];
    Ok((config, entries))
}

fn report(manager: &ResourceManager) {
    for resource in manager.iter() {
        match resource.status() {
            ResourceStatus::Loaded => match manager.texture(resource.uri()) {
                Some(texture) => log::info!("{}: texture {}x{}", resource.uri(), texture.width, texture.height),
                None => {
                    let buffers = resource.form().transferables();
                    let bytes: usize = buffers.iter().map(|b| b.len()).sum();
                    log::info!("{}: {} buffer(s), {} bytes", resource.uri(), buffers.len(), bytes);
                }
            },
            ResourceStatus::Failed => {
                log::warn!("{}: {}", resource.uri(), resource.error().unwrap_or("unknown error"))
            }
            status => log::info!("{}: {}", resource.uri(), status),
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();

    let (config, entries) = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => load_config(&path)?,
        None if KilnPath::config_path().exists() => load_config(&KilnPath::config_path())?,
        None => demo_config()?,
    };

    let mut manager = ResourceManager::from_config(&config)?;
    let mut device = HeadlessDevice::new();

    manager.load_resource_list(entries.into_iter().map(|e| Resource::new(e.uri, e.kind)))?;

    let start = Instant::now();
    while !manager.is_settled() {
        if manager.frame_id() >= MAX_FRAMES {
            log::warn!("Giving up after {} frames: {:?}", MAX_FRAMES, manager.status_counts());
            break;
        }

        let frame_start = Instant::now();
        manager.update(&mut device);
        if let Some(client) = tracy_client::Client::running() {
            client.frame_mark();
        }
        if let Some(rest) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    let counts = manager.status_counts();
    log::info!(
        "Settled after {} frame(s) in {:?}: {} loaded, {} failed",
        manager.frame_id(),
        start.elapsed(),
        counts.loaded,
        counts.failed
    );
    report(&manager);

    manager.unload_all();
    manager.update(&mut device);
    log::info!(
        "Unloaded all resources, {} texture(s) still alive on device",
        device.live_texture_count()
    );

    Ok(())
}
