//! User-selected image assets, handed from the UI thread to the render
//! thread and decoded there at the next tick.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::path::PathBuf;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Limits};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AssetConfig;
use crate::mailbox::Slot;
use crate::{Result, VisualiserError};

/// Opaque resource identifier for an image, as produced by the host's picker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetHandle(String);

impl AssetHandle {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Local path for `file://` URIs and bare paths; `None` for other schemes.
    pub fn to_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.0.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if self.0.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.0))
    }
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ReadSeek: BufRead + Seek {}

impl<T: BufRead + Seek> ReadSeek for T {}

/// Resolves handles to readable byte streams. Called twice per load, once
/// for the bounds probe and once for the full decode.
pub trait AssetSource: Send {
    fn open(&self, handle: &AssetHandle) -> Result<Box<dyn ReadSeek>>;
}

/// Resolves `file://` URIs and plain paths on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSource;

impl AssetSource for FileSource {
    fn open(&self, handle: &AssetHandle) -> Result<Box<dyn ReadSeek>> {
        let path = handle.to_path().ok_or_else(|| {
            VisualiserError::AssetDecodeFailed(format!("unsupported asset uri `{handle}`"))
        })?;
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }
}

/// Creates the UI-side requester and the render-side inbox.
pub fn asset_channel() -> (AssetRequester, AssetInbox) {
    let slot = Arc::new(Slot::new());
    (AssetRequester { slot: slot.clone() }, AssetInbox { slot })
}

/// UI-side end. A new request replaces any request not yet picked up.
#[derive(Debug)]
pub struct AssetRequester {
    slot: Arc<Slot<AssetHandle>>,
}

impl AssetRequester {
    /// Returns `true` when an unconsumed earlier request was superseded.
    pub fn request_load(&self, handle: AssetHandle) -> bool {
        debug!(%handle, "image load requested");
        self.slot.put(handle)
    }

    /// Whether a request is still waiting for the render thread.
    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }
}

/// Render-side end.
#[derive(Debug)]
pub struct AssetInbox {
    slot: Arc<Slot<AssetHandle>>,
}

impl AssetInbox {
    pub fn take(&self) -> Option<AssetHandle> {
        self.slot.take()
    }
}

/// Decoded texture source in RGB565, row-major, no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u16>,
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Largest texture side allowed for a viewport, clamped to the configured
/// bounds.
pub fn target_dimension(viewport: (u32, u32), bounds: &AssetConfig) -> u32 {
    viewport
        .0
        .max(viewport.1)
        .clamp(bounds.min_texture_dim, bounds.max_texture_dim)
}

/// Smallest power of two `f` with `largest / f <= target`.
pub fn downsample_factor(largest: u32, target: u32) -> u32 {
    let target = u64::from(target.max(1));
    let largest = u64::from(largest);
    let mut factor = 1u64;
    while largest > target * factor {
        factor <<= 1;
    }
    u32::try_from(factor).unwrap_or(u32::MAX)
}

/// Whether the image must be turned to match the viewport's orientation.
/// Square images never are.
pub fn needs_rotation(image: (u32, u32), viewport: (u32, u32)) -> bool {
    image.0 != image.1 && (image.0 > image.1) != (viewport.0 > viewport.1)
}

/// Packs 8-bit RGB into RGB565.
pub fn pack_rgb565(r: u8, g: u8, b: u8) -> u16 {
    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3)
}

/// Render-side loader: picks up the pending request once per tick and turns
/// it into a texture-ready [`DecodedImage`].
pub struct AssetLoadPipeline {
    inbox: AssetInbox,
    source: Box<dyn AssetSource>,
    bounds: AssetConfig,
}

impl AssetLoadPipeline {
    pub fn new(inbox: AssetInbox, source: Box<dyn AssetSource>, bounds: AssetConfig) -> Self {
        Self {
            inbox,
            source,
            bounds,
        }
    }

    /// Drops the pending request without decoding it.
    pub fn discard(&mut self) -> Option<AssetHandle> {
        self.inbox.take()
    }

    /// Processes the pending request, if any.
    ///
    /// Failures are logged and dropped: the caller keeps whatever texture it
    /// already had.
    pub fn tick(&mut self, viewport: (u32, u32)) -> Option<DecodedImage> {
        let handle = self.inbox.take()?;
        match self.load(&handle, viewport) {
            Ok(image) => {
                info!(
                    %handle,
                    width = image.width,
                    height = image.height,
                    "image asset decoded"
                );
                Some(image)
            }
            Err(err) => {
                debug!(%handle, error = %err, "dropping image asset");
                None
            }
        }
    }

    /// Probe, pick a downsample factor, decode, reorient, pack.
    pub fn load(&self, handle: &AssetHandle, viewport: (u32, u32)) -> Result<DecodedImage> {
        let (width, height) = ImageReader::new(self.source.open(handle)?)
            .with_guessed_format()?
            .into_dimensions()?;
        if width == 0 || height == 0 {
            return Err(VisualiserError::AssetDecodeFailed(format!(
                "`{handle}` has no pixels"
            )));
        }
        if width.max(height) > self.bounds.max_source_dim {
            return Err(VisualiserError::AssetDecodeFailed(format!(
                "`{handle}` is {width}x{height}, larger than {}",
                self.bounds.max_source_dim
            )));
        }

        let target = target_dimension(viewport, &self.bounds);
        let factor = downsample_factor(width.max(height), target);
        debug!(%handle, width, height, target, factor, "probed image bounds");

        let mut reader = ImageReader::new(self.source.open(handle)?).with_guessed_format()?;
        reader.limits(self.decode_limits());
        let mut image = reader.decode()?;
        if factor > 1 {
            image = image.resize_exact(
                (image.width() / factor).max(1),
                (image.height() / factor).max(1),
                FilterType::Triangle,
            );
        }
        if needs_rotation((image.width(), image.height()), viewport) {
            image = image.rotate270();
        }
        Ok(to_rgb565(image))
    }

    fn decode_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.bounds.max_source_dim);
        limits.max_image_height = Some(self.bounds.max_source_dim);
        limits.max_alloc = Some(self.bounds.max_decode_bytes);
        limits
    }
}

impl fmt::Debug for AssetLoadPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetLoadPipeline")
            .field("bounds", &self.bounds)
            .finish()
    }
}

fn to_rgb565(image: DynamicImage) -> DecodedImage {
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    let pixels = rgb
        .pixels()
        .map(|p| pack_rgb565(p[0], p[1], p[2]))
        .collect();
    DecodedImage {
        width,
        height,
        pixels,
    }
}
