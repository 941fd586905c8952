use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, VisualiserError, VisualiserKind};

/// Feature level 2.0, encoded as `major << 16 | minor`.
pub const MIN_FEATURE_LEVEL: u32 = 0x0002_0000;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub visualiser: VisualiserConfig,
    pub surface: SurfaceConfig,
    pub assets: AssetConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads a JSON configuration file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Checks cross-field constraints and returns the configuration unchanged.
    pub fn validated(self) -> Result<Self> {
        if self.assets.min_texture_dim == 0 {
            return Err(VisualiserError::msg("assets.min_texture_dim must be positive"));
        }
        if self.assets.min_texture_dim > self.assets.max_texture_dim {
            return Err(VisualiserError::msg(format!(
                "assets.min_texture_dim ({}) exceeds assets.max_texture_dim ({})",
                self.assets.min_texture_dim, self.assets.max_texture_dim
            )));
        }
        if self.surface.max_candidates == 0 {
            return Err(VisualiserError::msg("surface.max_candidates must be positive"));
        }
        if self.audio.sample_rate == 0 {
            return Err(VisualiserError::msg("audio.sample_rate must be positive"));
        }
        if !self.audio.fft_size.is_power_of_two() || self.audio.fft_size < 2 {
            return Err(VisualiserError::msg(format!(
                "audio.fft_size ({}) must be a power of two",
                self.audio.fft_size
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualiserConfig {
    pub kind: VisualiserKind,
    pub color_index: u32,
    /// Falls back to the kind's default speed when absent.
    pub speed: Option<u8>,
    /// Orientation assumed before the surface reports its real size.
    pub landscape: bool,
}

impl VisualiserConfig {
    pub fn initial_speed(&self) -> u8 {
        self.speed.unwrap_or_else(|| self.kind.default_speed())
    }

    /// Viewport used until the surface reports a size.
    pub fn provisional_viewport(&self) -> (u32, u32) {
        if self.landscape {
            (1024, 512)
        } else {
            (512, 1024)
        }
    }
}

impl Default for VisualiserConfig {
    fn default() -> Self {
        Self {
            kind: VisualiserKind::Spectrum,
            color_index: 0,
            speed: None,
            landscape: true,
        }
    }
}

/// Thresholds applied while negotiating a rendering configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub min_feature_level: u32,
    pub min_channel_bits: u8,
    pub max_candidates: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            min_feature_level: MIN_FEATURE_LEVEL,
            min_channel_bits: 4,
            max_candidates: 64,
        }
    }
}

/// Bounds on the texture produced from a user-selected image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub min_texture_dim: u32,
    pub max_texture_dim: u32,
    /// Images with a longer side are refused before decoding.
    pub max_source_dim: u32,
    /// Upper bound on what a single decode may allocate.
    pub max_decode_bytes: u64,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            min_texture_dim: 320,
            max_texture_dim: 1024,
            max_source_dim: 16_384,
            max_decode_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub fft_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            fft_size: 2048,
        }
    }
}
