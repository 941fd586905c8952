use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Color scheme index for the green palette.
pub const COLOR_GREEN: u32 = 0;
/// Color scheme index for the blue palette.
pub const COLOR_BLUE: u32 = 257;
/// Highest animation speed level.
pub const MAX_SPEED: u8 = 2;
/// Number of magnitude points requested from the audio subsystem.
pub const DESIRED_POINT_COUNT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualiserKind {
    #[default]
    Spectrum,
    Liquid,
    Spin,
    Particle,
}

impl VisualiserKind {
    /// Maps a numeric kind, falling back to `Spectrum` when out of range.
    pub fn from_index(index: i32) -> Self {
        match index {
            1 => Self::Liquid,
            2 => Self::Spin,
            3 => Self::Particle,
            _ => Self::Spectrum,
        }
    }

    pub fn default_speed(self) -> u8 {
        match self {
            Self::Liquid | Self::Particle => 0,
            Self::Spectrum | Self::Spin => MAX_SPEED,
        }
    }

    /// Only the spectrum exposes the green/blue toggle.
    pub fn supports_color_toggle(self) -> bool {
        matches!(self, Self::Spectrum)
    }

    /// Only the liquid effect samples a user-chosen image.
    pub fn accepts_images(self) -> bool {
        matches!(self, Self::Liquid)
    }
}

/// Color scheme and animation speed shared between the UI and render threads.
///
/// Each field is a single atomic word written with relaxed ordering. The
/// render thread may observe an update one frame late, which is harmless.
#[derive(Debug)]
pub struct VisualParameters {
    color_index: AtomicU32,
    speed: AtomicU8,
}

impl VisualParameters {
    pub fn new(color_index: u32, speed: u8) -> Self {
        Self {
            color_index: AtomicU32::new(color_index),
            speed: AtomicU8::new(speed.min(MAX_SPEED)),
        }
    }

    pub fn for_kind(kind: VisualiserKind) -> Self {
        Self::new(COLOR_GREEN, kind.default_speed())
    }

    pub fn color_index(&self) -> u32 {
        self.color_index.load(Ordering::Relaxed)
    }

    pub fn set_color_index(&self, index: u32) {
        self.color_index.store(index, Ordering::Relaxed);
    }

    /// Flips between the green and blue palettes and returns the new index.
    pub fn toggle_color(&self) -> u32 {
        let next = if self.color_index() == COLOR_GREEN {
            COLOR_BLUE
        } else {
            COLOR_GREEN
        };
        self.set_color_index(next);
        next
    }

    pub fn speed(&self) -> u8 {
        self.speed.load(Ordering::Relaxed)
    }

    /// Sets the speed level, clamping to `0..=MAX_SPEED`.
    pub fn set_speed(&self, speed: u8) {
        self.speed.store(speed.min(MAX_SPEED), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u32, u8) {
        (self.color_index(), self.speed())
    }
}

impl Default for VisualParameters {
    fn default() -> Self {
        Self::for_kind(VisualiserKind::default())
    }
}
