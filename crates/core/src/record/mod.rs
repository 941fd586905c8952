use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::assets::DecodedImage;
use crate::render::{FrameInput, RenderBackend};
use crate::{Result, VisualiserError, VisualiserKind};

/// Everything the [`Recorder`] has observed so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub kind: Option<VisualiserKind>,
    pub inits: u32,
    pub teardowns: u32,
    pub frames_drawn: u64,
    pub updates: u64,
    pub viewport: Option<(u32, u32)>,
    pub last_elapsed_ms: u32,
    pub total_elapsed_ms: u64,
    pub last_color_index: u32,
    pub last_speed: u8,
    pub last_sequence: u64,
    pub last_peak: u8,
    pub silent_frames: u64,
    pub textures_uploaded: u32,
    pub last_texture: Option<(u32, u32)>,
}

/// Render backend that draws nothing and records every call instead.
#[derive(Debug, Default)]
pub struct Recorder {
    summary: RecordingSummary,
    fail_init: Option<i32>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose `init` fails with `code`.
    pub fn failing_init(code: i32) -> Self {
        Self {
            fail_init: Some(code),
            ..Self::default()
        }
    }

    pub fn summary(&self) -> &RecordingSummary {
        &self.summary
    }

    pub fn into_summary(self) -> RecordingSummary {
        self.summary
    }
}

impl RenderBackend for Recorder {
    fn init(&mut self, kind: VisualiserKind, color_index: u32, speed: u8) -> Result<()> {
        if let Some(code) = self.fail_init {
            return Err(VisualiserError::BackendInitFailed(code));
        }
        self.summary.kind = Some(kind);
        self.summary.inits += 1;
        self.summary.last_color_index = color_index;
        self.summary.last_speed = speed;
        debug!(?kind, color_index, speed, "recorder initialised");
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.summary.viewport = Some((width, height));
    }

    fn update(&mut self, frame: &FrameInput<'_>) {
        let summary = &mut self.summary;
        summary.updates += 1;
        summary.last_elapsed_ms = frame.elapsed_ms;
        summary.total_elapsed_ms += u64::from(frame.elapsed_ms);
        summary.last_color_index = frame.color_index;
        summary.last_speed = frame.speed;
        summary.last_sequence = frame.audio.sequence;
        summary.last_peak = frame.audio.magnitudes().iter().copied().max().unwrap_or(0);
        if frame.audio.is_silent() {
            summary.silent_frames += 1;
        }
    }

    fn draw(&mut self) {
        self.summary.frames_drawn += 1;
    }

    fn upload_texture(&mut self, image: &DecodedImage) {
        self.summary.textures_uploaded += 1;
        self.summary.last_texture = Some((image.width, image.height));
    }

    fn teardown(&mut self) {
        self.summary.teardowns += 1;
    }
}
