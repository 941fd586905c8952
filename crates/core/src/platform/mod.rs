//! Headless [`GraphicsPlatform`] driven by a declarative candidate list.
//!
//! Used by the command line front end and by tests. Each candidate carries
//! the attributes the negotiator scores plus fault flags that make individual
//! activation steps fail, and the platform counts live contexts and surfaces
//! so leaks show up as nonzero counters.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::surface::{ConfigDescriptor, ContextRequest, GraphicsPlatform, WindowFormat};
use crate::{Result, VisualiserError};

/// One platform-offered configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateSpec {
    pub id: i32,
    pub feature_level: bool,
    pub window: bool,
    pub rgb_buffer: bool,
    pub native_renderable: bool,
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub alpha: u32,
    pub buffer_size: u32,
    pub depth: u32,
    pub stencil: u32,
    pub alpha_mask: u32,
    pub sample_buffers: u32,
    pub samples: u32,
    pub fail_preferred_context: bool,
    pub fail_context: bool,
    pub fail_surface: bool,
    pub fail_make_current: bool,
}

impl Default for CandidateSpec {
    fn default() -> Self {
        Self {
            id: 0,
            feature_level: true,
            window: true,
            rgb_buffer: true,
            native_renderable: true,
            red: 8,
            green: 8,
            blue: 8,
            alpha: 0,
            buffer_size: 24,
            depth: 0,
            stencil: 0,
            alpha_mask: 0,
            sample_buffers: 0,
            samples: 0,
            fail_preferred_context: false,
            fail_context: false,
            fail_surface: false,
            fail_make_current: false,
        }
    }
}

impl ConfigDescriptor for CandidateSpec {
    fn config_id(&self) -> i32 {
        self.id
    }
    fn supports_feature_level(&self) -> bool {
        self.feature_level
    }
    fn supports_window(&self) -> bool {
        self.window
    }
    fn is_rgb_buffer(&self) -> bool {
        self.rgb_buffer
    }
    fn is_native_renderable(&self) -> bool {
        self.native_renderable
    }
    fn sample_buffers(&self) -> u32 {
        self.sample_buffers
    }
    fn samples(&self) -> u32 {
        self.samples
    }
    fn buffer_size(&self) -> u32 {
        self.buffer_size
    }
    fn depth_size(&self) -> u32 {
        self.depth
    }
    fn stencil_size(&self) -> u32 {
        self.stencil
    }
    fn alpha_mask_size(&self) -> u32 {
        self.alpha_mask
    }
    fn alpha_size(&self) -> u32 {
        self.alpha
    }
    fn red_size(&self) -> u32 {
        self.red
    }
    fn green_size(&self) -> u32 {
        self.green
    }
    fn blue_size(&self) -> u32 {
        self.blue
    }
}

/// File layout accepted by [`HeadlessPlatform::from_json_file`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadlessSpec {
    pub candidates: Vec<CandidateSpec>,
    pub width: u32,
    pub height: u32,
    /// Time `swap_buffers` blocks for, standing in for vsync.
    pub frame_interval_ms: u64,
}

impl Default for HeadlessSpec {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            width: 1280,
            height: 720,
            frame_interval_ms: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessContext {
    handle: u64,
    pub config_id: Option<i32>,
    pub request: ContextRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessSurface {
    handle: u64,
    pub config_id: i32,
    pub format: WindowFormat,
}

/// Host-side handle for resizing the headless drawable from any thread.
#[derive(Debug, Clone)]
pub struct SurfaceSizeHandle(Arc<AtomicU64>);

impl SurfaceSizeHandle {
    fn new(width: u32, height: u32) -> Self {
        Self(Arc::new(AtomicU64::new(pack(width, height))))
    }

    pub fn set(&self, width: u32, height: u32) {
        self.0.store(pack(width, height), Ordering::Relaxed);
    }

    pub fn get(&self) -> (u32, u32) {
        let packed = self.0.load(Ordering::Relaxed);
        ((packed >> 32) as u32, packed as u32)
    }
}

fn pack(width: u32, height: u32) -> u64 {
    (u64::from(width) << 32) | u64::from(height)
}

#[derive(Debug)]
pub struct HeadlessPlatform {
    candidates: Vec<CandidateSpec>,
    size: SurfaceSizeHandle,
    frame_interval: Duration,
    next_handle: u64,
    live_contexts: usize,
    live_surfaces: usize,
    current: Option<(u64, u64)>,
    presented: u64,
}

impl HeadlessPlatform {
    pub fn new(candidates: Vec<CandidateSpec>) -> Self {
        Self::from_spec(HeadlessSpec {
            candidates,
            frame_interval_ms: 0,
            ..HeadlessSpec::default()
        })
    }

    pub fn from_spec(spec: HeadlessSpec) -> Self {
        Self {
            candidates: spec.candidates,
            size: SurfaceSizeHandle::new(spec.width, spec.height),
            frame_interval: Duration::from_millis(spec.frame_interval_ms),
            next_handle: 1,
            live_contexts: 0,
            live_surfaces: 0,
            current: None,
            presented: 0,
        }
    }

    /// Reads either a bare candidate array or a full [`HeadlessSpec`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let spec = if value.is_array() {
            HeadlessSpec {
                candidates: serde_json::from_value(value)?,
                ..HeadlessSpec::default()
            }
        } else {
            serde_json::from_value(value)?
        };
        Ok(Self::from_spec(spec))
    }

    pub fn with_size(self, width: u32, height: u32) -> Self {
        self.size.set(width, height);
        self
    }

    pub fn size_handle(&self) -> SurfaceSizeHandle {
        self.size.clone()
    }

    pub fn live_contexts(&self) -> usize {
        self.live_contexts
    }

    pub fn live_surfaces(&self) -> usize {
        self.live_surfaces
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn spec(&self, config_id: i32) -> Option<&CandidateSpec> {
        self.candidates.iter().find(|c| c.id == config_id)
    }
}

impl GraphicsPlatform for HeadlessPlatform {
    type Config = CandidateSpec;
    type Context = HeadlessContext;
    type Surface = HeadlessSurface;

    fn candidate_configs(&mut self, limit: usize) -> Result<Vec<CandidateSpec>> {
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }

    fn create_context(
        &mut self,
        config: &CandidateSpec,
        request: ContextRequest,
    ) -> Result<HeadlessContext> {
        if config.fail_context
            || (request == ContextRequest::Preferred && config.fail_preferred_context)
        {
            return Err(VisualiserError::msg(format!(
                "context creation refused for config {} ({request:?})",
                config.id
            )));
        }
        self.live_contexts += 1;
        Ok(HeadlessContext {
            handle: self.handle(),
            config_id: Some(config.id),
            request,
        })
    }

    fn create_window_surface(
        &mut self,
        config: &CandidateSpec,
        format: WindowFormat,
    ) -> Result<HeadlessSurface> {
        if config.fail_surface {
            return Err(VisualiserError::msg(format!(
                "window surface refused for config {}",
                config.id
            )));
        }
        self.live_surfaces += 1;
        Ok(HeadlessSurface {
            handle: self.handle(),
            config_id: config.id,
            format,
        })
    }

    fn make_current(&mut self, surface: &HeadlessSurface, context: &HeadlessContext) -> Result<()> {
        if self.spec(surface.config_id).is_some_and(|c| c.fail_make_current) {
            return Err(VisualiserError::msg(format!(
                "make-current refused for config {}",
                surface.config_id
            )));
        }
        self.current = Some((surface.handle, context.handle));
        Ok(())
    }

    fn release_current(&mut self) {
        self.current = None;
    }

    fn destroy_surface(&mut self, surface: HeadlessSurface) {
        if self.current.is_some_and(|(s, _)| s == surface.handle) {
            self.current = None;
        }
        self.live_surfaces = self.live_surfaces.saturating_sub(1);
    }

    fn destroy_context(&mut self, context: HeadlessContext) {
        if self.current.is_some_and(|(_, c)| c == context.handle) {
            self.current = None;
        }
        self.live_contexts = self.live_contexts.saturating_sub(1);
    }

    fn create_fallback_context(&mut self) -> Result<HeadlessContext> {
        self.live_contexts += 1;
        Ok(HeadlessContext {
            handle: self.handle(),
            config_id: None,
            request: ContextRequest::Minimal,
        })
    }

    fn surface_size(&self, _surface: &HeadlessSurface) -> (u32, u32) {
        self.size.get()
    }

    fn swap_buffers(&mut self, surface: &HeadlessSurface) -> Result<()> {
        if self.current.map(|(s, _)| s) != Some(surface.handle) {
            return Err(VisualiserError::msg("swap on a surface that is not current"));
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        self.presented += 1;
        trace!(frame = self.presented, "presented");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_candidate_array() {
        let platform = HeadlessPlatform::from_json_str(
            r#"[{ "id": 3, "red": 5, "green": 6, "blue": 5 }, { "id": 4, "samples": 2 }]"#,
        )
        .unwrap();
        assert_eq!(platform.candidates.len(), 2);
        assert_eq!(platform.candidates[0].channel_bits(), (5, 6, 5));
        assert!(platform.candidates[1].native_renderable);
    }

    #[test]
    fn parses_full_platform_description() {
        let platform = HeadlessPlatform::from_json_str(
            r#"{
                "candidates": [{ "id": 1 }],
                "width": 800,
                "height": 600,
                "frame_interval_ms": 0
            }"#,
        )
        .unwrap();
        assert_eq!(platform.size_handle().get(), (800, 600));
        assert!(platform.frame_interval.is_zero());
    }

    #[test]
    fn size_handle_is_shared() {
        let platform = HeadlessPlatform::new(Vec::new()).with_size(10, 20);
        let handle = platform.size_handle();
        handle.set(30, 40);
        assert_eq!(platform.size_handle().get(), (30, 40));
    }

    #[test]
    fn swap_requires_a_current_surface() {
        let mut platform = HeadlessPlatform::new(vec![CandidateSpec::default()]);
        let config = CandidateSpec::default();
        let context = platform.create_context(&config, ContextRequest::Preferred).unwrap();
        let surface = platform
            .create_window_surface(&config, WindowFormat::Rgba8888)
            .unwrap();
        assert!(platform.swap_buffers(&surface).is_err());
        platform.make_current(&surface, &context).unwrap();
        platform.swap_buffers(&surface).unwrap();
        assert_eq!(platform.presented_frames(), 1);
    }
}
