//! Render-thread side of the visualiser.
//!
//! [`RenderLoop`] owns the graphics platform, the negotiated surface and the
//! render backend. The host drives it through `surface_created`,
//! `surface_changed`, `tick`, `surface_lost` and `destroy`, always from the
//! same thread; [`RenderThread`] does exactly that on a dedicated thread.

mod thread;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::assets::{
    asset_channel, AssetLoadPipeline, AssetRequester, AssetSource, DecodedImage,
};
use crate::audio::{audio_bridge, AudioPublisher, AudioReceiver, AudioSnapshot};
use crate::capability::{CapabilityProbe, FeatureLevelQuery};
use crate::config::AppConfig;
use crate::signal::{error_channel, AlertKind, AlertReceiver, ErrorSignal};
use crate::surface::{
    ActiveSurface, GraphicsPlatform, Negotiation, SurfaceConfigNegotiator, SurfaceState,
    SurfaceStateCell,
};
use crate::timeline::FrameClock;
use crate::scene::COLOR_GREEN;
use crate::{Result, VisualParameters, VisualiserError, VisualiserKind};

pub use thread::RenderThread;

/// Per-frame input handed to the backend's update entry point.
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub audio: &'a AudioSnapshot,
    /// Milliseconds since the previous tick.
    pub elapsed_ms: u32,
    pub color_index: u32,
    pub speed: u8,
}

/// The opaque drawing engine. All calls come from the render thread while
/// the negotiated context is current.
pub trait RenderBackend: Send {
    /// Prepares GPU resources. Failures should carry the backend's own code
    /// as [`VisualiserError::BackendInitFailed`].
    fn init(&mut self, kind: VisualiserKind, color_index: u32, speed: u8) -> Result<()>;
    fn resize(&mut self, width: u32, height: u32);
    fn update(&mut self, frame: &FrameInput<'_>);
    fn draw(&mut self);
    fn upload_texture(&mut self, image: &DecodedImage);
    fn teardown(&mut self);
}

/// Render-side ends of every cross-thread path.
#[derive(Debug)]
pub struct RenderInputs {
    pub audio: AudioReceiver,
    pub assets: AssetLoadPipeline,
    pub params: Arc<VisualParameters>,
    pub signal: ErrorSignal,
    pub state: Arc<SurfaceStateCell>,
}

/// UI-side ends: the only things the host thread writes or reads.
#[derive(Debug)]
pub struct HostHandles {
    pub assets: AssetRequester,
    pub params: Arc<VisualParameters>,
    pub alerts: AlertReceiver,
    pub state: Arc<SurfaceStateCell>,
}

impl HostHandles {
    pub fn surface_state(&self) -> SurfaceState {
        self.state.get()
    }
}

/// Builds every mailbox for one surface instance and splits them into the
/// host, audio-producer and render-thread ends.
pub fn connect(
    config: &AppConfig,
    source: Box<dyn AssetSource>,
) -> (HostHandles, AudioPublisher, RenderInputs) {
    let (publisher, receiver) = audio_bridge();
    let (requester, inbox) = asset_channel();
    let (signal, alerts) = error_channel();
    let kind = config.visualiser.kind;
    let params = Arc::new(VisualParameters::for_kind(kind));
    params.set_speed(config.visualiser.initial_speed());
    if kind.supports_color_toggle() {
        params.set_color_index(config.visualiser.color_index);
    }
    let state = Arc::new(SurfaceStateCell::new());

    let host = HostHandles {
        assets: requester,
        params: params.clone(),
        alerts,
        state: state.clone(),
    };
    let inputs = RenderInputs {
        audio: receiver,
        assets: AssetLoadPipeline::new(inbox, source, config.assets.clone()),
        params,
        signal,
        state,
    };
    (host, publisher, inputs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    /// Surface negotiated and backend initialised, no size yet.
    Configured,
    Ready,
    Destroyed,
}

/// Owner of the graphics context for one surface instance.
///
/// Call [`RenderLoop::destroy`] (or [`RenderLoop::into_backend`]) before
/// dropping it so the platform objects are released on the render thread.
pub struct RenderLoop<P: GraphicsPlatform, B: RenderBackend> {
    platform: P,
    backend: B,
    kind: VisualiserKind,
    min_feature_level: u32,
    negotiator: SurfaceConfigNegotiator,
    probe: &'static CapabilityProbe,
    query: Box<dyn FeatureLevelQuery>,
    inputs: RenderInputs,
    clock: FrameClock,
    phase: Phase,
    active: Option<ActiveSurface<P>>,
    fallback: Option<P::Context>,
    backend_live: bool,
    viewport: (u32, u32),
}

impl<P: GraphicsPlatform, B: RenderBackend> RenderLoop<P, B> {
    /// Creates a loop that uses the process-wide capability probe.
    pub fn new(
        config: &AppConfig,
        platform: P,
        backend: B,
        query: Box<dyn FeatureLevelQuery>,
        inputs: RenderInputs,
    ) -> Self {
        Self::with_probe(config, platform, backend, CapabilityProbe::global(), query, inputs)
    }

    pub fn with_probe(
        config: &AppConfig,
        platform: P,
        backend: B,
        probe: &'static CapabilityProbe,
        query: Box<dyn FeatureLevelQuery>,
        inputs: RenderInputs,
    ) -> Self {
        let render = Self {
            platform,
            backend,
            kind: config.visualiser.kind,
            min_feature_level: config.surface.min_feature_level,
            negotiator: SurfaceConfigNegotiator::new(&config.surface),
            probe,
            query,
            inputs,
            clock: FrameClock::new(),
            phase: Phase::Created,
            active: None,
            fallback: None,
            backend_live: false,
            viewport: config.visualiser.provisional_viewport(),
        };

        // A level cached by an earlier surface decides right away.
        if let Some(Err(err)) = render.probe.cached_verdict(render.min_feature_level) {
            render.disable(&err);
        }
        render
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> SurfaceState {
        self.inputs.state.get()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn active_surface(&self) -> Option<&ActiveSurface<P>> {
        self.active.as_ref()
    }

    pub fn into_backend(mut self) -> B {
        self.destroy();
        self.backend
    }

    /// Probes capabilities, negotiates a configuration and initialises the
    /// backend. Does nothing once the surface is unsupported or destroyed.
    pub fn surface_created(&mut self) {
        if self.phase == Phase::Destroyed || self.state().is_terminal() {
            return;
        }
        if self.active.is_some() {
            self.surface_lost();
        }

        if let Err(err) = self.probe.check(self.query.as_ref(), self.min_feature_level) {
            self.disable(&err);
            return;
        }

        let active = match self.negotiator.negotiate(
            &mut self.platform,
            &self.inputs.state,
            &self.inputs.signal,
        ) {
            Negotiation::Active(active) => active,
            Negotiation::Unsupported { fallback } => {
                self.fallback = fallback;
                return;
            }
        };
        self.active = Some(active);

        let (color_index, speed) = self.frame_params();
        if let Err(err) = self.backend.init(self.kind, color_index, speed) {
            let err = match err {
                VisualiserError::BackendInitFailed(_) => err,
                other => {
                    debug!(error = %other, "backend init failed without a code");
                    VisualiserError::BackendInitFailed(-1)
                }
            };
            self.release_surface();
            self.disable(&err);
            return;
        }
        self.backend_live = true;
        self.clock.reset();
        self.phase = Phase::Configured;
        self.inputs.state.transition(SurfaceState::Ready);
        info!(kind = ?self.kind, "render surface configured");
    }

    /// Surface reported a (new) size. Moves a configured loop to `Ready`;
    /// an empty size is ignored.
    pub fn surface_changed(&mut self, width: u32, height: u32) {
        if !matches!(self.phase, Phase::Configured | Phase::Ready) {
            return;
        }
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring empty surface size");
            return;
        }
        self.viewport = (width, height);
        self.backend.resize(width, height);
        if self.phase == Phase::Configured {
            info!(width, height, "render loop ready");
        } else {
            debug!(width, height, "render surface resized");
        }
        self.phase = Phase::Ready;
    }

    /// Reports the platform's drawable size if it changed since last time.
    pub fn poll_surface_size(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        let size = self.platform.surface_size(&active.surface);
        if self.phase == Phase::Configured || size != self.viewport {
            self.surface_changed(size.0, size.1);
        }
    }

    /// Runs one frame. Returns whether a frame was drawn; before the loop is
    /// ready this is a no-op.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.phase != Phase::Ready || self.state() != SurfaceState::Ready {
            return false;
        }

        if self.kind.accepts_images() {
            if let Some(image) = self.inputs.assets.tick(self.viewport) {
                self.backend.upload_texture(&image);
            }
        } else if let Some(handle) = self.inputs.assets.discard() {
            debug!(%handle, kind = ?self.kind, "kind takes no images, request dropped");
        }

        let elapsed_ms = self.clock.tick(now);
        let (color_index, speed) = self.frame_params();
        let audio = self.inputs.audio.consume();
        self.backend.update(&FrameInput {
            audio,
            elapsed_ms,
            color_index,
            speed,
        });
        self.backend.draw();

        if let Some(active) = self.active.as_ref() {
            if let Err(err) = self.platform.swap_buffers(&active.surface) {
                debug!(error = %err, "swap failed");
            }
        }
        trace!(frame = self.clock.frames(), elapsed_ms, "frame drawn");
        true
    }

    /// The host tore the surface down. Releases everything tied to the
    /// context; a later `surface_created` negotiates from scratch.
    pub fn surface_lost(&mut self) {
        if self.phase == Phase::Destroyed {
            return;
        }
        self.release_surface();
        if self.phase != Phase::Created {
            self.phase = Phase::Created;
            self.inputs.state.transition(SurfaceState::Uninitialized);
        }
    }

    /// Final teardown. Safe to call any number of times.
    pub fn destroy(&mut self) {
        if self.phase == Phase::Destroyed {
            return;
        }
        self.release_surface();
        self.phase = Phase::Destroyed;
        self.inputs.state.transition(SurfaceState::Destroyed);
        debug!("render loop destroyed");
    }

    /// Current parameters, with the palette pinned to green for kinds that
    /// have no colour toggle.
    fn frame_params(&self) -> (u32, u8) {
        let (color_index, speed) = self.inputs.params.snapshot();
        if self.kind.supports_color_toggle() {
            (color_index, speed)
        } else {
            (COLOR_GREEN, speed)
        }
    }

    fn release_surface(&mut self) {
        if self.backend_live {
            self.backend.teardown();
            self.backend_live = false;
        }
        if let Some(active) = self.active.take() {
            active.release(&mut self.platform);
        }
        if let Some(fallback) = self.fallback.take() {
            self.platform.destroy_context(fallback);
        }
        self.clock.reset();
    }

    fn disable(&self, err: &VisualiserError) {
        warn!(error = %err, "rendering disabled for this surface");
        self.inputs.state.transition(SurfaceState::Unsupported);
        let kind = err.alert_kind().unwrap_or(AlertKind::Unsupported);
        self.inputs.signal.raise(kind);
    }
}

impl<P: GraphicsPlatform, B: RenderBackend> std::fmt::Debug for RenderLoop<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .field("state", &self.state())
            .field("viewport", &self.viewport)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetHandle, FileSource};
    use crate::platform::{CandidateSpec, HeadlessPlatform};
    use crate::record::Recorder;
    use crate::scene::COLOR_BLUE;

    fn probe() -> &'static CapabilityProbe {
        Box::leak(Box::new(CapabilityProbe::new()))
    }

    fn level(level: u32) -> Box<dyn FeatureLevelQuery> {
        Box::new(move || -> Result<u32> { Ok(level) })
    }

    fn config_for(kind: VisualiserKind) -> AppConfig {
        let mut config = AppConfig::default();
        config.visualiser.kind = kind;
        config
    }

    fn build(
        candidates: Vec<CandidateSpec>,
        backend: Recorder,
    ) -> (HostHandles, AudioPublisher, RenderLoop<HeadlessPlatform, Recorder>) {
        build_with(AppConfig::default(), candidates, backend)
    }

    fn build_with(
        config: AppConfig,
        candidates: Vec<CandidateSpec>,
        backend: Recorder,
    ) -> (HostHandles, AudioPublisher, RenderLoop<HeadlessPlatform, Recorder>) {
        let (host, publisher, inputs) = connect(&config, Box::new(FileSource));
        let platform = HeadlessPlatform::new(candidates).with_size(800, 600);
        let render = RenderLoop::with_probe(
            &config,
            platform,
            backend,
            probe(),
            level(0x0003_0000),
            inputs,
        );
        (host, publisher, render)
    }

    #[test]
    fn ticks_are_noops_until_sized() {
        let (_host, _publisher, mut render) =
            build(vec![CandidateSpec::default()], Recorder::new());
        assert!(!render.tick(Instant::now()));

        render.surface_created();
        assert_eq!(render.phase(), Phase::Configured);
        assert_eq!(render.state(), SurfaceState::Ready);
        assert!(!render.tick(Instant::now()));

        render.poll_surface_size();
        assert_eq!(render.phase(), Phase::Ready);
        assert_eq!(render.viewport(), (800, 600));
        assert!(render.tick(Instant::now()));
        assert_eq!(render.backend().summary().frames_drawn, 1);
        assert_eq!(render.platform().presented_frames(), 1);
    }

    #[test]
    fn each_tick_feeds_latest_audio_and_parameters() {
        let (host, mut publisher, mut render) =
            build(vec![CandidateSpec::default()], Recorder::new());
        render.surface_created();
        render.surface_changed(640, 480);

        publisher.publish_frame(Some(&[10; 8]), 5);
        publisher.publish_frame(Some(&[99; 8]), 5);
        host.params.toggle_color();
        host.params.set_speed(1);
        assert!(render.tick(Instant::now()));

        let summary = render.backend().summary();
        assert_eq!(summary.last_peak, 99);
        assert_eq!(summary.last_sequence, 2);
        assert_eq!(summary.last_color_index, 257);
        assert_eq!(summary.last_speed, 1);

        // no new publish: the same snapshot is reused
        assert!(render.tick(Instant::now()));
        assert_eq!(render.backend().summary().last_sequence, 2);
    }

    #[test]
    fn unsupported_level_disables_once() {
        let config = AppConfig::default();
        let (host, _publisher, inputs) = connect(&config, Box::new(FileSource));
        let platform = HeadlessPlatform::new(vec![CandidateSpec::default()]);
        let mut render = RenderLoop::with_probe(
            &config,
            platform,
            Recorder::new(),
            probe(),
            level(0x0001_0000),
            inputs,
        );

        render.surface_created();
        render.surface_created();
        render.surface_changed(100, 100);
        assert!(!render.tick(Instant::now()));
        assert_eq!(host.surface_state(), SurfaceState::Unsupported);
        assert_eq!(host.alerts.try_take(), Some(AlertKind::Unsupported));
        assert_eq!(host.alerts.try_take(), None);
        assert_eq!(render.platform().live_contexts(), 0);
    }

    #[test]
    fn backend_failure_reports_its_code() {
        let (host, _publisher, mut render) =
            build(vec![CandidateSpec::default()], Recorder::failing_init(5));
        render.surface_created();

        assert_eq!(host.surface_state(), SurfaceState::Unsupported);
        assert_eq!(host.alerts.try_take(), Some(AlertKind::Internal(5)));
        assert!(render.active_surface().is_none());
        assert_eq!(render.platform().live_contexts(), 0);
        assert_eq!(render.platform().live_surfaces(), 0);
    }

    #[test]
    fn failed_image_keeps_previous_texture_and_stays_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbImage::new(30, 20).save(&good).unwrap();

        let (host, _publisher, mut render) = build_with(
            config_for(VisualiserKind::Liquid),
            vec![CandidateSpec::default()],
            Recorder::new(),
        );
        render.surface_created();
        render.surface_changed(800, 600);

        host.assets.request_load(AssetHandle::new(good.display().to_string()));
        render.tick(Instant::now());
        assert_eq!(render.backend().summary().last_texture, Some((30, 20)));

        host.assets.request_load(AssetHandle::new("/no/such/image.png"));
        assert!(render.tick(Instant::now()));
        let summary = render.backend().summary();
        assert_eq!(summary.textures_uploaded, 1);
        assert_eq!(summary.last_texture, Some((30, 20)));
        assert!(host.alerts.try_take().is_none());
    }

    #[test]
    fn kinds_without_images_drop_requests_unread() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbImage::new(30, 20).save(&good).unwrap();

        let (host, _publisher, mut render) = build_with(
            config_for(VisualiserKind::Spin),
            vec![CandidateSpec::default()],
            Recorder::new(),
        );
        render.surface_created();
        render.surface_changed(800, 600);

        host.assets.request_load(AssetHandle::new(good.display().to_string()));
        assert!(render.tick(Instant::now()));
        assert!(!host.assets.is_pending());
        assert_eq!(render.backend().summary().textures_uploaded, 0);
        assert_eq!(render.backend().summary().last_texture, None);
    }

    #[test]
    fn palette_stays_green_without_a_colour_toggle() {
        let mut config = config_for(VisualiserKind::Particle);
        config.visualiser.color_index = COLOR_BLUE;
        let (host, _publisher, mut render) =
            build_with(config, vec![CandidateSpec::default()], Recorder::new());
        assert_eq!(host.params.color_index(), COLOR_GREEN);

        render.surface_created();
        assert_eq!(render.backend().summary().last_color_index, COLOR_GREEN);

        render.surface_changed(800, 600);
        host.params.toggle_color();
        assert!(render.tick(Instant::now()));
        assert_eq!(render.backend().summary().last_color_index, COLOR_GREEN);
        assert_eq!(render.backend().summary().last_speed, 0);
    }

    #[test]
    fn spectrum_starts_with_the_configured_palette() {
        let mut config = AppConfig::default();
        config.visualiser.color_index = COLOR_BLUE;
        let (_host, _publisher, mut render) =
            build_with(config, vec![CandidateSpec::default()], Recorder::new());

        render.surface_created();
        assert_eq!(render.backend().summary().last_color_index, COLOR_BLUE);
    }

    #[test]
    fn empty_sizes_do_not_make_the_loop_ready() {
        let (_host, _publisher, mut render) =
            build(vec![CandidateSpec::default()], Recorder::new());
        render.surface_created();

        render.surface_changed(0, 0);
        render.surface_changed(0, 600);
        assert_eq!(render.phase(), Phase::Configured);
        assert_eq!(render.backend().summary().viewport, None);
        assert!(!render.tick(Instant::now()));

        render.surface_changed(640, 480);
        render.surface_changed(640, 0);
        assert_eq!(render.phase(), Phase::Ready);
        assert_eq!(render.viewport(), (640, 480));
    }

    #[test]
    fn surface_loss_renegotiates_from_scratch() {
        let (host, _publisher, mut render) = build(vec![CandidateSpec::default()], Recorder::new());
        render.surface_created();
        render.surface_changed(800, 600);
        assert!(render.tick(Instant::now()));

        render.surface_lost();
        assert_eq!(host.surface_state(), SurfaceState::Uninitialized);
        assert_eq!(render.platform().live_contexts(), 0);
        assert!(!render.tick(Instant::now()));

        render.surface_created();
        render.surface_changed(800, 600);
        assert!(render.tick(Instant::now()));
        assert_eq!(render.backend().summary().inits, 2);
        assert_eq!(render.backend().summary().teardowns, 1);
    }

    #[test]
    fn destroy_is_idempotent_and_terminal() {
        let (host, _publisher, mut render) = build(vec![CandidateSpec::default()], Recorder::new());
        render.surface_created();
        render.surface_changed(800, 600);

        render.destroy();
        render.destroy();
        render.surface_created();
        assert!(!render.tick(Instant::now()));
        assert_eq!(host.surface_state(), SurfaceState::Destroyed);
        assert_eq!(render.backend().summary().teardowns, 1);
        assert_eq!(render.platform().live_contexts(), 0);
        assert_eq!(render.platform().live_surfaces(), 0);
    }
}
