//! Selection and activation of a rendering configuration.
//!
//! The platform offers a list of candidate configurations. They are filtered
//! for hard requirements, ordered so the lightest-weight candidate comes
//! first, restricted to the two window formats the surface can request, and
//! then activated one by one until a context, a surface and a successful
//! make-current all work together.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};

use tracing::{debug, info, warn};

use crate::config::SurfaceConfig;
use crate::signal::{AlertKind, ErrorSignal};
use crate::{Result, VisualiserError};

/// Read-only probes of a platform configuration used for filtering and
/// scoring. Implementations must return stable values.
pub trait ConfigDescriptor {
    fn config_id(&self) -> i32;
    /// Advertises the graphics API level the visualiser needs.
    fn supports_feature_level(&self) -> bool;
    /// Can back an on-screen window.
    fn supports_window(&self) -> bool;
    /// Color buffer is RGB ordered (as opposed to luminance and the like).
    fn is_rgb_buffer(&self) -> bool;
    fn is_native_renderable(&self) -> bool;
    fn sample_buffers(&self) -> u32;
    fn samples(&self) -> u32;
    fn buffer_size(&self) -> u32;
    fn depth_size(&self) -> u32;
    fn stencil_size(&self) -> u32;
    fn alpha_mask_size(&self) -> u32;
    fn alpha_size(&self) -> u32;
    fn red_size(&self) -> u32;
    fn green_size(&self) -> u32;
    fn blue_size(&self) -> u32;

    fn channel_bits(&self) -> (u32, u32, u32) {
        (self.red_size(), self.green_size(), self.blue_size())
    }
}

/// Kind of context requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRequest {
    /// Context at the required feature level.
    Preferred,
    /// Context with no attributes at all.
    Minimal,
}

/// Pixel format requested for the window surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFormat {
    Rgb565,
    Rgba8888,
}

impl WindowFormat {
    /// The format matching a candidate's channel depths, if the surface
    /// knows how to request it.
    pub fn for_channels(bits: (u32, u32, u32)) -> Option<Self> {
        match bits {
            (8, 8, 8) => Some(Self::Rgba8888),
            (5, 6, 5) => Some(Self::Rgb565),
            _ => None,
        }
    }
}

/// Platform graphics binding: configuration enumeration plus the handful of
/// calls needed to activate, present and release a surface.
///
/// Every method is called from the render thread only.
pub trait GraphicsPlatform {
    type Config: ConfigDescriptor;
    type Context;
    type Surface;

    /// Returns at most `limit` candidate configurations.
    fn candidate_configs(&mut self, limit: usize) -> Result<Vec<Self::Config>>;
    fn create_context(
        &mut self,
        config: &Self::Config,
        request: ContextRequest,
    ) -> Result<Self::Context>;
    fn create_window_surface(
        &mut self,
        config: &Self::Config,
        format: WindowFormat,
    ) -> Result<Self::Surface>;
    fn make_current(&mut self, surface: &Self::Surface, context: &Self::Context) -> Result<()>;
    fn release_current(&mut self);
    fn destroy_surface(&mut self, surface: Self::Surface);
    fn destroy_context(&mut self, context: Self::Context);
    /// Minimal context on the platform's default configuration, handed back
    /// when negotiation fails so the host keeps a valid object.
    fn create_fallback_context(&mut self) -> Result<Self::Context>;
    /// Current drawable size in pixels.
    fn surface_size(&self, surface: &Self::Surface) -> (u32, u32);
    /// Presents the frame. Blocks for the platform's refresh cadence.
    fn swap_buffers(&mut self, surface: &Self::Surface) -> Result<()>;
}

/// Lifecycle of one surface instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SurfaceState {
    Uninitialized = 0,
    Negotiating = 1,
    Unsupported = 2,
    Ready = 3,
    Destroyed = 4,
}

impl SurfaceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Unsupported | Self::Destroyed)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Negotiating,
            2 => Self::Unsupported,
            3 => Self::Ready,
            4 => Self::Destroyed,
            _ => Self::Uninitialized,
        }
    }
}

/// Atomically readable [`SurfaceState`]. Once a terminal state is stored no
/// further transition is accepted.
#[derive(Debug)]
pub struct SurfaceStateCell(AtomicU8);

impl SurfaceStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(SurfaceState::Uninitialized as u8))
    }

    pub fn get(&self) -> SurfaceState {
        SurfaceState::from_u8(self.0.load(AtomicOrdering::Acquire))
    }

    /// Moves to `next` unless the current state is terminal. Returns whether
    /// the transition happened.
    pub fn transition(&self, next: SurfaceState) -> bool {
        self.0
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |current| {
                if SurfaceState::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(next as u8)
                }
            })
            .is_ok()
    }
}

impl Default for SurfaceStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Activated configuration with its context and window surface.
pub struct ActiveSurface<P: GraphicsPlatform> {
    pub config: P::Config,
    pub context: P::Context,
    pub surface: P::Surface,
    pub format: WindowFormat,
}

impl<P: GraphicsPlatform> ActiveSurface<P> {
    /// Unbinds and destroys the context and surface.
    pub fn release(self, platform: &mut P) {
        platform.release_current();
        platform.destroy_surface(self.surface);
        platform.destroy_context(self.context);
    }
}

impl<P: GraphicsPlatform> fmt::Debug for ActiveSurface<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSurface")
            .field("config_id", &self.config.config_id())
            .field("format", &self.format)
            .finish()
    }
}

/// Outcome of a negotiation.
pub enum Negotiation<P: GraphicsPlatform> {
    Active(ActiveSurface<P>),
    /// Nothing could be activated. `fallback` is a minimal context for the
    /// host to hold on to, when the platform could create one.
    Unsupported { fallback: Option<P::Context> },
}

impl<P: GraphicsPlatform> Negotiation<P> {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }
}

impl<P: GraphicsPlatform> fmt::Debug for Negotiation<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(active) => f.debug_tuple("Active").field(active).finish(),
            Self::Unsupported { fallback } => f
                .debug_struct("Unsupported")
                .field("fallback", &fallback.is_some())
                .finish(),
        }
    }
}

/// Strict preference order between two candidates: `Less` means `a` is
/// preferred.
pub fn compare_candidates<C: ConfigDescriptor>(a: &C, b: &C) -> Ordering {
    // RGB and native candidates first, then the smallest of everything else.
    b.is_rgb_buffer()
        .cmp(&a.is_rgb_buffer())
        .then_with(|| b.is_native_renderable().cmp(&a.is_native_renderable()))
        .then_with(|| a.sample_buffers().cmp(&b.sample_buffers()))
        .then_with(|| a.samples().cmp(&b.samples()))
        .then_with(|| a.buffer_size().cmp(&b.buffer_size()))
        .then_with(|| a.depth_size().cmp(&b.depth_size()))
        .then_with(|| a.stencil_size().cmp(&b.stencil_size()))
        .then_with(|| a.alpha_mask_size().cmp(&b.alpha_mask_size()))
        .then_with(|| a.alpha_size().cmp(&b.alpha_size()))
        .then_with(|| a.config_id().cmp(&b.config_id()))
}

#[derive(Debug, Clone)]
pub struct SurfaceConfigNegotiator {
    min_channel_bits: u32,
    max_candidates: usize,
}

impl SurfaceConfigNegotiator {
    pub fn new(config: &SurfaceConfig) -> Self {
        Self {
            min_channel_bits: u32::from(config.min_channel_bits),
            max_candidates: config.max_candidates,
        }
    }

    /// Whether a candidate meets the hard requirements.
    pub fn accepts<C: ConfigDescriptor>(&self, candidate: &C) -> bool {
        let (r, g, b) = candidate.channel_bits();
        candidate.supports_feature_level()
            && candidate.supports_window()
            && r >= self.min_channel_bits
            && g >= self.min_channel_bits
            && b >= self.min_channel_bits
    }

    /// Filters and orders candidates, most preferred first.
    pub fn rank<C: ConfigDescriptor>(&self, candidates: Vec<C>) -> Vec<C> {
        let mut ranked: Vec<C> = candidates
            .into_iter()
            .take(self.max_candidates)
            .filter(|c| self.accepts(c))
            .collect();
        ranked.sort_by(compare_candidates);
        ranked
    }

    /// Ranked candidates paired with the window format each would use.
    /// Candidates in any format other than 888 or 565 are dropped here.
    pub fn activation_order<C: ConfigDescriptor>(
        &self,
        candidates: Vec<C>,
    ) -> Vec<(C, WindowFormat)> {
        self.rank(candidates)
            .into_iter()
            .filter_map(|c| WindowFormat::for_channels(c.channel_bits()).map(|f| (c, f)))
            .collect()
    }

    /// Selects and activates a configuration on `platform`.
    ///
    /// On failure the state moves to `Unsupported` and `signal` is raised;
    /// the caller still gets a fallback context when one can be made.
    pub fn negotiate<P: GraphicsPlatform>(
        &self,
        platform: &mut P,
        state: &SurfaceStateCell,
        signal: &ErrorSignal,
    ) -> Negotiation<P> {
        state.transition(SurfaceState::Negotiating);
        platform.release_current();

        let candidates = match platform.candidate_configs(self.max_candidates) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "failed to enumerate configurations");
                Vec::new()
            }
        };
        let offered = candidates.len();
        let ordered = self.activation_order(candidates);
        debug!(offered, usable = ordered.len(), "ranked candidate configurations");

        for (config, format) in ordered {
            match activate(platform, &config, format) {
                Ok((context, surface)) => {
                    info!(
                        config_id = config.config_id(),
                        ?format,
                        "activated rendering configuration"
                    );
                    return Negotiation::Active(ActiveSurface {
                        config,
                        context,
                        surface,
                        format,
                    });
                }
                Err(err) => {
                    debug!(
                        config_id = config.config_id(),
                        error = %err,
                        "candidate failed activation"
                    );
                }
            }
        }

        let err = VisualiserError::ConfigNegotiationFailed;
        warn!(offered, error = %err, "giving up on this surface");
        state.transition(SurfaceState::Unsupported);
        signal.raise(err.alert_kind().unwrap_or(AlertKind::Unsupported));
        let fallback = platform.create_fallback_context().ok();
        Negotiation::Unsupported { fallback }
    }
}

impl Default for SurfaceConfigNegotiator {
    fn default() -> Self {
        Self::new(&SurfaceConfig::default())
    }
}

/// Context, surface, make-current. Anything created is released again if a
/// later step fails.
fn activate<P: GraphicsPlatform>(
    platform: &mut P,
    config: &P::Config,
    format: WindowFormat,
) -> Result<(P::Context, P::Surface)> {
    let context = match platform.create_context(config, ContextRequest::Preferred) {
        Ok(context) => context,
        Err(err) => {
            debug!(config_id = config.config_id(), error = %err, "preferred context refused");
            platform.create_context(config, ContextRequest::Minimal)?
        }
    };

    let surface = match platform.create_window_surface(config, format) {
        Ok(surface) => surface,
        Err(err) => {
            platform.destroy_context(context);
            return Err(err);
        }
    };

    if let Err(err) = platform.make_current(&surface, &context) {
        platform.release_current();
        platform.destroy_surface(surface);
        platform.destroy_context(context);
        return Err(err);
    }

    Ok((context, surface))
}
