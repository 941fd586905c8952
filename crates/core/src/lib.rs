//! Core library for the audio-reactive visualiser.
//!
//! The crate negotiates a rendering configuration from platform-offered
//! candidates, hands audio magnitude snapshots and user-selected images to a
//! dedicated render thread through lock-free single-slot mailboxes, and drives
//! an opaque render backend once per tick. Each module owns one subsystem;
//! [`render::connect`] wires them together for a single surface.

pub mod analysis;
pub mod assets;
pub mod audio;
pub mod capability;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod platform;
pub mod record;
pub mod render;
pub mod scene;
pub mod signal;
pub mod surface;
pub mod timeline;

pub use analysis::SpectrumAnalyzer;
pub use assets::{
    AssetHandle, AssetLoadPipeline, AssetRequester, AssetSource, DecodedImage, FileSource,
};
pub use audio::{audio_bridge, AudioPublisher, AudioReceiver, AudioSnapshot};
pub use capability::{CapabilityProbe, FeatureLevelQuery, PropertyQuery};
pub use config::{AppConfig, AssetConfig, AudioConfig, SurfaceConfig, VisualiserConfig};
pub use error::{Result, VisualiserError};
pub use platform::{CandidateSpec, HeadlessPlatform};
pub use record::{Recorder, RecordingSummary};
pub use render::{
    connect, FrameInput, HostHandles, RenderBackend, RenderInputs, RenderLoop, RenderThread,
};
pub use scene::{VisualParameters, VisualiserKind};
pub use signal::{error_channel, AlertKind, AlertReceiver, ErrorSignal};
pub use surface::{
    ConfigDescriptor, GraphicsPlatform, Negotiation, SurfaceConfigNegotiator, SurfaceState,
};
pub use timeline::FrameClock;
