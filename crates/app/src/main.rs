use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reactive_visualiser_core::surface::SurfaceStateCell;
use reactive_visualiser_core::{
    connect, error_channel, AppConfig, AssetHandle, AudioPublisher, CapabilityProbe,
    ConfigDescriptor, FileSource, GraphicsPlatform, HeadlessPlatform, Negotiation,
    PropertyQuery, Recorder, RenderLoop, RenderThread, SpectrumAnalyzer,
    SurfaceConfigNegotiator, VisualiserError, VisualiserKind,
};
use tracing_subscriber::EnvFilter;

fn main() -> reactive_visualiser_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::live_defaults(),
    }
    .validated()?;
    if let Some(index) = cli.kind {
        config.visualiser.kind = VisualiserKind::from_index(index);
    }

    match cli.command {
        Commands::Probe => run_probe(&config),
        Commands::Negotiate { configs } => run_negotiate(&config, &configs),
        Commands::Run {
            configs,
            duration_ms,
            image,
        } => run_live(config, &configs, duration_ms, image),
    }
}

fn run_probe(config: &AppConfig) -> reactive_visualiser_core::Result<()> {
    let probe = CapabilityProbe::global();
    match probe.check(&PropertyQuery::opengles(), config.surface.min_feature_level) {
        Ok(Some(level)) => println!("feature level {level:#010x}: supported"),
        Ok(None) => println!("feature level unknown: assuming supported"),
        Err(VisualiserError::CapabilityUnsupported { level }) => {
            println!("feature level {level:#010x}: unsupported")
        }
        Err(err) => return Err(err),
    }
    Ok(())
}

fn run_negotiate(config: &AppConfig, configs: &Path) -> reactive_visualiser_core::Result<()> {
    tracing::info!(configs = %configs.display(), "negotiating against headless platform");

    let mut platform = HeadlessPlatform::from_json_file(configs)?;
    let negotiator = SurfaceConfigNegotiator::new(&config.surface);
    let (signal, alerts) = error_channel();
    let state = SurfaceStateCell::new();

    match negotiator.negotiate(&mut platform, &state, &signal) {
        Negotiation::Active(active) => {
            let (r, g, b) = active.config.channel_bits();
            println!(
                "selected config {} ({r}/{g}/{b}, {:?})",
                active.config.config_id(),
                active.format
            );
            active.release(&mut platform);
        }
        Negotiation::Unsupported { fallback } => {
            if let Some(alert) = alerts.try_take() {
                println!("unsupported: {alert}");
            }
            if let Some(context) = fallback {
                platform.destroy_context(context);
            }
        }
    }
    Ok(())
}

fn run_live(
    config: AppConfig,
    configs: &Path,
    duration_ms: u64,
    image: Option<PathBuf>,
) -> reactive_visualiser_core::Result<()> {
    tracing::info!(kind = ?config.visualiser.kind, duration_ms, "starting live mode");

    let platform = HeadlessPlatform::from_json_file(configs)?;
    let (host, publisher, inputs) = connect(&config, Box::new(FileSource));

    let render_config = config.clone();
    let mut render = RenderThread::spawn(move || {
        RenderLoop::new(
            &render_config,
            platform,
            Recorder::new(),
            Box::new(PropertyQuery::opengles()),
            inputs,
        )
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    let producer = spawn_synthetic_audio(&config, publisher, stop.clone())?;

    let kind = config.visualiser.kind;
    match image {
        Some(path) if kind.accepts_images() => {
            host.assets
                .request_load(AssetHandle::new(path.display().to_string()));
        }
        Some(path) => {
            tracing::warn!(?kind, image = %path.display(), "this visualiser takes no images");
        }
        None => {}
    }

    std::thread::sleep(Duration::from_millis(duration_ms / 2));
    if kind.supports_color_toggle() {
        host.params.toggle_color();
    }
    std::thread::sleep(Duration::from_millis(duration_ms - duration_ms / 2));

    stop.store(true, Ordering::Release);
    if producer.join().is_err() {
        tracing::warn!("audio producer panicked");
    }
    let recorder = render
        .shutdown()
        .ok_or_else(|| VisualiserError::msg("render thread did not return its backend"))?;

    println!("{}", serde_json::to_string_pretty(recorder.summary())?);
    if let Some(alert) = host.alerts.try_take() {
        println!("alert: {alert}");
    }
    Ok(())
}

/// Feeds a slow sine sweep through the analyser at the audio block cadence,
/// with a pause in the middle to exercise the stopped-playback path.
fn spawn_synthetic_audio(
    config: &AppConfig,
    mut publisher: AudioPublisher,
    stop: Arc<AtomicBool>,
) -> reactive_visualiser_core::Result<std::thread::JoinHandle<()>> {
    let sample_rate = config.audio.sample_rate as f32;
    let mut analyzer = SpectrumAnalyzer::new(config.audio.fft_size)?;
    let block = analyzer.fft_size();
    let interval = Duration::from_secs_f32(block as f32 / sample_rate);
    let elapsed_ms = u32::try_from(interval.as_millis()).unwrap_or(u32::MAX);

    let handle = std::thread::Builder::new()
        .name("synthetic-audio".into())
        .spawn(move || {
            let mut samples = vec![0.0f32; block];
            let mut phase = 0.0f32;
            let mut callback = 0u32;
            while !stop.load(Ordering::Acquire) {
                callback += 1;
                let paused = callback % 40 >= 30;
                if paused {
                    publisher.publish_frame(None, elapsed_ms);
                } else {
                    let freq = 110.0 + 20.0 * (callback % 30) as f32;
                    for sample in samples.iter_mut() {
                        *sample = phase.sin() * 0.8;
                        phase = (phase + 2.0 * PI * freq / sample_rate) % (2.0 * PI);
                    }
                    match analyzer.analyze(&samples) {
                        Ok(bytes) => publisher.publish_frame(Some(&bytes), elapsed_ms),
                        Err(err) => tracing::debug!(error = %err, "analysis failed"),
                    }
                }
                std::thread::sleep(interval);
            }
            tracing::debug!(published = publisher.published(), "audio producer stopped");
        })?;
    Ok(handle)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive visualiser surface harness", long_about = None)]
struct Cli {
    /// Optional JSON application configuration.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Visualiser kind by number (0 spectrum, 1 liquid, 2 spin, 3 particle);
    /// overrides the configuration file.
    #[arg(short, long, global = true)]
    kind: Option<i32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Query the platform's graphics feature level.
    Probe,
    /// Pick a rendering configuration from a candidate list.
    Negotiate {
        /// JSON candidate list or headless platform description.
        #[arg(long)]
        configs: PathBuf,
    },
    /// Run the render thread against a headless platform.
    Run {
        /// JSON headless platform description.
        #[arg(long)]
        configs: PathBuf,
        /// How long to render before shutting down.
        #[arg(long, default_value_t = 1000)]
        duration_ms: u64,
        /// Image to hand to the asset pipeline once rendering starts.
        #[arg(long)]
        image: Option<PathBuf>,
    },
}
