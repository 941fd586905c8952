use std::time::{Duration, Instant};

use reactive_visualiser_core::assets::{AssetHandle, FileSource};
use reactive_visualiser_core::audio::MAGNITUDE_LEN;
use reactive_visualiser_core::platform::{CandidateSpec, HeadlessPlatform, HeadlessSpec};
use reactive_visualiser_core::{
    connect, AlertKind, AppConfig, CapabilityProbe, FeatureLevelQuery, Recorder, RenderLoop,
    RenderThread, Result, SurfaceState, VisualiserKind,
};

fn probe() -> &'static CapabilityProbe {
    Box::leak(Box::new(CapabilityProbe::new()))
}

fn supported() -> Box<dyn FeatureLevelQuery> {
    Box::new(|| -> Result<u32> { Ok(0x0003_0000) })
}

fn headless(candidates: Vec<CandidateSpec>) -> HeadlessPlatform {
    HeadlessPlatform::from_spec(HeadlessSpec {
        candidates,
        width: 720,
        height: 1280,
        frame_interval_ms: 2,
    })
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn render_thread_consumes_audio_and_images_without_blocking() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cover.png");
    image::RgbImage::from_pixel(1600, 900, image::Rgb([0, 0, 255]))
        .save(&path)
        .unwrap();

    let mut config = AppConfig::default();
    config.visualiser.kind = VisualiserKind::Liquid;
    let (host, mut publisher, inputs) = connect(&config, Box::new(FileSource));

    let mut render = RenderThread::spawn(move || {
        RenderLoop::with_probe(
            &config,
            headless(vec![CandidateSpec::default()]),
            Recorder::new(),
            probe(),
            supported(),
            inputs,
        )
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        host.surface_state() == SurfaceState::Ready
    }));

    let producer = std::thread::spawn(move || {
        for i in 0..200u32 {
            let level = (i % 200) as u8 + 1;
            publisher.publish_frame(Some(&[level; MAGNITUDE_LEN]), 1);
        }
        // playback stops: the render side must fall silent
        publisher.publish_frame(None, 1);
        publisher
    });
    let publisher = producer.join().unwrap();

    // The tick that picks up the image also consumes the final snapshot and
    // runs to completion before shutdown is honoured.
    host.params.set_speed(1);
    host.assets.request_load(AssetHandle::new(path.display().to_string()));
    assert!(wait_until(Duration::from_secs(5), || !host.assets.is_pending()));

    let recorder = render.shutdown().expect("render thread should hand back its backend");
    assert!(render.shutdown().is_none());
    assert!(!render.is_running());

    let summary = recorder.into_summary();
    assert_eq!(summary.kind, Some(VisualiserKind::Liquid));
    assert_eq!(summary.viewport, Some((720, 1280)));
    assert!(summary.frames_drawn > 0);
    assert_eq!(summary.last_sequence, publisher.published());
    assert_eq!(summary.last_peak, 0);
    assert_eq!(summary.last_speed, 1);
    assert_eq!(summary.textures_uploaded, 1);
    // portrait viewport: 1600x900 -> factor 2 -> 800x450, turned upright
    assert_eq!(summary.last_texture, Some((450, 800)));
    assert_eq!(summary.teardowns, 1);
    assert_eq!(host.surface_state(), SurfaceState::Destroyed);
    assert!(host.alerts.try_take().is_none());
}

#[test]
fn unsupported_surface_alerts_once_and_shuts_down_cleanly() {
    let config = AppConfig::default();
    let (host, _publisher, inputs) = connect(&config, Box::new(FileSource));
    let mut broken = CandidateSpec::default();
    broken.fail_context = true;

    let mut render = RenderThread::spawn(move || {
        RenderLoop::with_probe(
            &config,
            headless(vec![broken]),
            Recorder::new(),
            probe(),
            supported(),
            inputs,
        )
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || host.alerts.has_alerted()));
    render.recreate_surface();
    std::thread::sleep(Duration::from_millis(20));

    let recorder = render.shutdown().unwrap();
    assert_eq!(recorder.summary().frames_drawn, 0);
    assert_eq!(host.alerts.try_take(), Some(AlertKind::Unsupported));
    assert_eq!(host.alerts.try_take(), None);
    assert_eq!(host.surface_state(), SurfaceState::Unsupported);
}

#[test]
fn recreated_surface_renegotiates() {
    let config = AppConfig::default();
    let (host, _publisher, inputs) = connect(&config, Box::new(FileSource));

    let mut render = RenderThread::spawn(move || {
        RenderLoop::with_probe(
            &config,
            headless(vec![CandidateSpec::default()]),
            Recorder::new(),
            probe(),
            supported(),
            inputs,
        )
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        host.surface_state() == SurfaceState::Ready
    }));
    render.recreate_surface();
    std::thread::sleep(Duration::from_millis(100));

    let summary = render.shutdown().unwrap().into_summary();
    assert_eq!(summary.inits, 2);
    assert_eq!(summary.teardowns, 2);
    assert!(host.alerts.try_take().is_none());
}

#[test]
fn dropping_the_handle_stops_the_thread() {
    let config = AppConfig::default();
    let (host, _publisher, inputs) = connect(&config, Box::new(FileSource));
    let render = RenderThread::spawn(move || {
        RenderLoop::with_probe(
            &config,
            headless(vec![CandidateSpec::default()]),
            Recorder::new(),
            probe(),
            supported(),
            inputs,
        )
    })
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        host.surface_state() == SurfaceState::Ready
    }));
    drop(render);
    assert_eq!(host.surface_state(), SurfaceState::Destroyed);
}
