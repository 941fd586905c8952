use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::{RenderBackend, RenderLoop};
use crate::surface::GraphicsPlatform;
use crate::Result;

/// How long an idle render thread parks between checks for work.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Dedicated thread that owns a [`RenderLoop`] for its whole life.
///
/// The loop is built on the thread itself, so the platform and every context
/// it creates never leave it. While a frame can be drawn the thread ticks
/// back to back and relies on the platform's `swap_buffers` for pacing.
#[derive(Debug)]
pub struct RenderThread<B: RenderBackend + 'static> {
    stop: Arc<AtomicBool>,
    recreate: Arc<AtomicBool>,
    handle: Option<JoinHandle<B>>,
}

impl<B: RenderBackend + 'static> RenderThread<B> {
    pub fn spawn<P, F>(build: F) -> Result<Self>
    where
        P: GraphicsPlatform + 'static,
        F: FnOnce() -> RenderLoop<P, B> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let recreate = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("visualiser-render".into())
            .spawn({
                let stop = stop.clone();
                let recreate = recreate.clone();
                move || run(build(), &stop, &recreate)
            })?;

        Ok(Self {
            stop,
            recreate,
            handle: Some(handle),
        })
    }

    /// Asks the render thread to drop its surface and negotiate a new one at
    /// its next iteration. Returns immediately.
    pub fn recreate_surface(&self) {
        self.recreate.store(true, Ordering::Release);
        self.wake();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops ticking, tears the loop down on its own thread and returns the
    /// backend. Later calls return `None`.
    pub fn shutdown(&mut self) -> Option<B> {
        self.stop.store(true, Ordering::Release);
        let handle = self.handle.take()?;
        handle.thread().unpark();
        match handle.join() {
            Ok(backend) => Some(backend),
            Err(_) => {
                error!("render thread panicked");
                None
            }
        }
    }

    fn wake(&self) {
        if let Some(handle) = self.handle.as_ref() {
            handle.thread().unpark();
        }
    }
}

impl<B: RenderBackend + 'static> Drop for RenderThread<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<P, B>(mut render: RenderLoop<P, B>, stop: &AtomicBool, recreate: &AtomicBool) -> B
where
    P: GraphicsPlatform,
    B: RenderBackend,
{
    info!("render thread started");
    render.surface_created();

    while !stop.load(Ordering::Acquire) {
        if recreate.swap(false, Ordering::AcqRel) {
            debug!("recreating render surface");
            render.surface_lost();
            render.surface_created();
        }

        render.poll_surface_size();
        if !render.tick(Instant::now()) {
            thread::park_timeout(IDLE_PARK);
        }
    }

    info!("render thread stopping");
    render.into_backend()
}
