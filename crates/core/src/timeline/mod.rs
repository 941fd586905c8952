use std::time::{Duration, Instant};

/// Measures the time between consecutive render ticks.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    last_tick: Option<Instant>,
    frames: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the previous tick, so the next delta is zero.
    pub fn reset(&mut self) {
        self.last_tick = None;
    }

    /// Records a tick at `now` and returns milliseconds since the previous
    /// one. The first tick after creation or a reset reports zero.
    pub fn tick(&mut self, now: Instant) -> u32 {
        let delta = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);
        self.frames += 1;
        u32::try_from(delta.as_millis()).unwrap_or(u32::MAX)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}
