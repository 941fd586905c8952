use std::fmt;
use std::sync::Arc;

use crate::mailbox::Slot;
use crate::scene::DESIRED_POINT_COUNT;

/// Total snapshot buffer length in bytes.
pub const SNAPSHOT_LEN: usize = 2048;
/// Leading bytes of the buffer that carry magnitudes.
pub const MAGNITUDE_LEN: usize = DESIRED_POINT_COUNT;

/// One captured set of magnitude samples plus timing and playback state.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioSnapshot {
    bytes: Box<[u8; SNAPSHOT_LEN]>,
    /// Milliseconds since the producer's previous callback.
    pub elapsed_ms: u32,
    /// Producer-assigned counter, strictly increasing per publisher.
    pub sequence: u64,
    pub playing: bool,
}

impl AudioSnapshot {
    /// All-zero magnitudes with playback stopped.
    pub fn silence() -> Self {
        Self {
            bytes: Box::new([0; SNAPSHOT_LEN]),
            elapsed_ms: 0,
            sequence: 0,
            playing: false,
        }
    }

    /// Builds a playing snapshot from up to [`MAGNITUDE_LEN`] bytes.
    pub fn from_magnitudes(magnitudes: &[u8], elapsed_ms: u32) -> Self {
        let mut snapshot = Self::silence();
        let len = magnitudes.len().min(MAGNITUDE_LEN);
        snapshot.bytes[..len].copy_from_slice(&magnitudes[..len]);
        snapshot.elapsed_ms = elapsed_ms;
        snapshot.playing = true;
        snapshot
    }

    pub fn magnitudes(&self) -> &[u8] {
        &self.bytes[..MAGNITUDE_LEN]
    }

    pub fn bytes(&self) -> &[u8; SNAPSHOT_LEN] {
        &self.bytes
    }

    pub fn is_silent(&self) -> bool {
        self.magnitudes().iter().all(|b| *b == 0)
    }

    fn clear_magnitudes(&mut self) {
        self.bytes[..MAGNITUDE_LEN].fill(0);
    }
}

impl Default for AudioSnapshot {
    fn default() -> Self {
        Self::silence()
    }
}

impl fmt::Debug for AudioSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let peak = self.magnitudes().iter().copied().max().unwrap_or(0);
        f.debug_struct("AudioSnapshot")
            .field("sequence", &self.sequence)
            .field("elapsed_ms", &self.elapsed_ms)
            .field("playing", &self.playing)
            .field("peak", &peak)
            .finish()
    }
}

/// Creates the two ends of the audio handoff. Neither end is `Clone`, which
/// keeps exactly one producer and one consumer.
pub fn audio_bridge() -> (AudioPublisher, AudioReceiver) {
    let slot = Arc::new(Slot::new());
    (
        AudioPublisher {
            slot: slot.clone(),
            sequence: 0,
        },
        AudioReceiver {
            slot,
            current: AudioSnapshot::silence(),
        },
    )
}

/// Producer end, owned by the audio-analysis thread.
#[derive(Debug)]
pub struct AudioPublisher {
    slot: Arc<Slot<AudioSnapshot>>,
    sequence: u64,
}

impl AudioPublisher {
    /// Publishes `snapshot`, superseding any unread one. Never blocks.
    ///
    /// A snapshot marked as not playing always goes out with zeroed
    /// magnitudes so the render side cannot freeze on stale audio.
    pub fn publish(&mut self, mut snapshot: AudioSnapshot) {
        if !snapshot.playing {
            snapshot.clear_magnitudes();
        }
        self.sequence += 1;
        snapshot.sequence = self.sequence;
        self.slot.put(snapshot);
    }

    /// Per-callback entry point: `Some` magnitudes while playing, `None` when
    /// the player is stopped.
    pub fn publish_frame(&mut self, magnitudes: Option<&[u8]>, elapsed_ms: u32) {
        let snapshot = match magnitudes {
            Some(magnitudes) => AudioSnapshot::from_magnitudes(magnitudes, elapsed_ms),
            None => AudioSnapshot {
                elapsed_ms,
                ..AudioSnapshot::silence()
            },
        };
        self.publish(snapshot);
    }

    pub fn published(&self) -> u64 {
        self.sequence
    }
}

/// Consumer end, owned by the render thread.
#[derive(Debug)]
pub struct AudioReceiver {
    slot: Arc<Slot<AudioSnapshot>>,
    current: AudioSnapshot,
}

impl AudioReceiver {
    /// Returns the latest snapshot. Without a new publish since the previous
    /// call the previous snapshot is returned again.
    pub fn consume(&mut self) -> &AudioSnapshot {
        if let Some(fresh) = self.slot.take() {
            self.current = fresh;
        }
        if !self.current.playing && !self.current.is_silent() {
            self.current.clear_magnitudes();
        }
        &self.current
    }
}
