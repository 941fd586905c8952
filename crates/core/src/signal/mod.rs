//! One-shot error notification from the render side to the UI thread.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Classification shown to the user when rendering is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    /// Hardware or driver cannot run the visualiser.
    Unsupported,
    /// The render backend failed with the given code.
    Internal(i32),
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("graphics not supported"),
            Self::Internal(code) => write!(f, "graphics error: {code}"),
        }
    }
}

/// Creates a connected signal/receiver pair for one surface instance.
pub fn error_channel() -> (ErrorSignal, AlertReceiver) {
    // One slot is enough: at most one alert is ever sent per instance.
    let (tx, rx) = crossbeam_channel::bounded(1);
    let alerted = Arc::new(AtomicBool::new(false));
    (
        ErrorSignal {
            tx,
            alerted: alerted.clone(),
        },
        AlertReceiver { rx, alerted },
    )
}

/// Sending half, cloned into every component that can fail terminally.
///
/// The first `raise` wins; every later call is dropped, so the user is told
/// about a broken surface exactly once no matter how many threads notice it.
#[derive(Debug, Clone)]
pub struct ErrorSignal {
    tx: Sender<AlertKind>,
    alerted: Arc<AtomicBool>,
}

impl ErrorSignal {
    /// Raises the alert. Returns `true` if this call delivered it.
    pub fn raise(&self, kind: AlertKind) -> bool {
        if self.alerted.swap(true, Ordering::AcqRel) {
            debug!(%kind, "alert already raised, dropping");
            return false;
        }
        match self.tx.try_send(kind) {
            Ok(()) => {
                warn!(%kind, "rendering disabled");
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                debug!(%kind, "alert receiver unavailable");
                false
            }
        }
    }

    pub fn has_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }
}

/// UI-side half. Never blocks.
#[derive(Debug)]
pub struct AlertReceiver {
    rx: Receiver<AlertKind>,
    alerted: Arc<AtomicBool>,
}

impl AlertReceiver {
    /// Takes the pending alert, if one arrived since the last call.
    pub fn try_take(&self) -> Option<AlertKind> {
        self.rx.try_recv().ok()
    }

    /// Whether an alert has been raised for this instance, taken or not.
    pub fn has_alerted(&self) -> bool {
        self.alerted.load(Ordering::Acquire)
    }
}
