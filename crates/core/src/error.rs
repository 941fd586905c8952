use crate::signal::AlertKind;

/// Result alias that carries the custom [`VisualiserError`] type.
pub type Result<T> = std::result::Result<T, VisualiserError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    /// The graphics driver reports a feature level below the required minimum.
    #[error("graphics feature level {level:#010x} is below the required minimum")]
    CapabilityUnsupported { level: u32 },
    /// None of the platform-offered configurations could be activated.
    #[error("no activatable rendering configuration found")]
    ConfigNegotiationFailed,
    /// The render backend returned a nonzero code while setting up.
    #[error("render backend initialisation failed with code {0}")]
    BackendInitFailed(i32),
    /// An image asset could not be decoded or transformed.
    #[error("asset decode failed: {0}")]
    AssetDecodeFailed(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Free-form error for conditions that do not warrant their own variant.
    #[error("{0}")]
    Message(String),
}

impl VisualiserError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns the user-visible classification for terminal errors.
    ///
    /// Asset failures and plumbing errors are local and never reach the user,
    /// so they map to `None`.
    pub fn alert_kind(&self) -> Option<AlertKind> {
        match self {
            Self::CapabilityUnsupported { .. } | Self::ConfigNegotiationFailed => {
                Some(AlertKind::Unsupported)
            }
            Self::BackendInitFailed(code) => Some(AlertKind::Internal(*code)),
            _ => None,
        }
    }

    /// Whether the error permanently disables rendering for a surface.
    pub fn is_terminal(&self) -> bool {
        self.alert_kind().is_some()
    }
}

impl From<&str> for VisualiserError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualiserError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
