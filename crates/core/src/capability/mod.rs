//! Process-wide detection of the graphics feature level.
//!
//! The level is read once through a [`FeatureLevelQuery`] and cached for the
//! life of the process. A query that fails is treated as "assume supported":
//! the surface negotiator gets the final say by actually creating a context.

use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{debug, info, warn};

use crate::{Result, VisualiserError};

const UNKNOWN: i64 = -1;

/// Source of the platform's reported feature level.
pub trait FeatureLevelQuery: Send + Sync {
    /// Returns the level encoded as `major << 16 | minor`.
    fn query(&self) -> Result<u32>;
}

impl<F> FeatureLevelQuery for F
where
    F: Fn() -> Result<u32> + Send + Sync,
{
    fn query(&self) -> Result<u32> {
        self()
    }
}

/// Spawns a property-reading helper and parses its first output line.
#[derive(Debug, Clone)]
pub struct PropertyQuery {
    program: String,
    property: String,
}

impl PropertyQuery {
    pub fn new(program: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            property: property.into(),
        }
    }

    /// `getprop ro.opengles.version`
    pub fn opengles() -> Self {
        Self::new("getprop", "ro.opengles.version")
    }
}

impl FeatureLevelQuery for PropertyQuery {
    fn query(&self) -> Result<u32> {
        let output = Command::new(&self.program)
            .arg(&self.property)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(VisualiserError::msg(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }
        parse_level(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses the first line of a property dump as a decimal level.
pub fn parse_level(text: &str) -> Result<u32> {
    let line = text.lines().next().unwrap_or("").trim();
    line.parse::<u32>()
        .map_err(|err| VisualiserError::msg(format!("malformed feature level `{line}`: {err}")))
}

/// Caches the feature level reported by the platform.
#[derive(Debug)]
pub struct CapabilityProbe {
    level: AtomicI64,
}

static GLOBAL: CapabilityProbe = CapabilityProbe::new();

impl CapabilityProbe {
    pub const fn new() -> Self {
        Self {
            level: AtomicI64::new(UNKNOWN),
        }
    }

    /// The probe shared by every surface in the process.
    pub fn global() -> &'static CapabilityProbe {
        &GLOBAL
    }

    /// The cached level, or `None` until a query has succeeded.
    pub fn cached_level(&self) -> Option<u32> {
        match self.level.load(Ordering::Acquire) {
            UNKNOWN => None,
            level => u32::try_from(level).ok(),
        }
    }

    /// Verdict from the cache alone, without running a query.
    ///
    /// `None` means the level is still unknown.
    pub fn cached_verdict(&self, min_level: u32) -> Option<Result<u32>> {
        self.cached_level().map(|level| verdict(level, min_level))
    }

    /// Runs the query if the level is not yet cached and checks it against
    /// `min_level`.
    ///
    /// Returns `Ok(Some(level))` when the level is known and sufficient,
    /// `Ok(None)` when it could not be determined (assume supported) and
    /// `CapabilityUnsupported` when it is known to be too low.
    pub fn check(&self, query: &dyn FeatureLevelQuery, min_level: u32) -> Result<Option<u32>> {
        if let Some(verdict) = self.cached_verdict(min_level) {
            return verdict.map(Some);
        }

        match query.query() {
            Ok(level) => {
                self.level.store(i64::from(level), Ordering::Release);
                info!(level = %format!("{level:#010x}"), "graphics feature level detected");
                verdict(level, min_level).map(Some)
            }
            Err(err) => {
                debug!(error = %err, "feature level query failed, assuming supported");
                Ok(None)
            }
        }
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn verdict(level: u32, min_level: u32) -> Result<u32> {
    if level >= min_level {
        Ok(level)
    } else {
        warn!(
            level = %format!("{level:#010x}"),
            min_level = %format!("{min_level:#010x}"),
            "graphics feature level below minimum"
        );
        Err(VisualiserError::CapabilityUnsupported { level })
    }
}
