//! Runtime configuration
//!
//! Read from an optional TOML file; any key left out keeps its default.
//!
//! ```toml
//! device = "/dev/dri/card0"
//! step = 50
//! base_color = 0xFF202020
//! overlay_color = 0xFF00FF00
//! overlay_origin = [100, 100]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dumb_buffer::{COLOR_BLUE, COLOR_RED};
use crate::{Error, Result};

pub const DEFAULT_DEVICE: &str = "/dev/dri/card1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// DRM card node
    pub device: PathBuf,
    /// Pixels moved per key press
    pub step: i32,
    pub base_color: u32,
    pub overlay_color: u32,
    /// Initial overlay position on the CRTC
    pub overlay_origin: (i32, i32),
    /// Colour of the `single` scan-out
    pub single_color: u32,
    /// Seconds the `single` scan-out stays up
    pub hold_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            step: 100,
            base_color: COLOR_RED,
            overlay_color: COLOR_BLUE,
            overlay_origin: (100, 100),
            single_color: COLOR_BLUE,
            hold_secs: 5,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Render as TOML in the same format `from_toml` reads
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load `path`, or the defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        debug!(path = %path.display(), ?config, "Loaded configuration");
        Ok(config)
    }
}
