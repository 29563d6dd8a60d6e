//! Runtime configuration.
//!
//! All fields have defaults so the daemon runs without a config file; a
//! JSON file can override any subset. Paths and tuning constants that were
//! compile-time in earlier revisions (device path, image directories,
//! holdoff duration) live here instead.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::command::FrontendAffinity;
use crate::render::Placement;

/// Default config file location when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/marqueed.json";

/// Placement policy selection, serialized form of [`Placement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementMode {
    /// Full-bleed aspect fit, bottom aligned.
    AspectFitBottom,
    /// Non-uniform fill of the bottom half.
    BottomHalf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DRM device node to open.
    pub device_path: PathBuf,
    /// Control FIFO path. Created with mode 0666 so any user can write.
    pub fifo_path: PathBuf,
    /// Directory of per-title marquee images (`<key>.png`).
    pub image_dir: PathBuf,
    /// Directory of the per-affinity default images.
    pub default_image_dir: PathBuf,
    /// Directory of per-title ini metadata used by the exclusion policy.
    pub ini_dir: PathBuf,
    /// Preferred output mode; falls back to the first advertised mode.
    pub preferred_width: u32,
    pub preferred_height: u32,
    /// Default content key per affinity.
    pub default_standalone: String,
    pub default_peer: String,
    pub default_unset: String,
    /// Holdoff window granted to the peer after a contended update.
    /// Empirically tuned, not load-bearing.
    pub holdoff_secs: u64,
    /// Control-channel poll interval while a peer is expected.
    pub poll_interval_ms: u64,
    /// How images are placed on the surface.
    pub placement: PlacementMode,
    /// Height cap for aspect-fit placement.
    pub max_draw_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_path: PathBuf::from("/dev/dri/card1"),
            fifo_path: PathBuf::from("/tmp/marqueed_cmd"),
            image_dir: PathBuf::from("/var/lib/marqueed/marquees"),
            default_image_dir: PathBuf::from("/var/lib/marqueed/defaults"),
            ini_dir: PathBuf::from("/opt/retropie/emulators/mame/ini"),
            preferred_width: 1920,
            preferred_height: 1080,
            default_standalone: "MAMELogoR".to_string(),
            default_peer: "RetroArch_logo".to_string(),
            default_unset: "RetroPieMarquee".to_string(),
            holdoff_secs: 10,
            poll_interval_ms: 250,
            placement: PlacementMode::AspectFitBottom,
            max_draw_height: 1080,
        }
    }
}

impl Config {
    /// Load configuration. An explicitly given path must exist; the default
    /// path is optional and silently falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid config file {}", path.display())),
            Err(_) if !required => Ok(Config::default()),
            Err(e) => {
                Err(anyhow::Error::from(e).context(format!("cannot read {}", path.display())))
            }
        }
    }

    pub fn placement(&self) -> Placement {
        match self.placement {
            PlacementMode::AspectFitBottom => Placement::AspectFitBottom {
                cap_h: self.max_draw_height,
            },
            PlacementMode::BottomHalf => Placement::BottomHalf,
        }
    }

    /// The default content key for an affinity.
    pub fn default_key(&self, affinity: FrontendAffinity) -> &str {
        match affinity {
            FrontendAffinity::Standalone => &self.default_standalone,
            FrontendAffinity::PeerControlled => &self.default_peer,
            FrontendAffinity::Unset => &self.default_unset,
        }
    }

    /// Image path for a content-selector key.
    pub fn marquee_path(&self, key: &str) -> PathBuf {
        self.image_dir.join(format!("{key}.png"))
    }

    /// Image path for an affinity's default content.
    pub fn default_marquee_path(&self, affinity: FrontendAffinity) -> PathBuf {
        self.default_image_dir
            .join(format!("{}.png", self.default_key(affinity)))
    }

    pub fn holdoff(&self) -> Duration {
        Duration::from_secs(self.holdoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn preferred_mode(&self) -> Option<(u32, u32)> {
        if self.preferred_width == 0 || self.preferred_height == 0 {
            None
        } else {
            Some((self.preferred_width, self.preferred_height))
        }
    }
}
