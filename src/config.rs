use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{bail, Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};

use crate::correspondence::ReconcileOptions;

/// Tuning of the whole tracker. Parsed from the command line, or from a
/// JSON file whose missing keys take the same defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[derive(clap::Parser)]
#[serde(default)]
pub struct Config {
    /// Print per-frame counts. Never changes tracking results.
    #[clap(long)]
    pub verbose: bool,

    /// Block size of the corner response
    #[clap(long, default_value = "5")]
    pub window_size: usize,

    /// Corners detected per channel
    #[clap(long, default_value = "16")]
    pub max_corners: usize,

    /// Minimum corner spacing on the motion channel, in pixels
    #[clap(long, default_value = "5")]
    pub min_distance: f64,

    /// The structural channel uses `min_distance` times this factor
    #[clap(long, default_value = "3")]
    pub structural_separation_factor: f64,

    #[clap(long, default_value = "0.2")]
    pub structural_quality: f64,

    #[clap(long, default_value = "0.05")]
    pub motion_quality: f64,

    /// Longest mesh edge kept when splitting, as a fraction of frame height
    #[clap(long, default_value = "1.0")]
    pub edge_length_ratio: f64,

    /// Largest plausible centroid jump per frame, as a fraction of frame height
    #[clap(long, default_value = "0.833")]
    pub displacement_ratio: f64,

    /// Forget tracks absent for more than this many frames
    #[clap(long)]
    pub eviction_threshold: Option<usize>,

    /// Past centroids kept per track
    #[clap(long, default_value = "32")]
    pub history_length: usize,

    /// Detect structural corners on the hue back projection instead of the hue channel
    #[clap(long)]
    pub back_projection: bool,

    /// Where the rerun recording is written
    #[clap(long, default_value = "./logs/mesh_tracker.rrd")]
    pub recording: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            verbose: false,
            window_size: 5,
            max_corners: 16,
            min_distance: 5.,
            structural_separation_factor: 3.,
            structural_quality: 0.2,
            motion_quality: 0.05,
            edge_length_ratio: 1.,
            displacement_ratio: 0.833,
            eviction_threshold: None,
            history_length: 32,
            back_projection: false,
            recording: "./logs/mesh_tracker.rrd".to_string(),
        }
    }
}

impl Config {
    pub fn from_json_file(path: &Path) -> Result<Config> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let config: Config = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("JSON deserialization failed for {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            bail!("window size must be positive");
        }
        for (name, value) in [
            ("min distance", self.min_distance),
            ("structural separation factor", self.structural_separation_factor),
            ("structural quality", self.structural_quality),
            ("motion quality", self.motion_quality),
        ] {
            if !(value >= 0.) {
                bail!("{name} must be non-negative, got {value}");
            }
        }
        for (name, value) in [
            ("edge length ratio", self.edge_length_ratio),
            ("displacement ratio", self.displacement_ratio),
        ] {
            if !(value > 0.) {
                bail!("{name} must be positive, got {value}");
            }
        }
        Ok(())
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            eviction_threshold: self.eviction_threshold,
            history_length: self.history_length,
            verbose: self.verbose,
        }
    }
}
