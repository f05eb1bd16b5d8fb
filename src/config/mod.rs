//! Configuration types for particle-tracking review.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::processors::{FilterParseError, FilterSet, LinkScoringParams};

/// Errors raised while reading or writing configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Feature filtering and errant-selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringConfig {
    /// Filter expressions, all of which must hold (e.g. `"mass > 200"`)
    #[serde(default)]
    pub filters: Vec<String>,

    /// How many near-threshold records to report
    #[serde(default = "default_max_errant_results")]
    pub max_errant_results: usize,

    /// Features examined for near-threshold records
    #[serde(default = "default_errant_features")]
    pub errant_features: Vec<String>,
}

fn default_max_errant_results() -> usize {
    10
}

fn default_errant_features() -> Vec<String> {
    vec!["mass".to_string(), "size".to_string()]
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            max_errant_results: default_max_errant_results(),
            errant_features: default_errant_features(),
        }
    }
}

impl FilteringConfig {
    /// Parses the configured expressions into a filter set.
    pub fn filter_set(&self) -> Result<FilterSet, FilterParseError> {
        FilterSet::parse_all(&self.filters)
    }
}

/// Linker parameters the trajectories were produced with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Maximum displacement between frames, in pixels
    #[serde(default = "default_search_range")]
    pub search_range: f64,

    /// Frames a particle may vanish for and still be linked
    #[serde(default = "default_memory")]
    pub memory: i64,

    /// Links deviating more than `search_range * (m - 1)` are reported
    #[serde(default = "default_min_deviation_multiplier")]
    pub min_deviation_multiplier: f64,

    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_max_memory_links")]
    pub max_memory_links: usize,
}

fn default_search_range() -> f64 {
    10.0
}

fn default_memory() -> i64 {
    10
}

fn default_min_deviation_multiplier() -> f64 {
    1.5
}

fn default_max_results() -> usize {
    10
}

fn default_max_memory_links() -> usize {
    5
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            search_range: default_search_range(),
            memory: default_memory(),
            min_deviation_multiplier: default_min_deviation_multiplier(),
            max_results: default_max_results(),
            max_memory_links: default_max_memory_links(),
        }
    }
}

impl LinkingConfig {
    pub fn scoring_params(&self) -> LinkScoringParams {
        LinkScoringParams {
            search_range: self.search_range,
            memory: self.memory,
            min_deviation_multiplier: self.min_deviation_multiplier,
            max_results: self.max_results,
        }
    }
}

/// Trajectory post-processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryConfig {
    /// Trajectories shorter than this are dropped as stubs
    #[serde(default)]
    pub min_trajectory_length: usize,

    #[serde(default = "default_subtract_drift")]
    pub subtract_drift: bool,
}

fn default_subtract_drift() -> bool {
    true
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            min_trajectory_length: 0,
            subtract_drift: default_subtract_drift(),
        }
    }
}

/// Plot output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default = "default_plot_width")]
    pub width: u32,

    #[serde(default = "default_plot_height")]
    pub height: u32,

    /// Marker radius in pixels
    #[serde(default = "default_point_size")]
    pub point_size: u32,
}

fn default_plot_width() -> u32 {
    1200
}

fn default_plot_height() -> u32 {
    900
}

fn default_point_size() -> u32 {
    3
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: default_plot_width(),
            height: default_plot_height(),
            point_size: default_point_size(),
        }
    }
}

/// Top-level configuration combining all sections.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub filtering: FilteringConfig,

    #[serde(default)]
    pub linking: LinkingConfig,

    #[serde(default)]
    pub trajectories: TrajectoryConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl ReviewConfig {
    /// Load configuration from a YAML file. Missing keys take their defaults.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
