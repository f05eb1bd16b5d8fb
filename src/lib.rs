//! Review tools for particle-tracking results.
//!
//! This crate provides tools for:
//! - Loading particle and trajectory tables from CSV
//! - Filtering records with composable feature expressions
//! - Finding included records that barely passed a filter
//! - Estimating and subtracting ensemble drift
//! - Scoring trajectory links against the linker's parameters
//!
//! # Example
//!
//! ```no_run
//! use particle_review::core::loaders::load_feature_csv;
//! use particle_review::processors::{select_errant, FilterSet};
//!
//! let table = load_feature_csv("features.csv").unwrap();
//! let filters = FilterSet::parse_all(["mass > 200", "size < 3 OR ecc < 0.2"]).unwrap();
//! let (included, _excluded) = filters.apply(&table).unwrap();
//! let errant = select_errant(&table, &filters, &["mass", "size"], 10).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{FilteringConfig, LinkingConfig, PlotConfig, ReviewConfig, TrajectoryConfig};
pub use core::table::{FeatureTable, Record};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
