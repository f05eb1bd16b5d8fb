//! Core data types and I/O operations.

pub mod loaders;
pub mod table;
pub mod writers;

pub use loaders::{load_feature_csv, LoaderError};
pub use table::{FeatureTable, Record, TableError};
pub use writers::{
    write_errant_csv, write_link_scores_csv, write_memory_links_csv, write_table_csv, WriteError,
};
