//! Columnar storage for particle and trajectory tables.
//!
//! A [`FeatureTable`] holds one `Vec` per column, the same layout the detector
//! and linker emit. The fixed columns are `frame`, `x`, `y` and, for trajectory
//! tables, `particle`; every other numeric measurement (mass, size,
//! eccentricity, signal, raw_mass, ...) lives in the `features` map and is
//! addressed by name.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// Column names that are stored outside the feature map.
pub const RESERVED_COLUMNS: [&str; 4] = ["frame", "x", "y", "particle"];

/// Errors raised when building or slicing a table.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TableError {
    #[error("column '{column}' has {found} rows, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("mask has {mask_len} entries but the table has {table_len} rows")]
    MaskLength { mask_len: usize, table_len: usize },

    #[error("row is missing column '{0}'")]
    MissingColumn(String),

    #[error("row has column '{0}' which the table does not")]
    UnexpectedColumn(String),

    #[error("'{0}' is a reserved column and cannot be stored as a feature")]
    ReservedName(String),

    #[error("column '{0}' supplied more than once")]
    DuplicateColumn(String),
}

/// Result type for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Borrowed view of one numeric column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnRef<'a> {
    Int(&'a [i64]),
    Float(&'a [f64]),
}

impl ColumnRef<'_> {
    /// Value at `row` widened to `f64`.
    #[inline]
    pub fn get(&self, row: usize) -> f64 {
        match self {
            ColumnRef::Int(values) => values[row] as f64,
            ColumnRef::Float(values) => values[row],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            ColumnRef::Int(values) => values.len(),
            ColumnRef::Float(values) => values.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Particle table (or trajectory table when `particle` is present).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    /// Frame number of each detection.
    pub frame: Vec<i64>,
    /// X position in pixels.
    pub x: Vec<f64>,
    /// Y position in pixels.
    pub y: Vec<f64>,
    /// Trajectory id, present only once the table has been linked.
    pub particle: Option<Vec<i64>>,
    /// Every other numeric column, keyed by name.
    pub features: BTreeMap<String, Vec<f64>>,
}

impl FeatureTable {
    /// Creates an empty particle table with no feature columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table from whole columns, checking that they line up.
    pub fn from_columns(
        frame: Vec<i64>,
        x: Vec<f64>,
        y: Vec<f64>,
        particle: Option<Vec<i64>>,
        features: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self> {
        let table = Self {
            frame,
            x,
            y,
            particle,
            features,
        };
        table.validate()?;
        Ok(table)
    }

    /// Checks that every column has as many rows as `frame` and that no
    /// feature shadows a reserved column.
    pub fn validate(&self) -> Result<()> {
        let expected = self.frame.len();
        let check = |column: &str, found: usize| {
            if found == expected {
                Ok(())
            } else {
                Err(TableError::ColumnLength {
                    column: column.to_string(),
                    expected,
                    found,
                })
            }
        };

        check("x", self.x.len())?;
        check("y", self.y.len())?;
        if let Some(particle) = &self.particle {
            check("particle", particle.len())?;
        }
        for (name, values) in &self.features {
            if RESERVED_COLUMNS.contains(&name.as_str()) {
                return Err(TableError::ReservedName(name.clone()));
            }
            check(name, values.len())?;
        }
        Ok(())
    }

    /// Appends one row.
    ///
    /// The first row pushed into an empty table fixes its schema (feature
    /// names and whether a `particle` column exists); later rows must match it.
    pub fn push_row(
        &mut self,
        frame: i64,
        x: f64,
        y: f64,
        particle: Option<i64>,
        features: &[(&str, f64)],
    ) -> Result<()> {
        let mut supplied = BTreeSet::new();
        for (name, _) in features {
            if RESERVED_COLUMNS.contains(name) {
                return Err(TableError::ReservedName(name.to_string()));
            }
            if !supplied.insert(*name) {
                return Err(TableError::DuplicateColumn(name.to_string()));
            }
        }

        if self.is_empty() {
            self.particle = particle.map(|_| Vec::new());
            self.features = features
                .iter()
                .map(|(name, _)| (name.to_string(), Vec::new()))
                .collect();
        }

        match (&self.particle, particle) {
            (Some(_), None) => return Err(TableError::MissingColumn("particle".to_string())),
            (None, Some(_)) => return Err(TableError::UnexpectedColumn("particle".to_string())),
            _ => {}
        }

        if let Some(extra) = supplied.iter().find(|name| !self.features.contains_key(**name)) {
            return Err(TableError::UnexpectedColumn(extra.to_string()));
        }
        if let Some(missing) = self.features.keys().find(|name| !supplied.contains(name.as_str())) {
            return Err(TableError::MissingColumn(missing.clone()));
        }

        self.frame.push(frame);
        self.x.push(x);
        self.y.push(y);
        if let (Some(column), Some(id)) = (self.particle.as_mut(), particle) {
            column.push(id);
        }
        for (name, value) in features {
            if let Some(column) = self.features.get_mut(*name) {
                column.push(*value);
            }
        }
        Ok(())
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.frame.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    /// True when the table carries a `particle` column.
    #[inline]
    pub fn is_trajectory(&self) -> bool {
        self.particle.is_some()
    }

    /// Row view at `index`, or `None` past the end.
    pub fn record(&self, index: usize) -> Option<Record<'_>> {
        (index < self.len()).then_some(Record { table: self, index })
    }

    /// Iterates rows in table order.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> + '_ {
        (0..self.len()).map(move |index| Record { table: self, index })
    }

    /// Looks up any numeric column by name, fixed columns included.
    pub fn column(&self, name: &str) -> Option<ColumnRef<'_>> {
        match name {
            "frame" => Some(ColumnRef::Int(&self.frame)),
            "x" => Some(ColumnRef::Float(&self.x)),
            "y" => Some(ColumnRef::Float(&self.y)),
            "particle" => self.particle.as_deref().map(ColumnRef::Int),
            _ => self.features.get(name).map(|v| ColumnRef::Float(v)),
        }
    }

    #[inline]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// All column names: fixed columns first, then features alphabetically.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = vec!["frame", "x", "y"];
        if self.particle.is_some() {
            names.push("particle");
        }
        names.extend(self.features.keys().map(String::as_str));
        names
    }

    /// Names of the feature columns only.
    pub fn feature_names(&self) -> Vec<&str> {
        self.features.keys().map(String::as_str).collect()
    }

    /// Distinct frame numbers in ascending order.
    pub fn frames(&self) -> Vec<i64> {
        let unique: BTreeSet<i64> = self.frame.iter().copied().collect();
        unique.into_iter().collect()
    }

    /// New table holding the rows whose mask entry is `true`.
    pub fn select(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(TableError::MaskLength {
                mask_len: mask.len(),
                table_len: self.len(),
            });
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        Ok(self.take_rows(&rows))
    }

    /// Row indices grouped by trajectory id, each group sorted by frame.
    ///
    /// Rows sharing a frame keep their table order. Returns `None` for a
    /// table without a `particle` column.
    pub fn particle_groups(&self) -> Option<BTreeMap<i64, Vec<usize>>> {
        let particle = self.particle.as_ref()?;
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (row, &id) in particle.iter().enumerate() {
            groups.entry(id).or_default().push(row);
        }
        for rows in groups.values_mut() {
            rows.sort_by_key(|&row| self.frame[row]);
        }
        Some(groups)
    }

    /// Copies the given rows, in the given order, into a new table.
    pub(crate) fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            frame: rows.iter().map(|&r| self.frame[r]).collect(),
            x: rows.iter().map(|&r| self.x[r]).collect(),
            y: rows.iter().map(|&r| self.y[r]).collect(),
            particle: self
                .particle
                .as_ref()
                .map(|p| rows.iter().map(|&r| p[r]).collect()),
            features: self
                .features
                .iter()
                .map(|(name, values)| (name.clone(), rows.iter().map(|&r| values[r]).collect()))
                .collect(),
        }
    }
}

/// Borrowed view of one table row.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    table: &'a FeatureTable,
    index: usize,
}

impl<'a> Record<'a> {
    /// Original row index in the owning table.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn frame(&self) -> i64 {
        self.table.frame[self.index]
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.table.x[self.index]
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.table.y[self.index]
    }

    #[inline]
    pub fn particle(&self) -> Option<i64> {
        self.table.particle.as_ref().map(|p| p[self.index])
    }

    /// Value of any numeric column for this row.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.table.column(name).map(|column| column.get(self.index))
    }
}
