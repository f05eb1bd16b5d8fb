//! Ordered set of active filters, combined with AND.

use log::debug;

use super::filter::{FilterExpression, FilterParseError, SimpleFilter};
use super::Result;
use crate::core::table::FeatureTable;

/// Top-level filters a row must all satisfy to be included.
///
/// The order of entries never changes the result; it is kept so that editors
/// can list and remove filters in the order they were added.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    expressions: Vec<FilterExpression>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses each string as one top-level filter.
    pub fn parse_all<I, S>(filters: I) -> std::result::Result<Self, FilterParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        filters
            .into_iter()
            .map(|text| text.as_ref().parse::<FilterExpression>())
            .collect()
    }

    pub fn push(&mut self, expression: FilterExpression) {
        self.expressions.push(expression);
    }

    /// Removes the filter at `index`, if any.
    pub fn remove(&mut self, index: usize) -> Option<FilterExpression> {
        (index < self.expressions.len()).then(|| self.expressions.remove(index))
    }

    pub fn expressions(&self) -> &[FilterExpression] {
        &self.expressions
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterExpression> {
        self.expressions.iter()
    }

    pub fn len(&self) -> usize {
        self.expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expressions.is_empty()
    }

    /// `Simple` leaves across every filter in the set, nested ones included.
    pub fn simple_filters(&self) -> Vec<SimpleFilter<'_>> {
        self.expressions
            .iter()
            .flat_map(FilterExpression::simple_filters)
            .collect()
    }

    /// Inclusion mask: `true` where the row satisfies every filter.
    ///
    /// An empty set includes every row.
    pub fn included_mask(&self, table: &FeatureTable) -> Result<Vec<bool>> {
        let mut included = vec![true; table.len()];
        for expression in &self.expressions {
            let mask = expression.mask(table)?;
            for (keep, pass) in included.iter_mut().zip(mask) {
                *keep &= pass;
            }
        }
        Ok(included)
    }

    /// Returns `(included, excluded)` masks aligned with the table rows.
    pub fn apply(&self, table: &FeatureTable) -> Result<(Vec<bool>, Vec<bool>)> {
        let included = self.included_mask(table)?;
        let excluded = included.iter().map(|&keep| !keep).collect();

        debug!(
            "filter set ({} filters) kept {}/{} rows",
            self.len(),
            included.iter().filter(|&&keep| keep).count(),
            table.len()
        );

        Ok((included, excluded))
    }

    /// New table holding only the included rows.
    pub fn filter_table(&self, table: &FeatureTable) -> Result<FeatureTable> {
        let included = self.included_mask(table)?;
        Ok(table.select(&included)?)
    }
}

impl FromIterator<FilterExpression> for FilterSet {
    fn from_iter<T: IntoIterator<Item = FilterExpression>>(iter: T) -> Self {
        Self {
            expressions: iter.into_iter().collect(),
        }
    }
}

impl From<Vec<FilterExpression>> for FilterSet {
    fn from(expressions: Vec<FilterExpression>) -> Self {
        Self { expressions }
    }
}
