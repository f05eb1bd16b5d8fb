//! Boolean filter expressions over feature tables.
//!
//! A filter is either a single comparison against one column
//! (`mass < 500`) or two filters joined by `AND`, `OR` or `XOR`. Filters can
//! be authored before any data exists; whether the referenced column exists
//! is only checked when the filter is evaluated.
//!
//! # Example
//!
//! ```
//! use particle_review::processors::filter::FilterExpression;
//!
//! let filter: FilterExpression = "(mass < 500) XOR (size >= 2.5)".parse().unwrap();
//! assert_eq!(filter.to_string(), "(mass < 500) XOR (size >= 2.5)");
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use super::{ProcessingError, Result};
use crate::core::table::{FeatureTable, Record};

/// Comparison applied by a simple filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    /// Every operator, in the order a filter editor lists them.
    pub const ALL: [Operator; 6] = [
        Operator::Lt,
        Operator::Le,
        Operator::Gt,
        Operator::Ge,
        Operator::Eq,
        Operator::Ne,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// `value <op> threshold`.
    #[inline]
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Operator::Lt => value < threshold,
            Operator::Le => value <= threshold,
            Operator::Gt => value > threshold,
            Operator::Ge => value >= threshold,
            Operator::Eq => value == threshold,
            Operator::Ne => value != threshold,
        }
    }

    /// Signed distance from `value` to the threshold.
    ///
    /// Positive means the comparison holds with room to spare, zero is the
    /// boundary and negative means the value is on the excluded side.
    #[inline]
    pub fn signed_distance(self, value: f64, threshold: f64) -> f64 {
        match self {
            Operator::Lt | Operator::Le => threshold - value,
            Operator::Gt | Operator::Ge => value - threshold,
            Operator::Eq => -(value - threshold).abs(),
            Operator::Ne => (value - threshold).abs(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Boolean operator joining the two halves of a compound filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combine {
    And,
    Or,
    Xor,
}

impl Combine {
    #[inline]
    pub fn apply(self, left: bool, right: bool) -> bool {
        match self {
            Combine::And => left && right,
            Combine::Or => left || right,
            Combine::Xor => left != right,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Combine::And => "AND",
            Combine::Or => "OR",
            Combine::Xor => "XOR",
        }
    }

    /// Case-insensitive keyword lookup.
    pub fn from_keyword(word: &str) -> Option<Self> {
        [Combine::And, Combine::Or, Combine::Xor]
            .into_iter()
            .find(|c| c.keyword().eq_ignore_ascii_case(word))
    }
}

impl fmt::Display for Combine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A single or compound predicate over one table row.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Simple {
        feature: String,
        operator: Operator,
        threshold: f64,
    },
    Compound {
        left: Box<FilterExpression>,
        right: Box<FilterExpression>,
        combine: Combine,
    },
}

/// Borrowed view of one `Simple` leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleFilter<'a> {
    pub feature: &'a str,
    pub operator: Operator,
    pub threshold: f64,
}

impl FilterExpression {
    pub fn simple(feature: impl Into<String>, operator: Operator, threshold: f64) -> Self {
        FilterExpression::Simple {
            feature: feature.into(),
            operator,
            threshold,
        }
    }

    pub fn compound(left: FilterExpression, combine: Combine, right: FilterExpression) -> Self {
        FilterExpression::Compound {
            left: Box::new(left),
            right: Box::new(right),
            combine,
        }
    }

    pub fn and(self, other: FilterExpression) -> Self {
        Self::compound(self, Combine::And, other)
    }

    pub fn or(self, other: FilterExpression) -> Self {
        Self::compound(self, Combine::Or, other)
    }

    pub fn xor(self, other: FilterExpression) -> Self {
        Self::compound(self, Combine::Xor, other)
    }

    /// Evaluates the filter against one row.
    ///
    /// Both halves of a compound filter are always evaluated, so a missing
    /// column is reported no matter which side references it.
    pub fn evaluate(&self, record: &Record<'_>) -> Result<bool> {
        match self {
            FilterExpression::Simple {
                feature,
                operator,
                threshold,
            } => {
                let value = record
                    .get(feature)
                    .ok_or_else(|| ProcessingError::unknown_feature(feature))?;
                Ok(operator.apply(value, *threshold))
            }
            FilterExpression::Compound {
                left,
                right,
                combine,
            } => {
                let l = left.evaluate(record)?;
                let r = right.evaluate(record)?;
                Ok(combine.apply(l, r))
            }
        }
    }

    /// Evaluates the filter for every row of `table` at once.
    ///
    /// Agrees with [`evaluate`](Self::evaluate) row by row. An empty table
    /// yields an empty mask without looking at columns.
    pub fn mask(&self, table: &FeatureTable) -> Result<Vec<bool>> {
        if table.is_empty() {
            return Ok(Vec::new());
        }

        match self {
            FilterExpression::Simple {
                feature,
                operator,
                threshold,
            } => {
                let column = table
                    .column(feature)
                    .ok_or_else(|| ProcessingError::unknown_feature(feature))?;
                Ok((0..column.len())
                    .map(|row| operator.apply(column.get(row), *threshold))
                    .collect())
            }
            FilterExpression::Compound {
                left,
                right,
                combine,
            } => {
                let l = left.mask(table)?;
                let r = right.mask(table)?;
                Ok(l.into_iter()
                    .zip(r)
                    .map(|(a, b)| combine.apply(a, b))
                    .collect())
            }
        }
    }

    /// Every `Simple` leaf of the tree, left to right.
    pub fn simple_filters(&self) -> Vec<SimpleFilter<'_>> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<SimpleFilter<'a>>) {
        match self {
            FilterExpression::Simple {
                feature,
                operator,
                threshold,
            } => leaves.push(SimpleFilter {
                feature,
                operator: *operator,
                threshold: *threshold,
            }),
            FilterExpression::Compound { left, right, .. } => {
                left.collect_leaves(leaves);
                right.collect_leaves(leaves);
            }
        }
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::Simple {
                feature,
                operator,
                threshold,
            } => write!(f, "{} {} {}", feature, operator, threshold),
            FilterExpression::Compound {
                left,
                right,
                combine,
            } => write!(f, "({}) {} ({})", left, combine, right),
        }
    }
}

/// Errors from parsing filter text.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FilterParseError {
    #[error("empty filter expression")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("invalid threshold '{0}'")]
    InvalidNumber(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Op(Operator),
    Number(String),
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
            Token::Op(op) => write!(f, "'{}'", op),
            Token::Number(n) => write!(f, "'{}'", n),
            Token::Word(w) => write!(f, "'{}'", w),
        }
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?P<open>\()|(?P<close>\))|(?P<op><=|>=|==|!=|<|>)|(?P<num>[-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)|(?P<word>[A-Za-z_][A-Za-z0-9_.]*))",
        )
        .unwrap()
    })
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, FilterParseError> {
    let pattern = token_pattern();
    let mut tokens = Vec::new();
    let mut offset = 0;

    while !input[offset..].trim_start().is_empty() {
        let rest = &input[offset..];
        let caps = match pattern.captures(rest) {
            Some(caps) => caps,
            None => {
                let skipped = rest.len() - rest.trim_start().len();
                let ch = rest.trim_start().chars().next().unwrap_or(' ');
                return Err(FilterParseError::UnexpectedChar {
                    ch,
                    offset: offset + skipped,
                });
            }
        };

        let token = if caps.name("open").is_some() {
            Token::Open
        } else if caps.name("close").is_some() {
            Token::Close
        } else if let Some(op) = caps.name("op").and_then(|m| Operator::from_symbol(m.as_str())) {
            Token::Op(op)
        } else if let Some(num) = caps.name("num") {
            Token::Number(num.as_str().to_string())
        } else if let Some(word) = caps.name("word") {
            Token::Word(word.as_str().to_string())
        } else {
            break;
        };

        tokens.push(token);
        offset += caps.get(0).map_or(rest.len(), |m| m.end());
    }

    Ok(tokens)
}

/// Recursive-descent parser; combinators are left-associative with equal
/// precedence, so `a AND b OR c` reads as `(a AND b) OR c`.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn describe(token: Option<Token>) -> String {
        token.map_or_else(|| "end of input".to_string(), |t| t.to_string())
    }

    fn expression(&mut self) -> std::result::Result<FilterExpression, FilterParseError> {
        let mut left = self.term()?;
        while let Some(Token::Word(word)) = self.peek() {
            let Some(combine) = Combine::from_keyword(word) else {
                break;
            };
            self.pos += 1;
            let right = self.term()?;
            left = FilterExpression::compound(left, combine, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> std::result::Result<FilterExpression, FilterParseError> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    other => Err(FilterParseError::Unexpected {
                        expected: "')'",
                        found: Self::describe(other),
                    }),
                }
            }
            Some(Token::Word(feature)) => {
                let operator = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(FilterParseError::Unexpected {
                            expected: "comparison operator",
                            found: Self::describe(other),
                        })
                    }
                };
                let threshold = match self.next() {
                    Some(Token::Number(text)) => text
                        .parse::<f64>()
                        .map_err(|_| FilterParseError::InvalidNumber(text.clone()))?,
                    other => {
                        return Err(FilterParseError::Unexpected {
                            expected: "numeric threshold",
                            found: Self::describe(other),
                        })
                    }
                };
                Ok(FilterExpression::simple(feature, operator, threshold))
            }
            other => Err(FilterParseError::Unexpected {
                expected: "feature name or '('",
                found: Self::describe(other),
            }),
        }
    }
}

impl FromStr for FilterExpression {
    type Err = FilterParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        if tokens.is_empty() {
            return Err(FilterParseError::Empty);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expression = parser.expression()?;
        if let Some(extra) = parser.next() {
            return Err(FilterParseError::Unexpected {
                expected: "end of expression",
                found: extra.to_string(),
            });
        }
        Ok(expression)
    }
}
