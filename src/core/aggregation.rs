//! Aggregation engine
//!
//! Scalar aggregates over a single column. Every aggregate of an empty
//! numeric set is `None`; nothing here returns NaN or fails.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use super::limits::{MAX_ROWS_LINEAR, MAX_ROWS_SORTED};
use super::numeric::numeric_cell;
use crate::error::CalcError;
use crate::types::Row;

/// Aggregate kinds understood by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum AggregationKind {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Median,
    Mode,
    Std,
    Variance,
    Percentile,
    Distinct,
    First,
    Last,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 13] = [
        AggregationKind::Sum,
        AggregationKind::Avg,
        AggregationKind::Count,
        AggregationKind::Min,
        AggregationKind::Max,
        AggregationKind::Median,
        AggregationKind::Mode,
        AggregationKind::Std,
        AggregationKind::Variance,
        AggregationKind::Percentile,
        AggregationKind::Distinct,
        AggregationKind::First,
        AggregationKind::Last,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregationKind::Sum => "sum",
            AggregationKind::Avg => "avg",
            AggregationKind::Count => "count",
            AggregationKind::Min => "min",
            AggregationKind::Max => "max",
            AggregationKind::Median => "median",
            AggregationKind::Mode => "mode",
            AggregationKind::Std => "std",
            AggregationKind::Variance => "variance",
            AggregationKind::Percentile => "percentile",
            AggregationKind::Distinct => "distinct",
            AggregationKind::First => "first",
            AggregationKind::Last => "last",
        }
    }

    /// Aggregates that sort or build frequency tables get the stricter ceiling
    pub fn is_sort_dependent(self) -> bool {
        matches!(
            self,
            AggregationKind::Median | AggregationKind::Mode | AggregationKind::Percentile
        )
    }

    pub fn row_limit(self) -> usize {
        if self.is_sort_dependent() {
            MAX_ROWS_SORTED
        } else {
            MAX_ROWS_LINEAR
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AggregationKind> for &'static str {
    fn from(kind: AggregationKind) -> Self {
        kind.as_str()
    }
}

impl FromStr for AggregationKind {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_lowercase().as_str() {
            "sum" | "total" => AggregationKind::Sum,
            "avg" | "average" | "mean" => AggregationKind::Avg,
            "count" => AggregationKind::Count,
            "min" | "minimum" => AggregationKind::Min,
            "max" | "maximum" => AggregationKind::Max,
            "median" => AggregationKind::Median,
            "mode" => AggregationKind::Mode,
            "std" | "stddev" | "stdev" => AggregationKind::Std,
            "variance" | "var" => AggregationKind::Variance,
            "percentile" => AggregationKind::Percentile,
            "distinct" | "count_distinct" | "unique" => AggregationKind::Distinct,
            "first" => AggregationKind::First,
            "last" => AggregationKind::Last,
            other => {
                return Err(CalcError::Validation(format!(
                    "Unknown aggregation '{}'. Expected one of: {}",
                    other,
                    AggregationKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for AggregationKind {
    type Error = CalcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One aggregate over one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub column: String,
    pub kind: AggregationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

impl AggregationConfig {
    pub fn new(column: impl Into<String>, kind: AggregationKind) -> Self {
        Self {
            column: column.into(),
            kind,
            alias: None,
            percentile: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Output column name: the alias, or `kind_column`
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.kind, self.column))
    }
}

/// Aggregate `config.column` over a dataset
pub fn aggregate(rows: &[Row], config: &AggregationConfig) -> Option<f64> {
    aggregate_rows(rows, &config.column, config.kind, config.percentile)
}

/// Aggregate a column over any sequence of rows, enforcing the row ceiling
/// for `kind` before any value is collected.
pub fn aggregate_rows<'a, I>(
    rows: I,
    column: &str,
    kind: AggregationKind,
    percentile: Option<f64>,
) -> Option<f64>
where
    I: IntoIterator<Item = &'a Row>,
{
    let limit = kind.row_limit();
    let mut values = Vec::new();
    let mut scanned = 0usize;
    let mut truncated = false;

    for row in rows {
        if scanned == limit {
            truncated = true;
            break;
        }
        scanned += 1;
        if let Some(v) = numeric_cell(row, column) {
            values.push(v);
        }
    }

    if truncated {
        warn!(
            column,
            aggregation = %kind,
            limit,
            "row ceiling reached, aggregating the first {} rows only",
            limit
        );
    }

    aggregate_values(&values, kind, percentile)
}

/// Parsed numeric values of `column`, in row order
pub fn numeric_values<'a, I>(rows: I, column: &str) -> Vec<f64>
where
    I: IntoIterator<Item = &'a Row>,
{
    rows.into_iter()
        .filter_map(|row| numeric_cell(row, column))
        .collect()
}

/// Aggregate already-parsed values
pub fn aggregate_values(values: &[f64], kind: AggregationKind, percentile: Option<f64>) -> Option<f64> {
    let result = match kind {
        AggregationKind::Count => return Some(values.len() as f64),
        AggregationKind::Distinct => return Some(distinct_count(values) as f64),
        _ if values.is_empty() => return None,
        AggregationKind::Sum => values.iter().sum(),
        AggregationKind::Avg => mean(values),
        AggregationKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregationKind::Median => median(values),
        AggregationKind::Mode => mode(values)?,
        AggregationKind::Std => population_variance(values).sqrt(),
        AggregationKind::Variance => population_variance(values),
        AggregationKind::Percentile => percentile_of(values, percentile.unwrap_or(50.0)),
        AggregationKind::First => values[0],
        AggregationKind::Last => values[values.len() - 1],
    };

    // Sums of huge inputs can still overflow
    result.is_finite().then_some(result)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

fn median(values: &[f64]) -> f64 {
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Normalized bit pattern so that 0.0 and -0.0 count as one value
fn value_key(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else {
        v.to_bits()
    }
}

/// Most frequent value. Frequencies live in an insertion-ordered table and
/// only a strictly greater count replaces the leader, so ties go to the
/// value seen first in the data.
fn mode(values: &[f64]) -> Option<f64> {
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut counts: Vec<(f64, usize)> = Vec::new();

    for &v in values {
        match index.get(&value_key(v)) {
            Some(&i) => counts[i].1 += 1,
            None => {
                index.insert(value_key(v), counts.len());
                counts.push((v, 1));
            }
        }
    }

    let mut best: Option<(f64, usize)> = None;
    for &(value, count) in &counts {
        if best.map_or(true, |(_, max)| count > max) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

fn population_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Linear interpolation between the two sorted ranks bracketing `p`
fn percentile_of(values: &[f64], p: f64) -> f64 {
    let p = if p.is_nan() { 50.0 } else { p.clamp(0.0, 100.0) };
    let sorted = sorted(values);
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn distinct_count(values: &[f64]) -> usize {
    values.iter().map(|&v| value_key(v)).collect::<HashSet<_>>().len()
}
