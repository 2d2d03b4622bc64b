//! Derived metrics
//!
//! Each metric appends one column to every row. Row-relative kinds read two
//! columns of the same row; sequence-relative kinds read earlier rows, so the
//! caller is responsible for ordering (usually chronological).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::formula::resolver::resolve_column;
use super::numeric::numeric_cell;
use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, CellValue, Row};

pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 3;
pub const DEFAULT_PERIODS: usize = 1;
pub const DEFAULT_YEAR_OVER_YEAR_PERIODS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedMetricKind {
    Ratio,
    Percentage,
    Difference,
    GrowthRate,
    PercentChange,
    RunningTotal,
    MovingAverage,
    PeriodOverPeriod,
    YearOverYear,
}

impl DerivedMetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedMetricKind::Ratio => "ratio",
            DerivedMetricKind::Percentage => "percentage",
            DerivedMetricKind::Difference => "difference",
            DerivedMetricKind::GrowthRate => "growth_rate",
            DerivedMetricKind::PercentChange => "percent_change",
            DerivedMetricKind::RunningTotal => "running_total",
            DerivedMetricKind::MovingAverage => "moving_average",
            DerivedMetricKind::PeriodOverPeriod => "period_over_period",
            DerivedMetricKind::YearOverYear => "year_over_year",
        }
    }

    /// Reads a numerator and a denominator instead of a single column
    pub fn is_row_relative(self) -> bool {
        matches!(
            self,
            DerivedMetricKind::Ratio | DerivedMetricKind::Percentage | DerivedMetricKind::Difference
        )
    }
}

impl fmt::Display for DerivedMetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DerivedMetricKind {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ratio" => Ok(DerivedMetricKind::Ratio),
            "percentage" | "percent" => Ok(DerivedMetricKind::Percentage),
            "difference" | "diff" => Ok(DerivedMetricKind::Difference),
            "growth_rate" | "growth" => Ok(DerivedMetricKind::GrowthRate),
            "percent_change" | "pct_change" => Ok(DerivedMetricKind::PercentChange),
            "running_total" | "cumulative_sum" => Ok(DerivedMetricKind::RunningTotal),
            "moving_average" | "rolling_average" => Ok(DerivedMetricKind::MovingAverage),
            "period_over_period" | "pop" => Ok(DerivedMetricKind::PeriodOverPeriod),
            "year_over_year" | "yoy" => Ok(DerivedMetricKind::YearOverYear),
            _ => Err(CalcError::Validation(format!(
                "Unknown derived metric '{}'",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetricConfig {
    #[serde(alias = "type")]
    pub kind: DerivedMetricKind,
    /// Output column
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numerator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denominator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub periods: Option<usize>,
}

impl DerivedMetricConfig {
    pub fn new(kind: DerivedMetricKind, alias: impl Into<String>) -> Self {
        Self {
            kind,
            alias: alias.into(),
            numerator: None,
            denominator: None,
            column: None,
            window: None,
            periods: None,
        }
    }

    pub fn ratio_of(
        kind: DerivedMetricKind,
        alias: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
    ) -> Self {
        Self {
            numerator: Some(numerator.into()),
            denominator: Some(denominator.into()),
            ..Self::new(kind, alias)
        }
    }

    pub fn over_column(kind: DerivedMetricKind, alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            column: Some(column.into()),
            ..Self::new(kind, alias)
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }

    pub fn with_periods(mut self, periods: usize) -> Self {
        self.periods = Some(periods);
        self
    }

    fn required(&self, field: &str, value: Option<&String>) -> CalcResult<String> {
        value.cloned().ok_or_else(|| {
            CalcError::Validation(format!(
                "Derived metric '{}' ({}) requires '{}'",
                self.alias, self.kind, field
            ))
        })
    }
}

/// Resolved inputs for one metric
enum Plan {
    Pair {
        numerator: String,
        denominator: String,
    },
    Sequence {
        column: String,
        window: usize,
        periods: usize,
    },
}

fn resolve(reference: &str, columns: &[String]) -> CalcResult<String> {
    resolve_column(reference, columns)
        .map(str::to_string)
        .ok_or_else(|| CalcError::column_not_found(reference, columns))
}

fn positive(value: usize, field: &str, config: &DerivedMetricConfig) -> CalcResult<usize> {
    if value == 0 {
        return Err(CalcError::Validation(format!(
            "Derived metric '{}' requires '{}' of at least 1",
            config.alias, field
        )));
    }
    Ok(value)
}

fn plan(config: &DerivedMetricConfig, columns: &[String]) -> CalcResult<Plan> {
    if config.alias.trim().is_empty() {
        return Err(CalcError::Validation(format!(
            "Derived metric ({}) requires an alias",
            config.kind
        )));
    }

    if config.kind.is_row_relative() {
        let numerator = config.required("numerator", config.numerator.as_ref())?;
        let denominator = config.required("denominator", config.denominator.as_ref())?;
        return Ok(Plan::Pair {
            numerator: resolve(&numerator, columns)?,
            denominator: resolve(&denominator, columns)?,
        });
    }

    let column = config.required("column", config.column.as_ref())?;
    let window = positive(
        config.window.unwrap_or(DEFAULT_MOVING_AVERAGE_WINDOW),
        "window",
        config,
    )?;
    let default_periods = match config.kind {
        DerivedMetricKind::YearOverYear => DEFAULT_YEAR_OVER_YEAR_PERIODS,
        _ => DEFAULT_PERIODS,
    };
    let periods = positive(config.periods.unwrap_or(default_periods), "periods", config)?;

    if config.kind == DerivedMetricKind::YearOverYear {
        debug!(
            alias = %config.alias,
            periods,
            "year-over-year assumes {} rows per year; row cadence is not checked",
            periods
        );
    }

    Ok(Plan::Sequence {
        column: resolve(&column, columns)?,
        window,
        periods,
    })
}

fn percent_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    let change = match (current, previous) {
        (Some(c), Some(p)) if p != 0.0 => Some((c - p) / p * 100.0),
        _ => None,
    };
    change.filter(|v| v.is_finite())
}

fn pair_value(kind: DerivedMetricKind, n: Option<f64>, d: Option<f64>) -> Option<f64> {
    let (n, d) = (n?, d?);
    let value = match kind {
        DerivedMetricKind::Difference => Some(n - d),
        DerivedMetricKind::Percentage if d != 0.0 => Some(n / d * 100.0),
        DerivedMetricKind::Ratio if d != 0.0 => Some(n / d),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

fn sequence_values(kind: DerivedMetricKind, values: &[Option<f64>], window: usize, periods: usize) -> Vec<Option<f64>> {
    match kind {
        DerivedMetricKind::RunningTotal => {
            let mut total = 0.0;
            values
                .iter()
                .map(|v| {
                    total += v.unwrap_or(0.0);
                    Some(total)
                })
                .collect()
        }
        DerivedMetricKind::MovingAverage => {
            // Running sum over the present values in the trailing window
            let (mut sum, mut count) = (0.0, 0usize);
            (0..values.len())
                .map(|i| {
                    if let Some(v) = values[i] {
                        sum += v;
                        count += 1;
                    }
                    if let Some(evicted) = i.checked_sub(window).and_then(|j| values[j]) {
                        sum -= evicted;
                        count -= 1;
                    }
                    if count == 0 {
                        None
                    } else {
                        Some(sum / count as f64)
                    }
                })
                .collect()
        }
        DerivedMetricKind::GrowthRate | DerivedMetricKind::PercentChange => {
            lagged_change(values, 1)
        }
        _ => lagged_change(values, periods),
    }
}

fn lagged_change(values: &[Option<f64>], periods: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| match i.checked_sub(periods) {
            Some(prev) => percent_change(values[i], values[prev]),
            None => None,
        })
        .collect()
}

/// Append `config.alias` to every row
pub fn apply_derived_metric(rows: &[Row], config: &DerivedMetricConfig) -> CalcResult<Vec<Row>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let columns = dataset_columns(rows);
    let plan = plan(config, &columns)?;

    let computed: Vec<Option<f64>> = match &plan {
        Plan::Pair {
            numerator,
            denominator,
        } => rows
            .iter()
            .map(|row| {
                pair_value(
                    config.kind,
                    numeric_cell(row, numerator),
                    numeric_cell(row, denominator),
                )
            })
            .collect(),
        Plan::Sequence {
            column,
            window,
            periods,
        } => {
            let values: Vec<Option<f64>> = rows.iter().map(|row| numeric_cell(row, column)).collect();
            sequence_values(config.kind, &values, *window, *periods)
        }
    };

    Ok(rows
        .iter()
        .zip(computed)
        .map(|(row, value)| {
            let mut out = row.clone();
            out.insert(
                config.alias.clone(),
                CellValue::from(value.filter(|v| v.is_finite())),
            );
            out
        })
        .collect())
}

/// Apply metrics in order; later metrics may read earlier aliases
pub fn apply_derived_metrics(rows: &[Row], configs: &[DerivedMetricConfig]) -> CalcResult<Vec<Row>> {
    let mut current = rows.to_vec();
    for config in configs {
        current = apply_derived_metric(&current, config)?;
    }
    Ok(current)
}
