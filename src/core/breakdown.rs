//! Calculation breakdown for scorecards: what was computed, from which
//! columns, over how many values.

use serde::Serialize;
use std::collections::BTreeMap;

use super::aggregation::{aggregate_rows, numeric_values, AggregationKind};
use super::chart::ChartDataMapping;
use super::formula::extractor::ComputedAggregate;
use super::formula::CompiledFormula;
use super::formula::resolver::resolve_column;
use super::limits::BREAKDOWN_SAMPLE_SIZE;
use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, Row};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationBreakdown {
    /// `AVG(Revenue)`, or the formula as written
    pub expression: String,
    pub columns: Vec<String>,
    /// First parsed values of each column
    pub sample_values: BTreeMap<String, Vec<f64>>,
    /// Parsed values across all columns
    pub value_count: usize,
    pub result: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<ComputedAggregate>,
}

fn samples(rows: &[Row], columns: &[String]) -> (BTreeMap<String, Vec<f64>>, usize) {
    let mut sample_values = BTreeMap::new();
    let mut value_count = 0;
    for column in columns {
        let values = numeric_values(rows, column);
        value_count += values.len();
        sample_values.insert(
            column.clone(),
            values.into_iter().take(BREAKDOWN_SAMPLE_SIZE).collect(),
        );
    }
    (sample_values, value_count)
}

/// Describe the scorecard calculation `mapping` asks for.
///
/// A formula is described as written; its result is only filled in when it
/// folds to a single dataset-wide value.
pub fn describe_calculation(rows: &[Row], mapping: &ChartDataMapping) -> CalcResult<CalculationBreakdown> {
    if let Some(formula) = mapping.formula() {
        let compiled = CompiledFormula::compile(formula, rows)?;

        let mut columns: Vec<String> = Vec::new();
        for name in compiled
            .aggregates()
            .iter()
            .map(|a| &a.column)
            .chain(compiled.row_columns())
        {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }

        let result = if compiled.is_dataset_scalar() {
            compiled.evaluate_scalar()?
        } else {
            None
        };
        let (sample_values, value_count) = samples(rows, &columns);

        return Ok(CalculationBreakdown {
            expression: formula.to_string(),
            columns,
            sample_values,
            value_count,
            result,
            aggregates: compiled.aggregates().to_vec(),
        });
    }

    let metric = mapping
        .metric
        .as_ref()
        .or(mapping.value.as_ref())
        .or(mapping.y_axis.first())
        .ok_or_else(|| {
            CalcError::Validation("Nothing to describe: set a formula or a metric column".to_string())
        })?;

    let available = dataset_columns(rows);
    let column = resolve_column(metric, &available)
        .ok_or_else(|| CalcError::column_not_found(metric, &available))?
        .to_string();
    let kind = mapping.aggregation.unwrap_or(AggregationKind::Sum);
    let result = aggregate_rows(rows, &column, kind, mapping.percentile);
    let columns = vec![column];
    let (sample_values, value_count) = samples(rows, &columns);

    Ok(CalculationBreakdown {
        expression: format!("{}({})", kind.as_str().to_uppercase(), columns[0]),
        columns,
        sample_values,
        value_count,
        result,
        aggregates: Vec::new(),
    })
}
