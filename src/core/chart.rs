//! Chart data processor
//!
//! Turns (dataset, chart type, field mapping) into the exact rows a chart
//! renders, plus metadata describing what was computed. Mapping column names
//! are untrusted and always go through the column resolver.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

use super::aggregation::{aggregate_rows, AggregationConfig, AggregationKind};
use super::derived::{apply_derived_metrics, DerivedMetricConfig};
use super::formula::resolver::resolve_column;
use super::formula::{evaluate_formula, EvaluationMode};
use super::group_by::{group_by, GroupByConfig};
use super::numeric::parse_numeric_value;
use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, CellValue, Row};

/// Column name used for a formula result when the mapping names none
pub const DEFAULT_FORMULA_ALIAS: &str = "formula_value";

//==============================================================================
// Chart types
//==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChartType {
    Scorecard,
    Bar,
    Column,
    Line,
    Area,
    Scatter,
    Pie,
    Donut,
    /// Rows pass through unchanged
    Unsupported(String),
}

impl ChartType {
    pub fn as_str(&self) -> &str {
        match self {
            ChartType::Scorecard => "scorecard",
            ChartType::Bar => "bar",
            ChartType::Column => "column",
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Scatter => "scatter",
            ChartType::Pie => "pie",
            ChartType::Donut => "donut",
            ChartType::Unsupported(name) => name,
        }
    }
}

impl From<&str> for ChartType {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "scorecard" | "kpi" => ChartType::Scorecard,
            "bar" => ChartType::Bar,
            "column" => ChartType::Column,
            "line" => ChartType::Line,
            "area" => ChartType::Area,
            "scatter" => ChartType::Scatter,
            "pie" => ChartType::Pie,
            "donut" | "doughnut" => ChartType::Donut,
            _ => ChartType::Unsupported(name.to_string()),
        }
    }
}

impl From<String> for ChartType {
    fn from(name: String) -> Self {
        ChartType::from(name.as_str())
    }
}

impl From<ChartType> for String {
    fn from(chart: ChartType) -> Self {
        chart.as_str().to_string()
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//==============================================================================
// Mapping
//==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[serde(alias = "ascending")]
    Asc,
    #[serde(alias = "descending")]
    Desc,
}

/// Field-role to column bindings, as proposed by a user or an assistant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChartDataMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<String>,
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub y_axis: Vec<String>,
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub category: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationKind>,
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula_alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula_mode: Option<EvaluationMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<SortOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived_metrics: Vec<DerivedMetricConfig>,
}

impl ChartDataMapping {
    /// The formula, if one is set and not blank
    pub fn formula(&self) -> Option<&str> {
        self.formula.as_deref().filter(|f| !f.trim().is_empty())
    }

    pub fn formula_alias(&self) -> &str {
        self.formula_alias
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or(DEFAULT_FORMULA_ALIAS)
    }

    /// Category columns: `category`, else `xAxis`
    fn category_columns(&self) -> Vec<String> {
        if !self.category.is_empty() {
            self.category.clone()
        } else {
            self.x_axis.iter().cloned().collect()
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let values = match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    };
    Ok(values.into_iter().filter(|v| !v.trim().is_empty()).collect())
}

//==============================================================================
// Output
//==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub chart_type: String,
    pub original_row_count: usize,
    pub result_row_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_kind: Option<AggregationKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouped_by: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_metrics_applied: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl ChartMetadata {
    fn new(chart_type: &ChartType, original_row_count: usize) -> Self {
        Self {
            chart_type: chart_type.to_string(),
            original_row_count,
            result_row_count: 0,
            aggregation_kind: None,
            grouped_by: None,
            derived_metrics_applied: None,
            formula: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedChartData {
    pub rows: Vec<Row>,
    pub metadata: ChartMetadata,
}

impl ProcessedChartData {
    fn finish(rows: Vec<Row>, mut metadata: ChartMetadata) -> Self {
        metadata.result_row_count = rows.len();
        Self { rows, metadata }
    }
}

//==============================================================================
// Processing
//==============================================================================

/// Dataset columns a mapping may refer to
struct Columns(Vec<String>);

impl Columns {
    fn of(rows: &[Row]) -> Self {
        Columns(dataset_columns(rows))
    }

    fn resolve(&self, reference: &str) -> CalcResult<String> {
        resolve_column(reference, &self.0)
            .map(str::to_string)
            .ok_or_else(|| CalcError::column_not_found(reference, &self.0))
    }

    fn resolve_all(&self, references: &[String]) -> CalcResult<Vec<String>> {
        references.iter().map(|r| self.resolve(r)).collect()
    }
}

/// Produce the rows `chart_type` needs from `rows` according to `mapping`
pub fn process_chart_data(
    rows: &[Row],
    chart_type: &ChartType,
    mapping: &ChartDataMapping,
) -> CalcResult<ProcessedChartData> {
    let mut metadata = ChartMetadata::new(chart_type, rows.len());

    if rows.is_empty() {
        debug!(chart = %chart_type, "empty dataset, passing through");
        return Ok(ProcessedChartData::finish(Vec::new(), metadata));
    }

    debug!(chart = %chart_type, rows = rows.len(), "processing chart data");

    let out = match chart_type {
        ChartType::Scorecard => scorecard(rows, mapping, &mut metadata)?,
        ChartType::Bar | ChartType::Column => categorical(rows, mapping, &mut metadata)?,
        ChartType::Line | ChartType::Area => series(rows, mapping, &mut metadata)?,
        ChartType::Scatter => scatter(rows, mapping, &mut metadata)?,
        ChartType::Pie | ChartType::Donut => proportional(rows, mapping, &mut metadata)?,
        ChartType::Unsupported(name) => {
            debug!(chart = %name, "unsupported chart type, passing rows through");
            rows.to_vec()
        }
    };

    Ok(ProcessedChartData::finish(out, metadata))
}

/// One-row result. A formula takes precedence over `metric`/`value`/`yAxis`
/// and is evaluated dataset-wise unless `formulaMode` says otherwise; its
/// result is stored under `formulaAlias`, or `formula_value` when no alias
/// is given.
fn scorecard(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<Vec<Row>> {
    if let Some(formula) = mapping.formula() {
        let mode = mapping.formula_mode.unwrap_or(EvaluationMode::DatasetWise);
        metadata.formula = Some(formula.to_string());
        return evaluate_formula(rows, formula, mapping.formula_alias(), mode);
    }

    let metric = mapping
        .metric
        .as_ref()
        .or(mapping.value.as_ref())
        .or(mapping.y_axis.first());
    let Some(metric) = metric else {
        debug!("scorecard has no metric column, passing rows through");
        return Ok(rows.to_vec());
    };

    let column = Columns::of(rows).resolve(metric)?;
    let kind = mapping.aggregation.unwrap_or(AggregationKind::Sum);
    let value = aggregate_rows(rows, &column, kind, mapping.percentile);
    metadata.aggregation_kind = Some(kind);

    let mut row = Row::new();
    row.insert(column, CellValue::from(value));
    Ok(vec![row])
}

/// Row-wise formula and derived metrics, shared by the series charts.
/// Returns the prepared rows and the formula alias, if a formula ran.
fn prepare(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<(Vec<Row>, Option<String>)> {
    let mut out = rows.to_vec();
    let mut alias = None;

    if let Some(formula) = mapping.formula() {
        let mode = mapping.formula_mode.unwrap_or(EvaluationMode::RowWise);
        out = evaluate_formula(&out, formula, mapping.formula_alias(), mode)?;
        metadata.formula = Some(formula.to_string());
        alias = Some(mapping.formula_alias().to_string());
    }

    if !mapping.derived_metrics.is_empty() {
        out = apply_derived_metrics(&out, &mapping.derived_metrics)?;
        metadata.derived_metrics_applied = Some(
            mapping
                .derived_metrics
                .iter()
                .map(|m| m.alias.clone())
                .collect(),
        );
    }

    Ok((out, alias))
}

/// Group on `groups`, aggregating every value column into a column of the
/// same name.
fn aggregate_by(
    rows: &[Row],
    groups: Vec<String>,
    values: &[String],
    kind: AggregationKind,
    percentile: Option<f64>,
    metadata: &mut ChartMetadata,
) -> Vec<Row> {
    let config = GroupByConfig {
        group_columns: groups.clone(),
        aggregations: values
            .iter()
            .map(|column| AggregationConfig {
                percentile,
                ..AggregationConfig::new(column.clone(), kind).with_alias(column.clone())
            })
            .collect(),
        keep_original_columns: false,
    };
    metadata.grouped_by = Some(groups);
    metadata.aggregation_kind = Some(kind);
    group_by(rows, &config)
}

fn categorical(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<Vec<Row>> {
    let (prepared, formula_alias) = prepare(rows, mapping, metadata)?;
    let columns = Columns::of(&prepared);

    let categories = columns.resolve_all(&mapping.category_columns())?;
    let mut out = if categories.is_empty() {
        prepared
    } else {
        let values = if !mapping.y_axis.is_empty() {
            columns.resolve_all(&mapping.y_axis)?
        } else if let Some(value) = &mapping.value {
            vec![columns.resolve(value)?]
        } else {
            formula_alias.into_iter().collect()
        };
        let kind = mapping.aggregation.unwrap_or(AggregationKind::Sum);
        aggregate_by(&prepared, categories, &values, kind, mapping.percentile, metadata)
    };

    order_and_limit(&mut out, mapping, None, SortOrder::Asc)?;
    Ok(out)
}

fn series(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<Vec<Row>> {
    let (prepared, formula_alias) = prepare(rows, mapping, metadata)?;
    let columns = Columns::of(&prepared);

    let groups = if !mapping.group_by.is_empty() {
        columns.resolve_all(&mapping.group_by)?
    } else if mapping.aggregation.is_some() {
        match &mapping.x_axis {
            Some(x) => vec![columns.resolve(x)?],
            None => Vec::new(),
        }
    } else {
        Vec::new()
    };

    let mut out = if groups.is_empty() {
        prepared
    } else {
        let mut values = columns.resolve_all(&mapping.y_axis)?;
        if values.is_empty() {
            if let Some(value) = &mapping.value {
                values.push(columns.resolve(value)?);
            }
        }
        if let Some(alias) = formula_alias {
            if !values.contains(&alias) {
                values.push(alias);
            }
        }
        let kind = mapping.aggregation.unwrap_or(AggregationKind::Avg);
        aggregate_by(&prepared, groups, &values, kind, mapping.percentile, metadata)
    };

    order_and_limit(&mut out, mapping, None, SortOrder::Asc)?;
    Ok(out)
}

fn scatter(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<Vec<Row>> {
    let (prepared, _) = prepare(rows, mapping, metadata)?;
    let columns = Columns::of(&prepared);

    let mut out = if mapping.group_by.is_empty() {
        prepared
    } else {
        let groups = columns.resolve_all(&mapping.group_by)?;
        let mut values = Vec::new();
        if let Some(x) = &mapping.x_axis {
            values.push(columns.resolve(x)?);
        }
        for y in columns.resolve_all(&mapping.y_axis)? {
            if !values.contains(&y) {
                values.push(y);
            }
        }
        let kind = mapping.aggregation.unwrap_or(AggregationKind::Avg);
        aggregate_by(&prepared, groups, &values, kind, mapping.percentile, metadata)
    };

    order_and_limit(&mut out, mapping, None, SortOrder::Asc)?;
    Ok(out)
}

fn proportional(
    rows: &[Row],
    mapping: &ChartDataMapping,
    metadata: &mut ChartMetadata,
) -> CalcResult<Vec<Row>> {
    let (prepared, formula_alias) = prepare(rows, mapping, metadata)?;
    let columns = Columns::of(&prepared);

    let categories = columns.resolve_all(&mapping.category_columns())?;
    let value = match mapping.value.as_ref().or(mapping.y_axis.first()) {
        Some(value) => Some(columns.resolve(value)?),
        None => formula_alias,
    };

    let (Some(value), false) = (value, categories.is_empty()) else {
        debug!("pie chart needs a category and a value column, passing rows through");
        let mut out = prepared;
        order_and_limit(&mut out, mapping, None, SortOrder::Desc)?;
        return Ok(out);
    };

    let kind = mapping.aggregation.unwrap_or(AggregationKind::Sum);
    let mut out = aggregate_by(
        &prepared,
        categories,
        std::slice::from_ref(&value),
        kind,
        mapping.percentile,
        metadata,
    );
    order_and_limit(&mut out, mapping, Some(value), SortOrder::Desc)?;
    Ok(out)
}

/// Sort by `sortBy` (or `default_sort`), then apply `limit`. `sortOrder`
/// falls back to `default_order`. Without a sort column rows keep their order.
fn order_and_limit(
    rows: &mut Vec<Row>,
    mapping: &ChartDataMapping,
    default_sort: Option<String>,
    default_order: SortOrder,
) -> CalcResult<()> {
    let column = match (&mapping.sort_by, default_sort) {
        (Some(by), _) => Some(Columns::of(rows).resolve(by)?),
        (None, default_sort) => default_sort,
    };

    if let Some(column) = column {
        sort_rows(rows, &column, mapping.sort_order.unwrap_or(default_order));
    }
    if let Some(limit) = mapping.limit {
        rows.truncate(limit);
    }
    Ok(())
}

//==============================================================================
// Sorting
//==============================================================================

/// Numbers sort before dates, dates before text
#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortKey {
    Number(f64),
    Date(NaiveDateTime),
    Text(String),
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    // year-month, e.g. 2024-03
    if text.len() == 7 {
        return NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
    }
    None
}

fn sort_key(cell: Option<&CellValue>) -> Option<SortKey> {
    let cell = cell?;
    if let Some(n) = parse_numeric_value(cell) {
        return Some(SortKey::Number(n));
    }
    match cell {
        CellValue::Null => None,
        CellValue::Text(text) => Some(
            parse_date(text)
                .map(SortKey::Date)
                .unwrap_or_else(|| SortKey::Text(text.clone())),
        ),
        other => Some(SortKey::Text(other.to_string())),
    }
}

/// Stable, numeric-aware sort on one column. Nulls go last in both orders.
pub fn sort_rows(rows: &mut Vec<Row>, column: &str, order: SortOrder) {
    let mut keyed: Vec<(Option<SortKey>, Row)> = rows
        .drain(..)
        .map(|row| (sort_key(row.get(column)), row))
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => {
            let ord = a.partial_cmp(b).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    });

    rows.extend(keyed.into_iter().map(|(_, row)| row));
}
