//! Calculation engine: numeric parsing, formulas, aggregation, grouping,
//! derived metrics and per-chart pipelines

pub mod aggregation;
pub mod breakdown;
pub mod chart;
pub mod derived;
pub mod formula;
pub mod group_by;
pub mod limits;
pub mod numeric;

pub use aggregation::{aggregate, AggregationConfig, AggregationKind};
pub use breakdown::{describe_calculation, CalculationBreakdown};
pub use chart::{process_chart_data, ChartDataMapping, ChartMetadata, ChartType, ProcessedChartData, SortOrder};
pub use derived::{apply_derived_metric, apply_derived_metrics, DerivedMetricConfig, DerivedMetricKind};
pub use formula::{evaluate_formula, validate_formula, CompiledFormula, EvaluationMode, FormulaSummary};
pub use group_by::{group_by, pivot, GroupByConfig, PivotConfig};
pub use numeric::parse_numeric_value;
