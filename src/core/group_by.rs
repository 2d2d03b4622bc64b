//! Group-by and pivot
//!
//! Rows are partitioned on the tuple of their group-column values. Groups and
//! pivot columns come out in first-appearance order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::aggregation::{aggregate_rows, AggregationConfig, AggregationKind};
use crate::types::{CellValue, Row};

/// Partition rows by `group_columns` and aggregate each partition
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupByConfig {
    pub group_columns: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<AggregationConfig>,
    /// Carry the remaining columns of each group's first row
    #[serde(default)]
    pub keep_original_columns: bool,
}

impl GroupByConfig {
    pub fn new(group_columns: Vec<String>) -> Self {
        Self {
            group_columns,
            ..Self::default()
        }
    }

    pub fn aggregate(mut self, config: AggregationConfig) -> Self {
        self.aggregations.push(config);
        self
    }

    pub fn keep_original_columns(mut self, keep: bool) -> Self {
        self.keep_original_columns = keep;
        self
    }
}

/// Group key: one stringified value per group column, null kept distinct
/// from the empty string.
type GroupKey = Vec<Option<String>>;

fn group_key(row: &Row, columns: &[String]) -> GroupKey {
    columns
        .iter()
        .map(|c| row.get(c).and_then(CellValue::as_key))
        .collect()
}

struct Partition<'a> {
    first: &'a Row,
    rows: Vec<&'a Row>,
}

/// Split `rows` into partitions, preserving first-appearance order
fn partition<'a>(rows: &'a [Row], columns: &[String]) -> Vec<Partition<'a>> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut partitions: Vec<Partition<'a>> = Vec::new();

    for row in rows {
        let key = group_key(row, columns);
        match index.get(&key) {
            Some(&i) => partitions[i].rows.push(row),
            None => {
                index.insert(key, partitions.len());
                partitions.push(Partition {
                    first: row,
                    rows: vec![row],
                });
            }
        }
    }
    partitions
}

fn copy_columns(target: &mut Row, source: &Row, columns: &[String]) {
    for column in columns {
        let value = source.get(column).cloned().unwrap_or_default();
        target.insert(column.clone(), value);
    }
}

/// One output row per distinct group
pub fn group_by(rows: &[Row], config: &GroupByConfig) -> Vec<Row> {
    if rows.is_empty() {
        return Vec::new();
    }

    let partitions = partition(rows, &config.group_columns);
    debug!(
        groups = partitions.len(),
        columns = ?config.group_columns,
        "grouped rows"
    );

    partitions
        .into_iter()
        .map(|part| {
            let mut out = if config.keep_original_columns {
                part.first.clone()
            } else {
                Row::new()
            };
            copy_columns(&mut out, part.first, &config.group_columns);

            for agg in &config.aggregations {
                let value = aggregate_rows(
                    part.rows.iter().copied(),
                    &agg.column,
                    agg.kind,
                    agg.percentile,
                );
                out.insert(agg.output_name(), CellValue::from(value));
            }
            out
        })
        .collect()
}

/// Reshape long rows into a wide cross-tab
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotConfig {
    pub index_columns: Vec<String>,
    pub pivot_columns: Vec<String>,
    pub value_column: String,
    #[serde(default = "default_pivot_kind")]
    pub kind: AggregationKind,
    /// Value for index/pivot combinations with no rows
    #[serde(default)]
    pub fill_value: CellValue,
}

fn default_pivot_kind() -> AggregationKind {
    AggregationKind::Sum
}

impl PivotConfig {
    pub fn new(
        index_columns: Vec<String>,
        pivot_columns: Vec<String>,
        value_column: impl Into<String>,
        kind: AggregationKind,
    ) -> Self {
        Self {
            index_columns,
            pivot_columns,
            value_column: value_column.into(),
            kind,
            fill_value: CellValue::Null,
        }
    }

    pub fn with_fill_value(mut self, fill: impl Into<CellValue>) -> Self {
        self.fill_value = fill.into();
        self
    }
}

/// Column label for a pivot tuple. Distinct tuples can share a label
/// (`a_b` + `c` vs `a` + `b_c`); their rows then land in the same column.
fn pivot_label(row: &Row, columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| row.get(c).and_then(CellValue::as_key).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("_")
}

/// Output column for each raw pivot label. A label that names an index
/// column gets `_` appended until it is free, so index values survive.
fn pivot_output_columns(labels: Vec<String>, index_columns: &[String]) -> Vec<(String, String)> {
    let mut taken: HashSet<String> = index_columns.iter().cloned().collect();
    taken.extend(labels.iter().cloned());

    labels
        .into_iter()
        .map(|label| {
            if !index_columns.contains(&label) {
                return (label.clone(), label);
            }
            let mut column = format!("{label}_");
            while taken.contains(&column) {
                column.push('_');
            }
            taken.insert(column.clone());
            (label, column)
        })
        .collect()
}

/// One row per index tuple, one column per distinct pivot label
pub fn pivot(rows: &[Row], config: &PivotConfig) -> Vec<Row> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut labels: Vec<String> = Vec::new();
    for row in rows {
        let label = pivot_label(row, &config.pivot_columns);
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    let labels = pivot_output_columns(labels, &config.index_columns);

    partition(rows, &config.index_columns)
        .into_iter()
        .map(|part| {
            let mut cells: HashMap<String, Vec<&Row>> = HashMap::new();
            for &row in &part.rows {
                cells
                    .entry(pivot_label(row, &config.pivot_columns))
                    .or_default()
                    .push(row);
            }

            let mut out = Row::new();
            copy_columns(&mut out, part.first, &config.index_columns);
            for (label, column) in &labels {
                let value = match cells.get(label) {
                    Some(matched) => CellValue::from(aggregate_rows(
                        matched.iter().copied(),
                        &config.value_column,
                        config.kind,
                        None,
                    )),
                    None => config.fill_value.clone(),
                };
                out.insert(column.clone(), value);
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sales() -> Vec<Row> {
        vec![
            row! { "Region" => "East", "Quarter" => "Q1", "Revenue" => 100, "Rep" => "Ann" },
            row! { "Region" => "East", "Quarter" => "Q2", "Revenue" => 50, "Rep" => "Bob" },
            row! { "Region" => "West", "Quarter" => "Q1", "Revenue" => 30, "Rep" => "Cy" },
        ]
    }

    fn by_region() -> GroupByConfig {
        GroupByConfig::new(vec!["Region".to_string()])
    }

    #[test]
    fn test_group_sum() {
        let config = by_region().aggregate(AggregationConfig::new("Revenue", AggregationKind::Sum));
        let out = group_by(&sales(), &config);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["Region"], CellValue::from("East"));
        assert_eq!(out[0]["sum_Revenue"], CellValue::Number(150.0));
        assert_eq!(out[1]["sum_Revenue"], CellValue::Number(30.0));
        assert!(!out[0].contains_key("Rep"));
    }

    #[test]
    fn test_group_alias_and_multiple_aggregations() {
        let config = by_region()
            .aggregate(AggregationConfig::new("Revenue", AggregationKind::Avg).with_alias("avg"))
            .aggregate(AggregationConfig::new("Revenue", AggregationKind::Count));
        let out = group_by(&sales(), &config);
        assert_eq!(out[0]["avg"], CellValue::Number(75.0));
        assert_eq!(out[0]["count_Revenue"], CellValue::Number(2.0));
    }

    #[test]
    fn test_keep_original_columns_uses_first_row() {
        let config = by_region()
            .aggregate(AggregationConfig::new("Revenue", AggregationKind::Sum).with_alias("Revenue"))
            .keep_original_columns(true);
        let out = group_by(&sales(), &config);
        assert_eq!(out[0]["Rep"], CellValue::from("Ann"));
        assert_eq!(out[0]["Quarter"], CellValue::from("Q1"));
        assert_eq!(out[0]["Revenue"], CellValue::Number(150.0));
    }

    #[test]
    fn test_composite_keys_do_not_collide() {
        let rows = vec![
            row! { "a" => "x_y", "b" => "z", "v" => 1 },
            row! { "a" => "x", "b" => "y_z", "v" => 2 },
        ];
        let config = GroupByConfig::new(vec!["a".into(), "b".into()])
            .aggregate(AggregationConfig::new("v", AggregationKind::Sum));
        assert_eq!(group_by(&rows, &config).len(), 2);
    }

    #[test]
    fn test_null_and_missing_keys_group_together() {
        let rows = vec![
            row! { "Region" => CellValue::Null, "v" => 1 },
            row! { "v" => 2 },
            row! { "Region" => "", "v" => 4 },
        ];
        let config = by_region().aggregate(AggregationConfig::new("v", AggregationKind::Sum));
        let out = group_by(&rows, &config);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["Region"], CellValue::Null);
        assert_eq!(out[0]["sum_v"], CellValue::Number(3.0));
    }

    #[test]
    fn test_group_empty_input() {
        assert!(group_by(&[], &by_region()).is_empty());
    }

    #[test]
    fn test_pivot_with_fill() {
        let config = PivotConfig::new(
            vec!["Region".into()],
            vec!["Quarter".into()],
            "Revenue",
            AggregationKind::Sum,
        )
        .with_fill_value(0);
        let out = pivot(&sales(), &config);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["Q1"], CellValue::Number(100.0));
        assert_eq!(out[0]["Q2"], CellValue::Number(50.0));
        assert_eq!(out[1]["Q1"], CellValue::Number(30.0));
        assert_eq!(out[1]["Q2"], CellValue::Number(0.0));
    }

    #[test]
    fn test_pivot_default_fill_is_null() {
        let config = PivotConfig::new(
            vec!["Region".into()],
            vec!["Quarter".into()],
            "Revenue",
            AggregationKind::Sum,
        );
        let out = pivot(&sales(), &config);
        assert_eq!(out[1]["Q2"], CellValue::Null);
    }

    #[test]
    fn test_pivot_multi_column_labels() {
        let config = PivotConfig::new(
            vec!["Region".into()],
            vec!["Quarter".into(), "Rep".into()],
            "Revenue",
            AggregationKind::Max,
        );
        let out = pivot(&sales(), &config);
        assert_eq!(out[0]["Q1_Ann"], CellValue::Number(100.0));
        assert_eq!(out[1]["Q1_Cy"], CellValue::Number(30.0));
        assert_eq!(out[1]["Q1_Ann"], CellValue::Null);
    }

    #[test]
    fn test_pivot_label_matching_index_column_is_suffixed() {
        let rows = vec![
            row! { "Region" => "East", "Kind" => "Region", "v" => 5 },
            row! { "Region" => "West", "Kind" => "Region_", "v" => 7 },
        ];
        let config = PivotConfig::new(
            vec!["Region".into()],
            vec!["Kind".into()],
            "v",
            AggregationKind::Sum,
        );
        let out = pivot(&rows, &config);
        assert_eq!(
            out[0],
            row! { "Region" => "East", "Region__" => 5.0, "Region_" => CellValue::Null }
        );
        assert_eq!(out[1]["Region"], CellValue::from("West"));
        assert_eq!(out[1]["Region_"], CellValue::Number(7.0));
    }

    #[test]
    fn test_pivot_empty_input() {
        let config = PivotConfig::new(vec![], vec!["Quarter".into()], "Revenue", AggregationKind::Sum);
        assert!(pivot(&[], &config).is_empty());
    }
}
