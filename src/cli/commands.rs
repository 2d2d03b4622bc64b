use crate::core::aggregation::{aggregate_rows, AggregationConfig, AggregationKind};
use crate::core::breakdown::describe_calculation;
use crate::core::formula::resolver::resolve_column;
use crate::core::formula::{evaluate_formula, validate_formula, EvaluationMode};
use crate::core::group_by::{group_by, pivot as pivot_rows, GroupByConfig, PivotConfig};
use crate::dataset::{load_dataset, load_request};
use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, CellValue, Row};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

/// Format a number for display, removing unnecessary decimal places
fn format_number(n: f64) -> String {
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn format_cell(cell: Option<&CellValue>) -> String {
    match cell {
        None | Some(CellValue::Null) => "-".to_string(),
        Some(CellValue::Number(n)) => format_number(*n),
        Some(other) => other.to_string(),
    }
}

fn format_result(value: Option<f64>) -> String {
    value.map(format_number).unwrap_or_else(|| "null".to_string())
}

fn print_json<T: Serialize>(value: &T) -> CalcResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as an aligned table
fn print_rows(rows: &[Row]) {
    if rows.is_empty() {
        println!("   {}", "(no rows)".dimmed());
        return;
    }

    let columns = dataset_columns(rows);
    let widths: Vec<usize> = columns
        .iter()
        .map(|column| {
            rows.iter()
                .map(|r| format_cell(r.get(column)).chars().count())
                .chain(std::iter::once(column.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!("{:<width$}", c, width = *w))
        .collect();
    println!("   {}", header.join("  ").bold().cyan());

    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", format_cell(row.get(c)), width = *w))
            .collect();
        println!("   {}", cells.join("  "));
    }
}

fn resolve(reference: &str, columns: &[String]) -> CalcResult<String> {
    resolve_column(reference, columns)
        .map(str::to_string)
        .ok_or_else(|| CalcError::column_not_found(reference, columns))
}

fn resolve_all(references: &[String], columns: &[String]) -> CalcResult<Vec<String>> {
    references.iter().map(|r| resolve(r, columns)).collect()
}

/// Caret line under the failing character, for errors that carry an offset
fn format_formula_error(formula: &str, error: &CalcError) -> String {
    match error {
        CalcError::Tokenize(e) => e.caret_display(formula),
        other => match other.offset() {
            Some(offset) => {
                let caret_at = offset.min(formula.chars().count());
                format!("{}\n{}^ {}", formula, " ".repeat(caret_at), other)
            }
            None => other.to_string(),
        },
    }
}

/// Parse `kind:column` or `kind:column:alias`
fn parse_aggregation_spec(spec: &str, percentile: Option<f64>) -> CalcResult<AggregationConfig> {
    let parts: Vec<&str> = spec.splitn(3, ':').map(str::trim).collect();
    let (kind, column, alias) = match parts.as_slice() {
        [kind, column] if !column.is_empty() => (kind, column, None),
        [kind, column, alias] if !column.is_empty() => (kind, column, Some(*alias)),
        _ => {
            return Err(CalcError::Validation(format!(
                "Invalid aggregation '{}'. Expected kind:column, e.g. sum:Revenue",
                spec
            )))
        }
    };

    let mut config = AggregationConfig::new(*column, kind.parse::<AggregationKind>()?);
    config.percentile = percentile;
    if let Some(alias) = alias.filter(|a| !a.is_empty()) {
        config = config.with_alias(alias);
    }
    Ok(config)
}

/// Execute the process command
pub fn process(request: PathBuf, json: bool) -> CalcResult<()> {
    let loaded = load_request(&request)?;
    let processed = loaded.process()?;

    if json {
        return print_json(&processed);
    }

    println!("{}", "📊 Chart data".bold().green());
    println!("   Request: {}", request.display());
    println!("   Chart:   {}", processed.metadata.chart_type.bright_blue().bold());
    println!(
        "   Rows:    {} → {}",
        processed.metadata.original_row_count, processed.metadata.result_row_count
    );
    if let Some(kind) = processed.metadata.aggregation_kind {
        println!("   Aggregation: {}", kind.to_string().cyan());
    }
    if let Some(groups) = &processed.metadata.grouped_by {
        println!("   Grouped by:  {}", groups.join(", ").cyan());
    }
    if let Some(formula) = &processed.metadata.formula {
        println!("   Formula:     {}", formula.bright_yellow());
    }
    if let Some(derived) = &processed.metadata.derived_metrics_applied {
        println!("   Derived:     {}", derived.join(", ").cyan());
    }
    println!();
    print_rows(&processed.rows);
    Ok(())
}

/// Execute the explain command - show how a scorecard value is computed
pub fn explain(request: PathBuf, json: bool) -> CalcResult<()> {
    let loaded = load_request(&request)?;
    let breakdown = describe_calculation(loaded.rows(), &loaded.mapping)?;

    if json {
        return print_json(&breakdown);
    }

    println!("{}", "🔍 Calculation breakdown".bold().green());
    println!("   Expression: {}", breakdown.expression.bright_yellow());
    println!("   Result:     {}", format_result(breakdown.result).bold().green());
    println!("   Values:     {}", breakdown.value_count);
    for aggregate in &breakdown.aggregates {
        println!(
            "   {} = {}",
            aggregate.alias.bright_blue(),
            format_result(aggregate.value)
        );
    }
    println!();
    for (column, samples) in &breakdown.sample_values {
        let shown: Vec<String> = samples.iter().map(|v| format_number(*v)).collect();
        println!("   {} {}", column.cyan(), shown.join(", ").dimmed());
    }
    Ok(())
}

/// Execute the eval command
pub fn eval(
    data: PathBuf,
    formula: String,
    alias: String,
    mode: EvaluationMode,
    json: bool,
) -> CalcResult<()> {
    let rows = load_dataset(&data)?;
    let result = match evaluate_formula(&rows, &formula, &alias, mode) {
        Ok(result) => result,
        Err(e) => {
            if !json {
                eprintln!("{}", "❌ Formula failed".bold().red());
                eprintln!("{}", format_formula_error(&formula, &e));
            }
            return Err(e);
        }
    };

    if json {
        return print_json(&result);
    }

    println!("{}", "🧮 Formula".bold().green());
    println!("   {} = {}", alias.bright_blue().bold(), formula.bright_yellow());
    println!("   Mode: {}\n", mode.to_string().cyan());
    print_rows(&result);
    Ok(())
}

#[derive(Serialize)]
struct AggregateOutput {
    column: String,
    kind: AggregationKind,
    value: Option<f64>,
}

/// Execute the aggregate command
pub fn aggregate(
    data: PathBuf,
    column: String,
    kind: AggregationKind,
    percentile: Option<f64>,
    json: bool,
) -> CalcResult<()> {
    let rows = load_dataset(&data)?;
    let column = resolve(&column, &dataset_columns(&rows))?;
    let value = aggregate_rows(&rows, &column, kind, percentile);

    if json {
        return print_json(&AggregateOutput {
            column,
            kind,
            value,
        });
    }

    println!(
        "   {}({}) = {}",
        kind.as_str().to_uppercase().cyan(),
        column.bright_blue(),
        format_result(value).bold().green()
    );
    Ok(())
}

/// Execute the group command
pub fn group(
    data: PathBuf,
    by: Vec<String>,
    aggregations: Vec<String>,
    percentile: Option<f64>,
    keep_original: bool,
    json: bool,
) -> CalcResult<()> {
    let rows = load_dataset(&data)?;
    let columns = dataset_columns(&rows);

    let mut config = GroupByConfig::new(resolve_all(&by, &columns)?)
        .keep_original_columns(keep_original);
    for spec in &aggregations {
        let mut agg = parse_aggregation_spec(spec, percentile)?;
        agg.column = resolve(&agg.column, &columns)?;
        config = config.aggregate(agg);
    }

    let result = group_by(&rows, &config);
    if json {
        return print_json(&result);
    }

    println!("{}", "📦 Group by".bold().green());
    println!(
        "   {} rows → {} groups on {}\n",
        rows.len(),
        result.len(),
        config.group_columns.join(", ").cyan()
    );
    print_rows(&result);
    Ok(())
}

/// Execute the pivot command
pub fn pivot(
    data: PathBuf,
    index: Vec<String>,
    pivot_columns: Vec<String>,
    value: String,
    kind: AggregationKind,
    fill: Option<f64>,
    json: bool,
) -> CalcResult<()> {
    let rows = load_dataset(&data)?;
    let columns = dataset_columns(&rows);

    let mut config = PivotConfig::new(
        resolve_all(&index, &columns)?,
        resolve_all(&pivot_columns, &columns)?,
        resolve(&value, &columns)?,
        kind,
    );
    if let Some(fill) = fill {
        config = config.with_fill_value(fill);
    }

    let result = pivot_rows(&rows, &config);
    if json {
        return print_json(&result);
    }

    println!("{}", "🔀 Pivot".bold().green());
    println!(
        "   {}({}) by {} × {}\n",
        kind.as_str().to_uppercase(),
        config.value_column.bright_blue(),
        config.index_columns.join(", ").cyan(),
        config.pivot_columns.join(", ").cyan()
    );
    print_rows(&result);
    Ok(())
}

/// Execute the validate command
pub fn validate(formula: String, columns: Vec<String>, json: bool) -> CalcResult<()> {
    match validate_formula(&formula, &columns) {
        Ok(summary) => {
            if json {
                return print_json(&summary);
            }
            println!("{}", "✅ Formula is valid".bold().green());
            println!("   Formula: {}", formula.bright_yellow());
            println!("   Tokens:  {}", summary.tokens.len());
            if !summary.columns.is_empty() {
                println!("   Columns: {}", summary.columns.join(", ").cyan());
            }
            if !summary.aggregates.is_empty() {
                println!("   Aggregates: {}", summary.aggregates.join(", ").cyan());
            }
            println!("   RPN:     {}", summary.rpn.dimmed());
            Ok(())
        }
        Err(e) => {
            if !json {
                println!("{}", "❌ Formula is invalid".bold().red());
                println!("{}", format_formula_error(&formula, &e));
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(100.0), "100");
        assert_eq!(format_number(-2.75), "-2.75");
        assert_eq!(format_number(0.123456789), "0.123457");
        assert_eq!(format_number(1.0000001), "1");
    }

    #[test]
    fn test_format_cell() {
        assert_eq!(format_cell(None), "-");
        assert_eq!(format_cell(Some(&CellValue::Null)), "-");
        assert_eq!(format_cell(Some(&CellValue::Number(1.5))), "1.5");
        assert_eq!(format_cell(Some(&CellValue::from("East"))), "East");
    }

    #[test]
    fn test_parse_aggregation_spec() {
        let config = parse_aggregation_spec("avg:Revenue", None).unwrap();
        assert_eq!(config.kind, AggregationKind::Avg);
        assert_eq!(config.column, "Revenue");
        assert_eq!(config.alias, None);

        let config = parse_aggregation_spec("percentile:Latency:p90", Some(90.0)).unwrap();
        assert_eq!(config.kind, AggregationKind::Percentile);
        assert_eq!(config.alias.as_deref(), Some("p90"));
        assert_eq!(config.percentile, Some(90.0));
    }

    #[test]
    fn test_parse_aggregation_spec_invalid() {
        assert!(matches!(
            parse_aggregation_spec("Revenue", None),
            Err(CalcError::Validation(_))
        ));
        assert!(matches!(
            parse_aggregation_spec("sum:", None),
            Err(CalcError::Validation(_))
        ));
        assert!(parse_aggregation_spec("total_nonsense:Revenue", None).is_err());
    }

    #[test]
    fn test_format_formula_error_caret() {
        let columns = vec!["a".to_string()];
        let formula = "a + 1 / 0";
        let err = validate_formula("a; b", &columns).unwrap_err();
        assert_eq!(format_formula_error("a; b", &err).lines().nth(1), Some(" ^ Character ';' is not allowed in formulas"));

        let rows = vec![crate::row! { "a" => 1 }];
        let err = evaluate_formula(&rows, formula, "x", EvaluationMode::RowWise).unwrap_err();
        let shown = format_formula_error(formula, &err);
        assert!(shown.lines().nth(1).is_some_and(|l| l.starts_with("      ^")));
    }

    #[test]
    fn test_resolve_lists_available() {
        let columns = vec!["Revenue".to_string()];
        assert_eq!(resolve("revenue", &columns).unwrap(), "Revenue");
        assert_eq!(
            resolve("Profit", &columns).unwrap_err().to_string(),
            "Column not found: Profit. Available: Revenue"
        );
    }
}
