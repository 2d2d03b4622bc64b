//! Formula engine
//!
//! tokenize → resolve columns → extract aggregates → compile RPN → evaluate.
//! The pipeline depends on the aggregation engine; nothing in aggregation
//! knows about formulas.

pub mod evaluator;
pub mod extractor;
pub mod resolver;
pub mod tokenizer;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, CellValue, Row};
use evaluator::{EvalContext, RpnProgram};
use extractor::{extract_aggregates, rewrite_aggregates, ComputedAggregate};
use resolver::resolve_column;
use tokenizer::{tokenize, FormulaToken, TokenKind};

pub use evaluator::EvalError;
pub use tokenizer::{TokenizeError, TokenizeErrorKind};

/// Whether a formula yields one value per row or one value for the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    #[serde(alias = "row")]
    RowWise,
    #[serde(alias = "dataset")]
    DatasetWise,
}

impl fmt::Display for EvaluationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationMode::RowWise => f.write_str("row_wise"),
            EvaluationMode::DatasetWise => f.write_str("dataset_wise"),
        }
    }
}

impl FromStr for EvaluationMode {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "row" | "row_wise" | "rows" => Ok(EvaluationMode::RowWise),
            "dataset" | "dataset_wise" | "scalar" => Ok(EvaluationMode::DatasetWise),
            other => Err(CalcError::Validation(format!(
                "Unknown evaluation mode '{}'. Expected 'row' or 'dataset'",
                other
            ))),
        }
    }
}

/// A formula bound to one dataset: aggregates already computed, column
/// references already resolved, arithmetic compiled to RPN.
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    source: String,
    program: RpnProgram,
    aliases: HashMap<String, Option<f64>>,
    aggregates: Vec<ComputedAggregate>,
    row_columns: Vec<String>,
}

impl CompiledFormula {
    pub fn compile(formula: &str, rows: &[Row]) -> CalcResult<Self> {
        let tokens = tokenize(formula)?;
        let columns = dataset_columns(rows);
        let extracted = extract_aggregates(&tokens, rows, &columns)?;

        let mut row_columns: Vec<String> = Vec::new();
        let mut resolved = Vec::with_capacity(extracted.tokens.len());
        for token in extracted.tokens {
            // Null aggregates arrive as brace-wrapped alias keys, never as user columns
            if token.kind != TokenKind::Column || extracted.aliases.contains_key(&token.value) {
                resolved.push(token);
                continue;
            }
            let name = resolve_column(&token.value, &columns)
                .ok_or_else(|| CalcError::column_not_found(&token.value, &columns))?;
            if !row_columns.iter().any(|c| c == name) {
                row_columns.push(name.to_string());
            }
            resolved.push(FormulaToken::new(TokenKind::Column, name, token.offset));
        }

        let program = RpnProgram::compile(&resolved)?;
        debug!(formula, rpn = %program, "compiled formula");

        Ok(Self {
            source: formula.to_string(),
            program,
            aliases: extracted.aliases,
            aggregates: extracted.computed,
            row_columns,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn program(&self) -> &RpnProgram {
        &self.program
    }

    /// Aggregates computed over the dataset, in formula order
    pub fn aggregates(&self) -> &[ComputedAggregate] {
        &self.aggregates
    }

    /// Dataset columns referenced outside aggregate calls
    pub fn row_columns(&self) -> &[String] {
        &self.row_columns
    }

    /// True when the formula folds to a single dataset-wide value
    pub fn is_dataset_scalar(&self) -> bool {
        self.row_columns.is_empty()
    }

    pub fn evaluate_row(&self, row: &Row) -> CalcResult<Option<f64>> {
        let ctx = EvalContext::new().with_row(row).with_aliases(&self.aliases);
        Ok(self.program.evaluate(&ctx)?)
    }

    /// Evaluate without a row; bare column references are an error here
    pub fn evaluate_scalar(&self) -> CalcResult<Option<f64>> {
        let ctx = EvalContext::new().with_aliases(&self.aliases);
        Ok(self.program.evaluate(&ctx)?)
    }
}

/// Evaluate `formula` over `rows` and store the result under `alias`.
///
/// Row-wise: every row is returned with the alias column appended.
/// Dataset-wise: a single row holding only the alias.
pub fn evaluate_formula(
    rows: &[Row],
    formula: &str,
    alias: &str,
    mode: EvaluationMode,
) -> CalcResult<Vec<Row>> {
    let compiled = CompiledFormula::compile(formula, rows)?;

    match mode {
        EvaluationMode::DatasetWise => {
            let value = compiled.evaluate_scalar()?;
            let mut row = Row::new();
            row.insert(alias.to_string(), CellValue::from(value));
            Ok(vec![row])
        }
        EvaluationMode::RowWise => rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                let value = compiled.evaluate_row(row).inspect_err(|e| {
                    debug!(formula, row = index, error = %e, "row evaluation failed");
                })?;
                let mut out = row.clone();
                out.insert(alias.to_string(), CellValue::from(value));
                Ok(out)
            })
            .collect(),
    }
}

/// Static checks on a formula without evaluating it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaSummary {
    pub tokens: Vec<FormulaToken>,
    /// Resolved dataset columns the formula reads, in order of appearance
    pub columns: Vec<String>,
    /// Aggregate aliases (`SUM_Revenue`) the formula computes
    pub aggregates: Vec<String>,
    pub rpn: String,
}

/// Tokenize, resolve and compile `formula` against a column list.
///
/// Aggregates are replaced with placeholder literals, so this catches every
/// input-rejection, resolution and structural error without touching data.
pub fn validate_formula(formula: &str, columns: &[String]) -> CalcResult<FormulaSummary> {
    let tokens = tokenize(formula)?;
    let mut referenced: Vec<String> = Vec::new();
    let mut aggregates: Vec<String> = Vec::new();

    let rewritten = rewrite_aggregates(&tokens, |call| {
        let column = resolve_column(&call.column, columns)
            .ok_or_else(|| CalcError::column_not_found(&call.column, columns))?;
        note(column, &mut referenced);
        note(&format!("{}_{}", call.function, column), &mut aggregates);
        Ok(FormulaToken::number(1.0, call.offset))
    })?;

    let mut resolved = Vec::with_capacity(rewritten.len());
    for token in rewritten {
        if token.kind == TokenKind::Column {
            let column = resolve_column(&token.value, columns)
                .ok_or_else(|| CalcError::column_not_found(&token.value, columns))?;
            note(column, &mut referenced);
            resolved.push(FormulaToken::new(TokenKind::Column, column, token.offset));
        } else {
            resolved.push(token);
        }
    }

    let program = RpnProgram::compile(&resolved)?;

    Ok(FormulaSummary {
        tokens,
        columns: referenced,
        aggregates,
        rpn: program.to_string(),
    })
}

fn note(name: &str, list: &mut Vec<String>) {
    if !list.iter().any(|c| c == name) {
        list.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn sales() -> Vec<Row> {
        vec![
            row! { "Region" => "East", "Revenue" => 100, "Orders" => 4 },
            row! { "Region" => "East", "Revenue" => 50, "Orders" => 1 },
            row! { "Region" => "West", "Revenue" => 30, "Orders" => 0 },
        ]
    }

    #[test]
    fn test_dataset_wise_collapses_to_one_row() {
        let rows = evaluate_formula(
            &sales(),
            "SUM(Revenue)/COUNT(Revenue)",
            "avg_revenue",
            EvaluationMode::DatasetWise,
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["avg_revenue"], CellValue::Number(60.0));
    }

    #[test]
    fn test_row_wise_appends_column() {
        let rows = evaluate_formula(
            &sales(),
            "revenue * 2",
            "double",
            EvaluationMode::RowWise,
        )
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["double"], CellValue::Number(100.0));
        assert_eq!(rows[1]["Region"], CellValue::from("East"));
    }

    #[test]
    fn test_row_wise_share_of_total() {
        let rows = evaluate_formula(
            &sales(),
            "Revenue * 180 / SUM(Revenue)",
            "share",
            EvaluationMode::RowWise,
        )
        .unwrap();
        assert_eq!(rows[0]["share"], CellValue::Number(100.0));
    }

    #[test]
    fn test_column_named_like_aggregate_reads_dataset() {
        let rows = vec![
            row! { "Revenue" => "n/a", "MAX_Revenue" => 7 },
            row! { "Revenue" => "n/a", "MAX_Revenue" => 3 },
        ];
        let compiled = CompiledFormula::compile("MAX_Revenue + MAX(Revenue)", &rows).unwrap();
        assert_eq!(compiled.row_columns(), ["MAX_Revenue".to_string()]);
        assert!(!compiled.is_dataset_scalar());
        assert_eq!(compiled.aggregates()[0].alias, "MAX_Revenue");
        assert!(matches!(
            compiled.evaluate_scalar(),
            Err(CalcError::Eval(EvalError::UnresolvedColumn { .. }))
        ));

        let out = evaluate_formula(&rows, "max_revenue * 2", "x", EvaluationMode::RowWise).unwrap();
        assert_eq!(out[0]["x"], CellValue::Number(14.0));
    }

    #[test]
    fn test_row_wise_division_by_zero_fails() {
        let err = evaluate_formula(&sales(), "Revenue / Orders", "x", EvaluationMode::RowWise)
            .unwrap_err();
        assert!(matches!(err, CalcError::Eval(EvalError::DivisionByZero { .. })));
    }

    #[test]
    fn test_dataset_wise_with_bare_column_fails() {
        let err = evaluate_formula(&sales(), "Revenue + 1", "x", EvaluationMode::DatasetWise)
            .unwrap_err();
        assert!(matches!(err, CalcError::Eval(EvalError::UnresolvedColumn { .. })));
    }

    #[test]
    fn test_unknown_column_is_resolution_error() {
        let err = evaluate_formula(&sales(), "Profit * 2", "x", EvaluationMode::RowWise)
            .unwrap_err();
        assert!(matches!(err, CalcError::ColumnNotFound { .. }));
        assert!(err.to_string().starts_with("Column not found: Profit"));
    }

    #[test]
    fn test_compiled_formula_reports_shape() {
        let compiled = CompiledFormula::compile("SUM(Revenue) / [orders]", &sales()).unwrap();
        assert!(!compiled.is_dataset_scalar());
        assert_eq!(compiled.row_columns(), &["Orders".to_string()]);
        assert_eq!(compiled.aggregates().len(), 1);
        assert_eq!(compiled.program().to_string(), "180 [Orders] /");
    }

    #[test]
    fn test_validate_formula_summary() {
        let columns = vec!["Revenue".to_string(), "Order Count".to_string()];
        let summary = validate_formula("SUM(revenue) / [order_count]", &columns).unwrap();
        assert_eq!(summary.columns, vec!["Revenue", "Order Count"]);
        assert_eq!(summary.aggregates, vec!["SUM_Revenue"]);
        assert_eq!(summary.rpn, "1 [Order Count] /");
    }

    #[test]
    fn test_validate_formula_rejects_before_evaluation() {
        let columns = vec!["a".to_string()];
        assert!(matches!(
            validate_formula("a; DROP TABLE", &columns),
            Err(CalcError::Tokenize(_))
        ));
        assert!(matches!(
            validate_formula("a +", &columns),
            Err(CalcError::Eval(EvalError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("row".parse::<EvaluationMode>().unwrap(), EvaluationMode::RowWise);
        assert_eq!("Dataset-Wise".parse::<EvaluationMode>().unwrap(), EvaluationMode::DatasetWise);
        assert!("sideways".parse::<EvaluationMode>().is_err());
    }
}
