//! Formula Engine Tests
//!
//! Tokenizer rejection rules, column resolution and evaluation through the
//! public `chartcalc::core::formula` API.

use chartcalc::core::formula::tokenizer::{tokenize, TokenKind};
use chartcalc::core::formula::{
    evaluate_formula, validate_formula, CompiledFormula, EvalError, EvaluationMode,
    TokenizeErrorKind,
};
use chartcalc::{row, CalcError, CellValue, Row};

fn sales() -> Vec<Row> {
    vec![
        row! { "Region" => "East", "Revenue" => 10, "Order Count" => 2 },
        row! { "Region" => "West", "Revenue" => 20, "Order Count" => 4 },
        row! { "Region" => "East", "Revenue" => 30, "Order Count" => 5 },
    ]
}

fn tokenize_kind(formula: &str) -> TokenizeErrorKind {
    tokenize(formula).unwrap_err().kind
}

// ═══════════════════════════════════════════════════════════════════════════
// INPUT REJECTION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_blocked_characters_rejected() {
    for formula in ["1; 2", "`ls`", "a \\ b", "$Revenue", "{1}", "1}"] {
        let err = tokenize(formula).unwrap_err();
        assert_eq!(
            err.kind,
            TokenizeErrorKind::DisallowedCharacter,
            "expected {:?} to be rejected",
            formula
        );
    }
}

#[test]
fn test_blocked_character_position() {
    let err = tokenize("Revenue + $5").unwrap_err();
    assert_eq!(err.position, 10);
}

#[test]
fn test_unclosed_paren_is_paren_error() {
    let err = tokenize("(1+2").unwrap_err();
    assert_eq!(err.kind, TokenizeErrorKind::UnclosedParen);
    assert!(err.is_paren_error());
}

#[test]
fn test_unmatched_close_paren_is_paren_error() {
    let err = tokenize("1+2)").unwrap_err();
    assert_eq!(err.kind, TokenizeErrorKind::UnmatchedCloseParen);
    assert!(err.is_paren_error());
}

#[test]
fn test_unknown_function_rejected() {
    assert_eq!(tokenize_kind("EXEC(Revenue)"), TokenizeErrorKind::UnknownFunction);
}

#[test]
fn test_empty_formula_rejected() {
    assert_eq!(tokenize_kind("   "), TokenizeErrorKind::Empty);
}

#[test]
fn test_overlong_formula_rejected() {
    let formula = "1+".repeat(300) + "1";
    assert_eq!(tokenize_kind(&formula), TokenizeErrorKind::TooLong);
}

#[test]
fn test_deep_nesting_rejected() {
    let formula = format!("{}1{}", "(".repeat(11), ")".repeat(11));
    assert_eq!(tokenize_kind(&formula), TokenizeErrorKind::TooDeep);
}

#[test]
fn test_bracketed_column_token() {
    let tokens = tokenize("[Order Count] * 2").unwrap();
    assert_eq!(tokens[0].kind, TokenKind::Column);
    assert_eq!(tokens[0].value, "Order Count");
    assert_eq!(tokens.len(), 3);
}

// ═══════════════════════════════════════════════════════════════════════════
// EVALUATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_dataset_wise_sum() {
    let out = evaluate_formula(&sales(), "SUM(Revenue)", "total", EvaluationMode::DatasetWise)
        .unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0]["total"], CellValue::Number(60.0));
}

#[test]
fn test_dataset_wise_average_via_count() {
    let out = evaluate_formula(
        &sales(),
        "SUM(Revenue) / COUNT(Revenue)",
        "avg",
        EvaluationMode::DatasetWise,
    )
    .unwrap();
    assert_eq!(out[0]["avg"], CellValue::Number(20.0));
}

#[test]
fn test_row_wise_keeps_every_row() {
    let out =
        evaluate_formula(&sales(), "Revenue * 2", "double", EvaluationMode::RowWise).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[2]["double"], CellValue::Number(60.0));
    assert_eq!(out[2]["Region"], CellValue::from("East"));
}

#[test]
fn test_row_wise_mixes_rows_and_aggregates() {
    let out = evaluate_formula(
        &sales(),
        "Revenue / SUM(Revenue) * 100",
        "share",
        EvaluationMode::RowWise,
    )
    .unwrap();
    let shares: Vec<f64> = out
        .iter()
        .map(|r| match r["share"] {
            CellValue::Number(n) => n,
            _ => panic!("share should be numeric"),
        })
        .collect();
    let total: f64 = shares.iter().sum();
    assert!((total - 100.0).abs() < 1e-9);
}

#[test]
fn test_fuzzy_column_reference() {
    let out = evaluate_formula(&sales(), "order_count + 1", "n", EvaluationMode::RowWise).unwrap();
    assert_eq!(out[0]["n"], CellValue::Number(3.0));
}

#[test]
fn test_division_by_literal_zero_fails() {
    let err = evaluate_formula(&sales(), "Revenue / 0", "x", EvaluationMode::RowWise).unwrap_err();
    assert!(matches!(
        err,
        CalcError::Eval(EvalError::DivisionByZero { .. })
    ));
    assert!(err.offset().is_some());
}

#[test]
fn test_unknown_column_lists_available() {
    let err = evaluate_formula(&sales(), "Profit * 2", "x", EvaluationMode::RowWise).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Column not found: Profit"));
    assert!(message.contains("Revenue"));
}

#[test]
fn test_dataset_scalar_detection() {
    let scalar = CompiledFormula::compile("MAX(Revenue) - MIN(Revenue)", &sales()).unwrap();
    assert!(scalar.is_dataset_scalar());
    assert_eq!(scalar.evaluate_scalar().unwrap(), Some(20.0));

    let per_row = CompiledFormula::compile("Revenue - MIN(Revenue)", &sales()).unwrap();
    assert!(!per_row.is_dataset_scalar());
}

#[test]
fn test_scalar_functions() {
    let out = evaluate_formula(
        &sales(),
        "ROUND(SQRT(ABS(0 - SUM(Revenue) - 4)))",
        "x",
        EvaluationMode::DatasetWise,
    )
    .unwrap();
    assert_eq!(out[0]["x"], CellValue::Number(8.0));
}

// ═══════════════════════════════════════════════════════════════════════════
// VALIDATION
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_validate_reports_columns_and_aggregates() {
    let columns = vec!["Revenue".to_string(), "Order Count".to_string()];
    let summary = validate_formula("SUM(revenue) / [Order Count]", &columns).unwrap();
    assert_eq!(summary.columns, vec!["Revenue", "Order Count"]);
    assert_eq!(summary.aggregates, vec!["SUM_Revenue"]);
}

#[test]
fn test_validate_rejects_unknown_column() {
    let columns = vec!["Revenue".to_string()];
    let err = validate_formula("Cost * 2", &columns).unwrap_err();
    assert!(matches!(err, CalcError::ColumnNotFound { .. }));
}
