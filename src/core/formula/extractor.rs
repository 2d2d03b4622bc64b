//! Aggregate extraction
//!
//! `SUM(Revenue)` style calls are computed once over the whole dataset and
//! replaced by literals, so the evaluator only ever sees plain arithmetic.

use serde::Serialize;
use std::collections::HashMap;

use super::resolver::resolve_column;
use super::tokenizer::{FormulaToken, TokenKind};
use crate::core::aggregation::{aggregate_rows, AggregationKind};
use crate::error::{CalcError, CalcResult};
use crate::types::Row;

/// A `FUNCTION ( COLUMN )` span found in a token stream
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub function: String,
    pub kind: AggregationKind,
    pub column: String,
    pub offset: usize,
}

/// An aggregate computed during extraction, kept for calculation display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedAggregate {
    pub alias: String,
    pub function: String,
    pub column: String,
    pub value: Option<f64>,
}

/// Token stream with every aggregate call substituted
#[derive(Debug, Clone, Default)]
pub struct ExtractedAggregates {
    pub tokens: Vec<FormulaToken>,
    pub aliases: HashMap<String, Option<f64>>,
    pub computed: Vec<ComputedAggregate>,
}

fn formula_aggregate(name: &str) -> Option<AggregationKind> {
    match name {
        "SUM" => Some(AggregationKind::Sum),
        "AVG" => Some(AggregationKind::Avg),
        "COUNT" => Some(AggregationKind::Count),
        "MIN" => Some(AggregationKind::Min),
        "MAX" => Some(AggregationKind::Max),
        _ => None,
    }
}

fn match_call(tokens: &[FormulaToken]) -> Option<AggregateCall> {
    match tokens {
        [func, open, column, close, ..]
            if func.kind == TokenKind::Function
                && open.is_paren('(')
                && column.kind == TokenKind::Column
                && close.is_paren(')') =>
        {
            let kind = formula_aggregate(&func.value.to_uppercase())?;
            Some(AggregateCall {
                function: func.value.to_uppercase(),
                kind,
                column: column.value.clone(),
                offset: func.offset,
            })
        }
        _ => None,
    }
}

/// Replace every aggregate call span with the single token `substitute`
/// returns for it. Tokens outside such spans are copied unchanged.
pub fn rewrite_aggregates<F>(tokens: &[FormulaToken], mut substitute: F) -> CalcResult<Vec<FormulaToken>>
where
    F: FnMut(&AggregateCall) -> CalcResult<FormulaToken>,
{
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match match_call(&tokens[i..]) {
            Some(call) => {
                out.push(substitute(&call)?);
                i += 4;
            }
            None => {
                out.push(tokens[i].clone());
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Key an aggregate alias is stored under in [`ExtractedAggregates::aliases`].
/// Braces are blocked in formulas, so no column reference can produce it.
pub fn alias_key(alias: &str) -> String {
    format!("{{{alias}}}")
}

/// Compute each aggregate call once over `rows` and substitute it.
///
/// A non-null result becomes a number literal. A null result (no numeric
/// values) becomes a column token naming [`alias_key`], which the alias map
/// resolves to null so the formula result is null instead of an error.
pub fn extract_aggregates(
    tokens: &[FormulaToken],
    rows: &[Row],
    columns: &[String],
) -> CalcResult<ExtractedAggregates> {
    let mut aliases: HashMap<String, Option<f64>> = HashMap::new();
    let mut computed: Vec<ComputedAggregate> = Vec::new();

    let tokens = rewrite_aggregates(tokens, |call| {
        let column = resolve_column(&call.column, columns)
            .ok_or_else(|| CalcError::column_not_found(&call.column, columns))?;
        let alias = format!("{}_{}", call.function, column);
        let key = alias_key(&alias);

        let value = match aliases.get(&key).copied() {
            Some(value) => value,
            None => {
                let value = aggregate_rows(rows, column, call.kind, None);
                aliases.insert(key.clone(), value);
                computed.push(ComputedAggregate {
                    alias,
                    function: call.function.clone(),
                    column: column.to_string(),
                    value,
                });
                value
            }
        };

        Ok(match value {
            Some(v) => FormulaToken::number(v, call.offset),
            None => FormulaToken::new(TokenKind::Column, key, call.offset),
        })
    })?;

    Ok(ExtractedAggregates {
        tokens,
        aliases,
        computed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::formula::tokenizer::tokenize;
    use crate::row;
    use crate::types::dataset_columns;

    fn sales() -> Vec<Row> {
        vec![
            row! { "Region" => "East", "Revenue" => 100, "Note" => "x" },
            row! { "Region" => "East", "Revenue" => 50, "Note" => "y" },
            row! { "Region" => "West", "Revenue" => 30, "Note" => "z" },
        ]
    }

    fn values(tokens: &[FormulaToken]) -> Vec<String> {
        tokens.iter().map(|t| t.value.clone()).collect()
    }

    #[test]
    fn test_substitutes_literals() {
        let rows = sales();
        let tokens = tokenize("SUM(Revenue) / COUNT(revenue)").unwrap();
        let extracted = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap();
        assert_eq!(values(&extracted.tokens), vec!["180", "/", "3"]);
        assert_eq!(extracted.tokens[0].kind, TokenKind::Number);
        assert_eq!(extracted.aliases["{SUM_Revenue}"], Some(180.0));
        assert_eq!(extracted.aliases["{COUNT_Revenue}"], Some(3.0));
    }

    #[test]
    fn test_same_aggregate_computed_once() {
        let rows = sales();
        let tokens = tokenize("SUM(Revenue) + SUM([Revenue]) * 2").unwrap();
        let extracted = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap();
        assert_eq!(extracted.computed.len(), 1);
        assert_eq!(values(&extracted.tokens), vec!["180", "+", "180", "*", "2"]);
    }

    #[test]
    fn test_null_aggregate_becomes_alias_column() {
        let rows = sales();
        let tokens = tokenize("AVG(Note) + 1").unwrap();
        let extracted = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap();
        assert_eq!(extracted.tokens[0].kind, TokenKind::Column);
        assert_eq!(extracted.tokens[0].value, "{AVG_Note}");
        assert_eq!(extracted.aliases["{AVG_Note}"], None);
        assert_eq!(extracted.computed[0].alias, "AVG_Note");
    }

    #[test]
    fn test_unknown_column_lists_available() {
        let rows = sales();
        let tokens = tokenize("SUM(Profit)").unwrap();
        let err = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Column not found: Profit. Available: Note, Region, Revenue"
        );
    }

    #[test]
    fn test_non_aggregate_calls_untouched() {
        let rows = sales();
        let tokens = tokenize("ABS(Revenue) + SUM(1 + Revenue)").unwrap();
        let extracted = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap();
        assert_eq!(extracted.tokens.len(), tokens.len());
        assert!(extracted.computed.is_empty());
    }

    #[test]
    fn test_offsets_preserved() {
        let rows = sales();
        let tokens = tokenize("1 + MAX(Revenue)").unwrap();
        let extracted = extract_aggregates(&tokens, &rows, &dataset_columns(&rows)).unwrap();
        assert_eq!(extracted.tokens[2], FormulaToken::new(TokenKind::Number, "100", 4));
    }
}
