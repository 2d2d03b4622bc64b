//! Expression evaluator
//!
//! Shunting-Yard turns an aggregate-free token stream into an RPN program,
//! which is then evaluated with a value stack. A program compiles once and
//! runs against every row.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::tokenizer::{FormulaToken, TokenKind};
use crate::core::numeric::numeric_cell;
use crate::types::Row;

/// Aggregate functions must be extracted before evaluation
const AGGREGATE_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MIN", "MAX"];

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("Division by zero at position {position}")]
    DivisionByZero { position: usize },

    #[error("Modulo by zero at position {position}")]
    ModuloByZero { position: usize },

    #[error("Result of '{operation}' at position {position} is not a finite number")]
    NonFinite { operation: String, position: usize },

    #[error("Unresolved column '{name}' at position {position}")]
    UnresolvedColumn { name: String, position: usize },

    #[error("{name} at position {position} must wrap a single column, e.g. {name}(Revenue)")]
    MisplacedAggregate { name: String, position: usize },

    #[error("Malformed expression at position {position}: {message}")]
    Malformed { message: String, position: usize },
}

impl EvalError {
    fn malformed(message: impl Into<String>, position: usize) -> Self {
        EvalError::Malformed {
            message: message.into(),
            position,
        }
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            EvalError::DivisionByZero { position }
            | EvalError::ModuloByZero { position }
            | EvalError::NonFinite { position, .. }
            | EvalError::UnresolvedColumn { position, .. }
            | EvalError::MisplacedAggregate { position, .. }
            | EvalError::Malformed { position, .. } => Some(*position),
        }
    }
}

/// Values available to column tokens: the current row, and aggregate
/// results keyed by alias (`{SUM_Revenue}`). Aliases win over row columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalContext<'a> {
    pub row: Option<&'a Row>,
    pub aliases: Option<&'a HashMap<String, Option<f64>>>,
}

impl<'a> EvalContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(mut self, row: &'a Row) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_aliases(mut self, aliases: &'a HashMap<String, Option<f64>>) -> Self {
        self.aliases = Some(aliases);
        self
    }

    /// Missing or unparseable cells are null; a column with neither a row
    /// nor an alias to read from is an error.
    fn lookup(&self, name: &str, position: usize) -> Result<Option<f64>, EvalError> {
        if let Some(value) = self.aliases.and_then(|a| a.get(name)) {
            return Ok(*value);
        }
        match self.row {
            Some(row) => Ok(numeric_cell(row, name)),
            None => Err(EvalError::UnresolvedColumn {
                name: name.to_string(),
                position,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunction {
    Abs,
    Round,
    Sqrt,
}

impl ScalarFunction {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ABS" => Some(ScalarFunction::Abs),
            "ROUND" => Some(ScalarFunction::Round),
            "SQRT" => Some(ScalarFunction::Sqrt),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ScalarFunction::Abs => "ABS",
            ScalarFunction::Round => "ROUND",
            ScalarFunction::Sqrt => "SQRT",
        }
    }

    fn apply(self, value: f64) -> f64 {
        match self {
            ScalarFunction::Abs => value.abs(),
            ScalarFunction::Round => value.round(),
            // negative input yields NaN, caught by the finiteness check
            ScalarFunction::Sqrt => value.sqrt(),
        }
    }
}

/// One step of an RPN program
#[derive(Debug, Clone, PartialEq)]
pub enum RpnItem {
    Number(f64),
    Column { name: String, offset: usize },
    Binary { op: char, offset: usize },
    Negate { offset: usize },
    Function { function: ScalarFunction, offset: usize },
}

impl fmt::Display for RpnItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpnItem::Number(n) => write!(f, "{}", n),
            RpnItem::Column { name, .. } => write!(f, "[{}]", name),
            RpnItem::Binary { op, .. } => write!(f, "{}", op),
            RpnItem::Negate { .. } => f.write_str("NEG"),
            RpnItem::Function { function, .. } => f.write_str(function.name()),
        }
    }
}

/// Operator stack entries used while converting to RPN
enum Pending {
    Binary { op: char, offset: usize },
    Negate { offset: usize },
    Function { function: ScalarFunction, offset: usize },
    OpenParen { offset: usize },
}

impl Pending {
    fn precedence(&self) -> Option<u8> {
        match self {
            Pending::Binary { op, .. } => Some(binary_precedence(*op)),
            Pending::Negate { .. } => Some(3),
            _ => None,
        }
    }

    fn into_item(self) -> Option<RpnItem> {
        match self {
            Pending::Binary { op, offset } => Some(RpnItem::Binary { op, offset }),
            Pending::Negate { offset } => Some(RpnItem::Negate { offset }),
            Pending::Function { function, offset } => Some(RpnItem::Function { function, offset }),
            Pending::OpenParen { .. } => None,
        }
    }
}

fn binary_precedence(op: char) -> u8 {
    match op {
        '*' | '/' | '%' => 2,
        _ => 1,
    }
}

/// A compiled formula in reverse Polish notation
#[derive(Debug, Clone, PartialEq)]
pub struct RpnProgram {
    items: Vec<RpnItem>,
}

impl RpnProgram {
    /// Shunting-Yard over an aggregate-free token stream
    pub fn compile(tokens: &[FormulaToken]) -> Result<Self, EvalError> {
        let mut output: Vec<RpnItem> = Vec::with_capacity(tokens.len());
        let mut pending: Vec<Pending> = Vec::new();
        let mut expect_operand = true;

        for (i, token) in tokens.iter().enumerate() {
            let offset = token.offset;
            match token.kind {
                TokenKind::Number => {
                    require_operand_slot(expect_operand, token)?;
                    let value: f64 = token.value.parse().map_err(|_| {
                        EvalError::malformed(format!("Invalid number '{}'", token.value), offset)
                    })?;
                    output.push(RpnItem::Number(value));
                    expect_operand = false;
                }
                TokenKind::Column => {
                    require_operand_slot(expect_operand, token)?;
                    output.push(RpnItem::Column {
                        name: token.value.clone(),
                        offset,
                    });
                    expect_operand = false;
                }
                TokenKind::Function => {
                    require_operand_slot(expect_operand, token)?;
                    let name = token.value.to_uppercase();
                    if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                        return Err(EvalError::MisplacedAggregate {
                            name,
                            position: offset,
                        });
                    }
                    let function = ScalarFunction::from_name(&name).ok_or_else(|| {
                        EvalError::malformed(format!("Unknown function '{}'", name), offset)
                    })?;
                    if !tokens.get(i + 1).is_some_and(|next| next.is_paren('(')) {
                        return Err(EvalError::malformed(
                            format!("{} must be followed by '('", name),
                            offset,
                        ));
                    }
                    pending.push(Pending::Function { function, offset });
                }
                TokenKind::Operator => {
                    let op = operator_char(token)?;
                    if expect_operand {
                        match op {
                            '-' => pending.push(Pending::Negate { offset }),
                            '+' => {}
                            _ => {
                                return Err(EvalError::malformed(
                                    format!("Operator '{}' is missing its left operand", op),
                                    offset,
                                ))
                            }
                        }
                        continue;
                    }
                    let precedence = binary_precedence(op);
                    while pending
                        .last()
                        .and_then(Pending::precedence)
                        .is_some_and(|top| top >= precedence)
                    {
                        if let Some(item) = pending.pop().and_then(Pending::into_item) {
                            output.push(item);
                        }
                    }
                    pending.push(Pending::Binary { op, offset });
                    expect_operand = true;
                }
                TokenKind::Paren if token.is_paren('(') => {
                    if !expect_operand {
                        return Err(EvalError::malformed("Missing operator before '('", offset));
                    }
                    pending.push(Pending::OpenParen { offset });
                    expect_operand = true;
                }
                TokenKind::Paren => {
                    if expect_operand {
                        return Err(EvalError::malformed("Missing operand before ')'", offset));
                    }
                    loop {
                        match pending.pop() {
                            Some(Pending::OpenParen { .. }) => break,
                            Some(entry) => output.extend(entry.into_item()),
                            None => {
                                return Err(EvalError::malformed(
                                    "Unbalanced parentheses: ')' has no matching '('",
                                    offset,
                                ))
                            }
                        }
                    }
                    if matches!(pending.last(), Some(Pending::Function { .. })) {
                        output.extend(pending.pop().and_then(Pending::into_item));
                    }
                    expect_operand = false;
                }
            }
        }

        let end = tokens.last().map(|t| t.offset).unwrap_or(0);
        if expect_operand {
            return Err(EvalError::malformed("Expression is incomplete", end));
        }

        while let Some(entry) = pending.pop() {
            match entry {
                Pending::OpenParen { offset } => {
                    return Err(EvalError::malformed(
                        "Unbalanced parentheses: '(' is never closed",
                        offset,
                    ))
                }
                other => output.extend(other.into_item()),
            }
        }

        Ok(Self { items: output })
    }

    pub fn items(&self) -> &[RpnItem] {
        &self.items
    }

    /// Column names the program reads
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            RpnItem::Column { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Run the program. A null operand anywhere makes the result null.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Option<f64>, EvalError> {
        let mut stack: Vec<Option<f64>> = Vec::with_capacity(self.items.len());

        for item in &self.items {
            let value = match item {
                RpnItem::Number(n) => Some(*n),
                RpnItem::Column { name, offset } => ctx.lookup(name, *offset)?,
                RpnItem::Binary { op, offset } => {
                    let right = pop(&mut stack, *offset)?;
                    let left = pop(&mut stack, *offset)?;
                    match (left, right) {
                        (Some(l), Some(r)) => Some(apply_binary(*op, l, r, *offset)?),
                        _ => None,
                    }
                }
                RpnItem::Negate { offset } => pop(&mut stack, *offset)?.map(|v| -v),
                RpnItem::Function { function, offset } => match pop(&mut stack, *offset)? {
                    Some(v) => Some(check_finite(function.apply(v), function.name(), *offset)?),
                    None => None,
                },
            };
            stack.push(value);
        }

        match stack.as_slice() {
            [result] => Ok(*result),
            [] => Err(EvalError::malformed("Expression produced no value", 0)),
            values => Err(EvalError::malformed(
                format!("{} values left without an operator", values.len()),
                0,
            )),
        }
    }
}

impl fmt::Display for RpnProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.items.iter().map(|i| i.to_string()).collect();
        f.write_str(&parts.join(" "))
    }
}

fn require_operand_slot(expect_operand: bool, token: &FormulaToken) -> Result<(), EvalError> {
    if expect_operand {
        Ok(())
    } else {
        Err(EvalError::malformed(
            format!("Missing operator before '{}'", token.value),
            token.offset,
        ))
    }
}

fn operator_char(token: &FormulaToken) -> Result<char, EvalError> {
    match token.value.as_str() {
        "+" => Ok('+'),
        "-" => Ok('-'),
        "*" => Ok('*'),
        "/" => Ok('/'),
        "%" => Ok('%'),
        other => Err(EvalError::malformed(
            format!("Unknown operator '{}'", other),
            token.offset,
        )),
    }
}

fn pop(stack: &mut Vec<Option<f64>>, offset: usize) -> Result<Option<f64>, EvalError> {
    stack
        .pop()
        .ok_or_else(|| EvalError::malformed("Operator is missing an operand", offset))
}

fn apply_binary(op: char, left: f64, right: f64, offset: usize) -> Result<f64, EvalError> {
    let result = match op {
        '+' => left + right,
        '-' => left - right,
        '*' => left * right,
        '/' => {
            if right == 0.0 {
                return Err(EvalError::DivisionByZero { position: offset });
            }
            left / right
        }
        '%' => {
            if right == 0.0 {
                return Err(EvalError::ModuloByZero { position: offset });
            }
            left % right
        }
        other => {
            return Err(EvalError::malformed(
                format!("Unknown operator '{}'", other),
                offset,
            ))
        }
    };
    check_finite(result, &op.to_string(), offset)
}

fn check_finite(value: f64, operation: &str, offset: usize) -> Result<f64, EvalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(EvalError::NonFinite {
            operation: operation.to_string(),
            position: offset,
        })
    }
}

/// Compile and evaluate in one step
pub fn evaluate_tokens(tokens: &[FormulaToken], ctx: &EvalContext<'_>) -> Result<Option<f64>, EvalError> {
    RpnProgram::compile(tokens)?.evaluate(ctx)
}
