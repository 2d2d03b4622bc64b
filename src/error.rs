use thiserror::Error;

use crate::core::formula::evaluator::EvalError;
use crate::core::formula::tokenizer::TokenizeError;

pub type CalcResult<T> = Result<T, CalcError>;

#[derive(Error, Debug)]
pub enum CalcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Tokenize(#[from] TokenizeError),

    #[error("Column not found: {column}. Available: {}", format_available(.available))]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },

    #[error("{0}")]
    Eval(#[from] EvalError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CalcError {
    pub fn column_not_found(column: impl Into<String>, available: &[String]) -> Self {
        CalcError::ColumnNotFound {
            column: column.into(),
            available: available.to_vec(),
        }
    }

    /// Character offset into the formula, for errors that carry one
    pub fn offset(&self) -> Option<usize> {
        match self {
            CalcError::Tokenize(e) => Some(e.position),
            CalcError::Eval(e) => e.position(),
            _ => None,
        }
    }
}

fn format_available(available: &[String]) -> String {
    if available.is_empty() {
        "(none)".to_string()
    } else {
        available.join(", ")
    }
}
