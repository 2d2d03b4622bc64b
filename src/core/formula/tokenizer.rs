//! Formula tokenizer
//!
//! Converts formula strings like "=SUM(Revenue) / [Order Count]" into typed
//! tokens. This is the security gate for untrusted input: length, character,
//! function allow-list, nesting and complexity checks all happen here, before
//! anything is evaluated.

use serde::Serialize;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

use crate::core::limits::{MAX_FORMULA_COMPLEXITY, MAX_FORMULA_LENGTH, MAX_NESTING_DEPTH};

/// Functions a formula may call
pub const ALLOWED_FUNCTIONS: &[&str] = &["SUM", "AVG", "COUNT", "MIN", "MAX", "ABS", "ROUND", "SQRT"];

/// Characters rejected anywhere in a formula
pub const BLOCKED_CHARS: &[char] = &[';', '`', '\\', '$', '{', '}'];

/// Lexical class of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Number,
    Column,
    Operator,
    Function,
    Paren,
}

/// A token together with where it started in the source formula
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaToken {
    pub kind: TokenKind,
    pub value: String,
    /// Character offset (not byte offset) into the formula
    pub offset: usize,
}

impl FormulaToken {
    pub fn new(kind: TokenKind, value: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            offset,
        }
    }

    pub fn number(value: f64, offset: usize) -> Self {
        Self::new(TokenKind::Number, value.to_string(), offset)
    }

    pub fn is_paren(&self, paren: char) -> bool {
        self.kind == TokenKind::Paren && self.value.starts_with(paren)
    }
}

/// What went wrong while tokenizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizeErrorKind {
    Empty,
    TooLong,
    DisallowedCharacter,
    UnexpectedCharacter,
    InvalidNumber,
    UnknownFunction,
    UnclosedBracket,
    EmptyColumnReference,
    UnmatchedCloseParen,
    UnclosedParen,
    TooDeep,
    TooComplex,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("Tokenize error at position {position}: {message}")]
pub struct TokenizeError {
    pub kind: TokenizeErrorKind,
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(kind: TokenizeErrorKind, message: impl Into<String>, position: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
        }
    }

    pub fn is_paren_error(&self) -> bool {
        matches!(
            self.kind,
            TokenizeErrorKind::UnmatchedCloseParen | TokenizeErrorKind::UnclosedParen
        )
    }

    /// The formula on one line and a caret under the failing character
    pub fn caret_display(&self, formula: &str) -> String {
        let caret_at = self.position.min(formula.chars().count());
        format!("{}\n{}^ {}", formula, " ".repeat(caret_at), self.message)
    }
}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    /// Offset of the first character after a stripped `=` prefix
    base: usize,
    source: &'a str,
}

impl<'a> Tokenizer<'a> {
    pub fn new(formula: &'a str) -> Self {
        let (source, base) = match formula.strip_prefix('=') {
            Some(rest) => (rest, 1),
            None => (formula, 0),
        };
        Self {
            chars: source.chars().peekable(),
            position: base,
            base,
            source,
        }
    }

    /// Tokenize the whole formula and run the post-scan checks
    pub fn tokenize(mut self) -> Result<Vec<FormulaToken>, TokenizeError> {
        self.check_upfront()?;

        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        if tokens.is_empty() {
            return Err(TokenizeError::new(
                TokenizeErrorKind::Empty,
                "Formula is empty",
                self.base,
            ));
        }

        check_parentheses(&tokens, self.position)?;
        check_complexity(&tokens)?;
        Ok(tokens)
    }

    fn check_upfront(&self) -> Result<(), TokenizeError> {
        let length = self.base + self.source.chars().count();
        if length > MAX_FORMULA_LENGTH {
            return Err(TokenizeError::new(
                TokenizeErrorKind::TooLong,
                format!(
                    "Formula is {} characters long; the maximum is {}",
                    length, MAX_FORMULA_LENGTH
                ),
                MAX_FORMULA_LENGTH,
            ));
        }

        if let Some((i, c)) = self
            .source
            .chars()
            .enumerate()
            .find(|(_, c)| BLOCKED_CHARS.contains(c))
        {
            return Err(TokenizeError::new(
                TokenizeErrorKind::DisallowedCharacter,
                format!("Character '{}' is not allowed in formulas", c),
                self.base + i,
            ));
        }

        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<FormulaToken>, TokenizeError> {
        self.skip_whitespace();

        let start = self.position;
        let c = match self.peek() {
            None => return Ok(None),
            Some(c) => c,
        };

        let token = match c {
            '(' | ')' => {
                self.advance();
                FormulaToken::new(TokenKind::Paren, c.to_string(), start)
            }
            '+' | '-' | '*' | '/' | '%' => {
                self.advance();
                FormulaToken::new(TokenKind::Operator, c.to_string(), start)
            }
            '[' => self.read_bracket_column()?,
            c if c.is_ascii_digit() || c == '.' => self.read_number()?,
            c if c.is_alphabetic() || c == '_' => self.read_identifier()?,
            c => {
                return Err(TokenizeError::new(
                    TokenizeErrorKind::UnexpectedCharacter,
                    format!("Unexpected character: '{}'", c),
                    start,
                ));
            }
        };
        Ok(Some(token))
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.advance();
        }
    }

    /// Decimal literal: digits with at most one '.'
    fn read_number(&mut self) -> Result<FormulaToken, TokenizeError> {
        let start = self.position;
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                literal.push(c);
                self.advance();
            } else {
                break;
            }
        }

        match literal.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(FormulaToken::new(TokenKind::Number, literal, start)),
            _ => Err(TokenizeError::new(
                TokenizeErrorKind::InvalidNumber,
                format!("Invalid number: {}", literal),
                start,
            )),
        }
    }

    /// `[Column Name]`: anything up to the closing bracket
    fn read_bracket_column(&mut self) -> Result<FormulaToken, TokenizeError> {
        let start = self.position;
        self.advance(); // consume '['
        let mut name = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new(
                        TokenizeErrorKind::UnclosedBracket,
                        "Unclosed '[' in column reference",
                        start,
                    ));
                }
                Some(']') => break,
                Some(c) => name.push(c),
            }
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(TokenizeError::new(
                TokenizeErrorKind::EmptyColumnReference,
                "Empty column reference '[]'",
                start,
            ));
        }
        Ok(FormulaToken::new(TokenKind::Column, name, start))
    }

    /// Bare identifier: a function if directly followed by '(' and
    /// allow-listed, otherwise a column reference
    fn read_identifier(&mut self) -> Result<FormulaToken, TokenizeError> {
        let start = self.position;
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some('(') {
            let upper = ident.to_uppercase();
            if ALLOWED_FUNCTIONS.contains(&upper.as_str()) {
                return Ok(FormulaToken::new(TokenKind::Function, upper, start));
            }
            return Err(TokenizeError::new(
                TokenizeErrorKind::UnknownFunction,
                format!(
                    "Unknown function: {}. Allowed: {}",
                    ident,
                    ALLOWED_FUNCTIONS.join(", ")
                ),
                start,
            ));
        }

        Ok(FormulaToken::new(TokenKind::Column, ident, start))
    }
}

fn check_parentheses(tokens: &[FormulaToken], end: usize) -> Result<(), TokenizeError> {
    let mut open: Vec<usize> = Vec::new();

    for token in tokens {
        if token.is_paren('(') {
            open.push(token.offset);
            if open.len() > MAX_NESTING_DEPTH {
                return Err(TokenizeError::new(
                    TokenizeErrorKind::TooDeep,
                    format!(
                        "Parentheses nested deeper than {} levels",
                        MAX_NESTING_DEPTH
                    ),
                    token.offset,
                ));
            }
        } else if token.is_paren(')') && open.pop().is_none() {
            return Err(TokenizeError::new(
                TokenizeErrorKind::UnmatchedCloseParen,
                "Unbalanced parentheses: ')' has no matching '('",
                token.offset,
            ));
        }
    }

    match open.last() {
        Some(&offset) => Err(TokenizeError::new(
            TokenizeErrorKind::UnclosedParen,
            format!(
                "Unbalanced parentheses: '(' at position {} is never closed (formula ends at {})",
                offset, end
            ),
            offset,
        )),
        None => Ok(()),
    }
}

fn check_complexity(tokens: &[FormulaToken]) -> Result<(), TokenizeError> {
    let mut count = 0usize;
    for token in tokens {
        if matches!(token.kind, TokenKind::Operator | TokenKind::Function) {
            count += 1;
            if count > MAX_FORMULA_COMPLEXITY {
                return Err(TokenizeError::new(
                    TokenizeErrorKind::TooComplex,
                    format!(
                        "Formula too complex: more than {} operators and functions",
                        MAX_FORMULA_COMPLEXITY
                    ),
                    token.offset,
                ));
            }
        }
    }
    Ok(())
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<FormulaToken>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(formula: &str) -> Vec<(TokenKind, String)> {
        tokenize(formula)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.value))
            .collect()
    }

    fn err(formula: &str) -> TokenizeError {
        tokenize(formula).unwrap_err()
    }

    #[test]
    fn test_tokenize_decimal_number() {
        let tokens = tokenize("3.567").unwrap();
        assert_eq!(tokens, vec![FormulaToken::new(TokenKind::Number, "3.567", 0)]);
    }

    #[test]
    fn test_tokenize_leading_dot_number() {
        assert_eq!(kinds(".5"), vec![(TokenKind::Number, ".5".to_string())]);
    }

    #[test]
    fn test_tokenize_function_call() {
        assert_eq!(
            kinds("sum(Revenue)"),
            vec![
                (TokenKind::Function, "SUM".to_string()),
                (TokenKind::Paren, "(".to_string()),
                (TokenKind::Column, "Revenue".to_string()),
                (TokenKind::Paren, ")".to_string()),
            ]
        );
    }

    #[test]
    fn test_tokenize_bracket_column_with_spaces() {
        let tokens = tokenize("[Order Count] * 2").unwrap();
        assert_eq!(tokens[0], FormulaToken::new(TokenKind::Column, "Order Count", 0));
        assert_eq!(tokens[1], FormulaToken::new(TokenKind::Operator, "*", 14));
        assert_eq!(tokens[2], FormulaToken::new(TokenKind::Number, "2", 16));
    }

    #[test]
    fn test_tokenize_all_operators() {
        let ops: Vec<String> = tokenize("1 + 2 - 3 * 4 / 5 % 6")
            .unwrap()
            .into_iter()
            .filter(|t| t.kind == TokenKind::Operator)
            .map(|t| t.value)
            .collect();
        assert_eq!(ops, vec!["+", "-", "*", "/", "%"]);
    }

    #[test]
    fn test_identifier_not_followed_by_paren_is_column() {
        // "SUM" without a call is just a column called SUM
        assert_eq!(kinds("SUM + 1")[0], (TokenKind::Column, "SUM".to_string()));
        // whitespace before '(' does not make a call
        assert_eq!(kinds("ABS (1)")[0], (TokenKind::Column, "ABS".to_string()));
    }

    #[test]
    fn test_equals_prefix_offsets() {
        let tokens = tokenize("=a+b").unwrap();
        assert_eq!(tokens[0].offset, 1);
        assert_eq!(tokens[2].offset, 3);
    }

    #[test]
    fn test_blocked_characters_rejected() {
        for formula in ["1;2", "`ls`", "a\\b", "$x", "{1}", "a}"] {
            let e = err(formula);
            assert_eq!(e.kind, TokenizeErrorKind::DisallowedCharacter, "{}", formula);
        }
        assert_eq!(err("1 + 2; DROP").position, 5);
    }

    #[test]
    fn test_blocked_character_inside_brackets() {
        assert_eq!(
            err("[Price ($)]").kind,
            TokenizeErrorKind::DisallowedCharacter
        );
    }

    #[test]
    fn test_unclosed_paren() {
        let e = err("(1+2");
        assert_eq!(e.kind, TokenizeErrorKind::UnclosedParen);
        assert!(e.is_paren_error());
        assert_eq!(e.position, 0);
    }

    #[test]
    fn test_unmatched_close_paren() {
        let e = err("1+2)");
        assert_eq!(e.kind, TokenizeErrorKind::UnmatchedCloseParen);
        assert!(e.is_paren_error());
        assert_eq!(e.position, 3);
    }

    #[test]
    fn test_unknown_function() {
        let e = err("EVAL(1)");
        assert_eq!(e.kind, TokenizeErrorKind::UnknownFunction);
        assert!(e.message.contains("EVAL"));
    }

    #[test]
    fn test_unclosed_bracket() {
        let e = err("2 * [Revenue");
        assert_eq!(e.kind, TokenizeErrorKind::UnclosedBracket);
        assert_eq!(e.position, 4);
    }

    #[test]
    fn test_empty_bracket() {
        assert_eq!(err("[ ]").kind, TokenizeErrorKind::EmptyColumnReference);
    }

    #[test]
    fn test_invalid_number() {
        let e = err("1.2.3 + 1");
        assert_eq!(e.kind, TokenizeErrorKind::InvalidNumber);
        assert_eq!(e.position, 0);
    }

    #[test]
    fn test_unexpected_character() {
        let e = err("a @ b");
        assert_eq!(e.kind, TokenizeErrorKind::UnexpectedCharacter);
        assert_eq!(e.position, 2);
        // no commas: every allowed function takes one argument
        assert_eq!(err("ROUND(a, 2)").kind, TokenizeErrorKind::UnexpectedCharacter);
    }

    #[test]
    fn test_too_long() {
        let formula = "1+".repeat(MAX_FORMULA_LENGTH / 2) + "1";
        assert_eq!(err(&formula).kind, TokenizeErrorKind::TooLong);
    }

    #[test]
    fn test_too_complex() {
        let formula = vec!["1"; MAX_FORMULA_COMPLEXITY + 2].join("+");
        assert_eq!(err(&formula).kind, TokenizeErrorKind::TooComplex);
        let ok = vec!["1"; MAX_FORMULA_COMPLEXITY + 1].join("+");
        assert!(tokenize(&ok).is_ok());
    }

    #[test]
    fn test_too_deep() {
        let depth = MAX_NESTING_DEPTH + 1;
        let formula = format!("{}1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(err(&formula).kind, TokenizeErrorKind::TooDeep);
    }

    #[test]
    fn test_empty_formula() {
        assert_eq!(err("").kind, TokenizeErrorKind::Empty);
        assert_eq!(err("=   ").kind, TokenizeErrorKind::Empty);
    }

    #[test]
    fn test_caret_display() {
        let e = err("1+2)");
        let display = e.caret_display("1+2)");
        let lines: Vec<&str> = display.lines().collect();
        assert_eq!(lines[0], "1+2)");
        assert!(lines[1].starts_with("   ^"));
    }
}
