//! Fixed ceilings that keep every engine call bounded in time and memory.

/// Longest formula accepted by the tokenizer (characters).
pub const MAX_FORMULA_LENGTH: usize = 500;

/// Maximum number of operators plus function calls in one formula.
pub const MAX_FORMULA_COMPLEXITY: usize = 50;

/// Maximum parenthesis nesting depth in one formula.
pub const MAX_NESTING_DEPTH: usize = 10;

/// Row ceiling for linear-scan aggregates (sum, avg, count, min, max, ...).
pub const MAX_ROWS_LINEAR: usize = 100_000;

/// Row ceiling for aggregates that sort or count frequencies
/// (median, mode, percentile).
pub const MAX_ROWS_SORTED: usize = 50_000;

/// Largest magnitude the numeric parser accepts from a text cell.
pub const MAX_NUMERIC_MAGNITUDE: f64 = 1e15;

/// Number of sample values carried in a calculation breakdown.
pub const BREAKDOWN_SAMPLE_SIZE: usize = 5;
