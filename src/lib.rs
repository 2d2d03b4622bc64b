//! chartcalc - formula evaluation and chart data pipelines over tabular data
//!
//! This library safely evaluates user-authored formulas over rows, computes
//! aggregates, groups and pivots, appends derived metrics, and shapes rows
//! for each chart type.
//!
//! # Features
//!
//! - Sandboxed formulas: `SUM(Revenue) / [Order Count]`, with length,
//!   character, function, nesting and complexity limits
//! - Fuzzy column resolution (case, spaces, underscores)
//! - 13 aggregations including median, mode, percentile and variance
//! - Group-by, pivot and derived metrics (growth, moving average, YoY)
//! - Per-chart pipelines with calculation metadata
//!
//! # Example
//!
//! ```
//! use chartcalc::core::{process_chart_data, ChartDataMapping, ChartType};
//! use chartcalc::row;
//!
//! let rows = vec![
//!     row! { "Region" => "East", "Revenue" => 100 },
//!     row! { "Region" => "East", "Revenue" => 50 },
//!     row! { "Region" => "West", "Revenue" => 30 },
//! ];
//! let mapping = ChartDataMapping {
//!     category: vec!["Region".into()],
//!     y_axis: vec!["Revenue".into()],
//!     ..Default::default()
//! };
//!
//! let chart = process_chart_data(&rows, &ChartType::Bar, &mapping)?;
//! assert_eq!(chart.rows.len(), 2);
//! # Ok::<(), chartcalc::error::CalcError>(())
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod dataset;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use dataset::{load_dataset, load_request, ChartRequest};
pub use error::{CalcError, CalcResult};
pub use types::{CellValue, Dataset, Row};
