use chartcalc::cli;
use chartcalc::core::{AggregationKind, EvaluationMode};
use chartcalc::error::CalcResult;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chartcalc")]
#[command(about = "Sandboxed formulas, aggregation and chart data pipelines over tabular data")]
#[command(long_about = "chartcalc - Chart calculation engine

Evaluates user formulas safely, aggregates and groups rows, and produces the
exact row set each chart type needs.

COMMANDS:
  process   - Run a chart request (chart type + mapping + data)
  explain   - Show how a scorecard value is computed
  eval      - Evaluate a formula over a dataset
  aggregate - Aggregate one column
  group     - Group rows and aggregate each group
  pivot     - Reshape rows into a cross-tab
  validate  - Check a formula without evaluating it

DATA FILES:
  JSON or YAML arrays of objects, e.g. [{\"Region\": \"East\", \"Revenue\": 100}]

EXAMPLES:
  chartcalc process chart.yaml
  chartcalc eval sales.json -f \"SUM(Revenue) / COUNT(Revenue)\" --mode dataset
  chartcalc group sales.json --by Region --agg sum:Revenue --agg avg:Revenue
  chartcalc validate \"[Unit Price] * Qty\" --columns \"Unit Price,Qty\"")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Log engine decisions (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Run a chart request file.

REQUEST FORMAT (YAML or JSON):
  chartType: bar
  mapping:
    category: Region
    yAxis: Revenue
    aggregation: sum
    sortBy: Revenue
    sortOrder: desc
    limit: 5
  dataFile: sales.json      # or inline 'data: [...]'

CHART TYPES:
  scorecard, bar, column, line, area, scatter, pie, donut
  Any other type passes rows through unchanged.")]
    /// Run a chart request file
    Process {
        /// Path to the request file
        request: PathBuf,
    },

    /// Show the calculation behind a scorecard request
    Explain {
        /// Path to the request file
        request: PathBuf,
    },

    #[command(long_about = "Evaluate a formula over a dataset.

Aggregates (SUM, AVG, COUNT, MIN, MAX) are computed once over the whole
dataset. Bare column references are evaluated per row.

MODES:
  row      - append the result to every row (default)
  dataset  - collapse to a single row; bare columns are an error

EXAMPLES:
  chartcalc eval sales.json -f \"Revenue - Cost\" -a Profit
  chartcalc eval sales.json -f \"SUM(Revenue) / COUNT(Revenue)\" --mode dataset")]
    /// Evaluate a formula over a dataset
    Eval {
        /// Path to JSON or YAML data
        data: PathBuf,

        /// Formula, e.g. "SUM(Revenue) / [Order Count]"
        #[arg(short, long)]
        formula: String,

        /// Output column name
        #[arg(short, long, default_value = "result")]
        alias: String,

        /// row or dataset
        #[arg(short, long, default_value = "row")]
        mode: EvaluationMode,
    },

    /// Aggregate one column
    Aggregate {
        /// Path to JSON or YAML data
        data: PathBuf,

        /// Column to aggregate
        #[arg(short, long)]
        column: String,

        /// sum, avg, count, min, max, median, mode, std, variance,
        /// percentile, distinct, first, last
        #[arg(short, long, default_value = "sum")]
        kind: AggregationKind,

        /// Percentile for kind=percentile (0-100, default 50)
        #[arg(short, long)]
        percentile: Option<f64>,
    },

    /// Group rows and aggregate each group
    Group {
        /// Path to JSON or YAML data
        data: PathBuf,

        /// Group columns (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        by: Vec<String>,

        /// Aggregation as kind:column[:alias] (repeatable)
        #[arg(short, long = "agg")]
        aggregations: Vec<String>,

        /// Percentile for percentile aggregations
        #[arg(short, long)]
        percentile: Option<f64>,

        /// Carry the other columns of each group's first row
        #[arg(short, long)]
        keep_original: bool,
    },

    /// Reshape rows into a cross-tab
    Pivot {
        /// Path to JSON or YAML data
        data: PathBuf,

        /// Row index columns (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        index: Vec<String>,

        /// Columns whose values become output columns (comma-separated)
        #[arg(short, long, value_delimiter = ',', required = true)]
        columns: Vec<String>,

        /// Column to aggregate into each cell
        #[arg(long)]
        value: String,

        /// Aggregation for each cell
        #[arg(short, long, default_value = "sum")]
        kind: AggregationKind,

        /// Value for empty cells (default null)
        #[arg(long)]
        fill: Option<f64>,
    },

    /// Check a formula without evaluating it
    Validate {
        /// Formula to check
        formula: String,

        /// Available columns (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        columns: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "chartcalc=debug" } else { "chartcalc=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> CalcResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    match cli.command {
        Commands::Process { request } => cli::process(request, json),

        Commands::Explain { request } => cli::explain(request, json),

        Commands::Eval {
            data,
            formula,
            alias,
            mode,
        } => cli::eval(data, formula, alias, mode, json),

        Commands::Aggregate {
            data,
            column,
            kind,
            percentile,
        } => cli::aggregate(data, column, kind, percentile, json),

        Commands::Group {
            data,
            by,
            aggregations,
            percentile,
            keep_original,
        } => cli::group(data, by, aggregations, percentile, keep_original, json),

        Commands::Pivot {
            data,
            index,
            columns,
            value,
            kind,
            fill,
        } => cli::pivot(data, index, columns, value, kind, fill, json),

        Commands::Validate { formula, columns } => cli::validate(formula, columns, json),
    }
}
