//! chartcalc API Server binary
//!
//! HTTP REST API for chart data processing, formula evaluation and
//! aggregation.

use clap::Parser;
use chartcalc::api::{run_api_server, ApiConfig};

#[derive(Parser, Debug)]
#[command(name = "chartcalc-server")]
#[command(version)]
#[command(about = "chartcalc API Server - HTTP REST API for chart calculations")]
#[command(long_about = r#"
chartcalc API Server - HTTP REST API

Endpoints:
  - POST /api/v1/process           - Chart rows from chart type + mapping + data
  - POST /api/v1/explain           - Scorecard calculation breakdown
  - POST /api/v1/formula/validate  - Check a formula against columns
  - POST /api/v1/formula/evaluate  - Evaluate a formula over rows
  - POST /api/v1/aggregate         - Aggregate one column

Additional endpoints:
  - GET  /health                   - Health check
  - GET  /version                  - Server version info
  - GET  /                         - API documentation

Features:
  - CORS enabled for cross-origin requests
  - Graceful shutdown on SIGINT/SIGTERM
  - JSON response envelope with request IDs
  - Request tracing (RUST_LOG)

Example usage:
  chartcalc-server                           # Start on localhost:8080
  chartcalc-server --host 0.0.0.0 --port 3000

  curl -X POST http://localhost:8080/api/v1/aggregate \
    -H "Content-Type: application/json" \
    -d '{"data": [{"Revenue": 100}, {"Revenue": 50}], "column": "Revenue", "kind": "avg"}'
"#)]
struct Args {
    /// Host address to bind to (use 0.0.0.0 for all interfaces)
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "CHARTCALC_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8080", env = "CHARTCALC_PORT")]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ApiConfig {
        host: args.host,
        port: args.port,
    };

    run_api_server(config).await
}
