//! API request handlers
//!
//! Every endpoint answers with an [`ApiResponse`] envelope. Engine failures
//! (bad formula, unknown column, division by zero) are 422s carrying the
//! engine's message.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::core::aggregation::{aggregate_rows, AggregationKind};
use crate::core::breakdown::{describe_calculation, CalculationBreakdown};
use crate::core::chart::{ChartDataMapping, ProcessedChartData};
use crate::core::formula::resolver::resolve_column;
use crate::core::formula::{self, EvaluationMode, FormulaSummary};
use crate::dataset::ChartRequest;
use crate::error::{CalcError, CalcResult};
use crate::types::{dataset_columns, Dataset};

use super::server::AppState;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            request_id: Uuid::new_v4().to_string(),
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            request_id: Uuid::new_v4().to_string(),
            data: None,
            error: Some(message.into()),
        }
    }
}

pub type ApiReply<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_for(error: &CalcError) -> StatusCode {
    match error {
        CalcError::Io(_) | CalcError::Yaml(_) | CalcError::Json(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

fn reply<T: Serialize>(endpoint: &str, result: CalcResult<T>) -> ApiReply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => {
            warn!(endpoint, error = %e, "request failed");
            (status_for(&e), Json(ApiResponse::err(e.to_string())))
        }
    }
}

/// Root endpoint response
#[derive(Serialize)]
pub struct RootResponse {
    pub name: String,
    pub version: String,
    pub description: String,
    pub endpoints: Vec<EndpointInfo>,
}

#[derive(Serialize)]
pub struct EndpointInfo {
    pub path: &'static str,
    pub method: &'static str,
    pub description: &'static str,
}

const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("/health", "GET", "Health check endpoint"),
    ("/version", "GET", "Get server version"),
    ("/api/v1/process", "POST", "Compute chart rows from a chart type, mapping and data"),
    ("/api/v1/explain", "POST", "Describe a scorecard calculation"),
    ("/api/v1/formula/validate", "POST", "Check a formula against a column list"),
    ("/api/v1/formula/evaluate", "POST", "Evaluate a formula over rows"),
    ("/api/v1/aggregate", "POST", "Aggregate one column"),
];

/// GET / - Root info
pub async fn root(State(state): State<Arc<AppState>>) -> Json<ApiResponse<RootResponse>> {
    Json(ApiResponse::ok(RootResponse {
        name: "chartcalc API Server".to_string(),
        version: state.version.clone(),
        description: "Formula evaluation, aggregation and chart data pipelines".to_string(),
        endpoints: ENDPOINTS
            .iter()
            .map(|&(path, method, description)| EndpointInfo {
                path,
                method,
                description,
            })
            .collect(),
    }))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /health - Health check
pub async fn health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "healthy".to_string(),
    }))
}

/// Version response
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub chart_types: Vec<&'static str>,
    pub aggregations: Vec<&'static str>,
}

/// GET /version - Server version
pub async fn version(State(state): State<Arc<AppState>>) -> Json<ApiResponse<VersionResponse>> {
    Json(ApiResponse::ok(VersionResponse {
        version: state.version.clone(),
        chart_types: vec![
            "scorecard", "bar", "column", "line", "area", "scatter", "pie", "donut",
        ],
        aggregations: AggregationKind::ALL.iter().map(|k| k.as_str()).collect(),
    }))
}

/// POST /api/v1/process - Compute chart rows.
///
/// Rows must be sent inline; `dataFile` would let a client read server files.
pub async fn process(Json(req): Json<ChartRequest>) -> ApiReply<ProcessedChartData> {
    let result = if req.data_file.is_some() {
        Err(CalcError::Validation(
            "dataFile is not accepted over HTTP; send rows in 'data'".to_string(),
        ))
    } else {
        req.process()
    };
    reply("process", result)
}

/// Explain request
#[derive(Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub data: Dataset,
    pub mapping: ChartDataMapping,
}

/// POST /api/v1/explain - Scorecard calculation breakdown
pub async fn explain(Json(req): Json<ExplainRequest>) -> ApiReply<CalculationBreakdown> {
    reply("explain", describe_calculation(&req.data, &req.mapping))
}

/// Formula validation request. Columns come from `columns`, or from the
/// keys of `data` when given.
#[derive(Deserialize)]
pub struct ValidateFormulaRequest {
    pub formula: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub data: Option<Dataset>,
}

/// Where and why a formula was rejected
#[derive(Debug, Serialize)]
pub struct FormulaIssue {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

/// Validation outcome. An invalid formula is a successful request.
#[derive(Debug, Serialize)]
pub struct ValidateFormulaResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<FormulaSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<FormulaIssue>,
}

/// POST /api/v1/formula/validate - Check a formula
pub async fn validate_formula(
    Json(req): Json<ValidateFormulaRequest>,
) -> ApiReply<ValidateFormulaResponse> {
    let columns = match &req.data {
        Some(rows) => dataset_columns(rows),
        None => req.columns,
    };

    let response = match formula::validate_formula(&req.formula, &columns) {
        Ok(summary) => ValidateFormulaResponse {
            valid: true,
            summary: Some(summary),
            issue: None,
        },
        Err(e) => ValidateFormulaResponse {
            valid: false,
            summary: None,
            issue: Some(FormulaIssue {
                message: e.to_string(),
                offset: e.offset(),
            }),
        },
    };
    reply("formula/validate", Ok(response))
}

/// Formula evaluation request
#[derive(Deserialize)]
pub struct EvaluateFormulaRequest {
    pub data: Dataset,
    pub formula: String,
    #[serde(default = "default_alias")]
    pub alias: String,
    #[serde(default = "default_mode")]
    pub mode: EvaluationMode,
}

fn default_alias() -> String {
    "result".to_string()
}

fn default_mode() -> EvaluationMode {
    EvaluationMode::RowWise
}

/// POST /api/v1/formula/evaluate - Evaluate a formula over rows
pub async fn evaluate_formula(Json(req): Json<EvaluateFormulaRequest>) -> ApiReply<Dataset> {
    reply(
        "formula/evaluate",
        formula::evaluate_formula(&req.data, &req.formula, &req.alias, req.mode),
    )
}

/// Aggregate request
#[derive(Deserialize)]
pub struct AggregateRequest {
    pub data: Dataset,
    pub column: String,
    pub kind: AggregationKind,
    #[serde(default)]
    pub percentile: Option<f64>,
}

/// Aggregate response
#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub column: String,
    pub kind: AggregationKind,
    pub value: Option<f64>,
    pub row_count: usize,
}

/// POST /api/v1/aggregate - Aggregate one column
pub async fn aggregate(Json(req): Json<AggregateRequest>) -> ApiReply<AggregateResponse> {
    let columns = dataset_columns(&req.data);
    let result = resolve_column(&req.column, &columns)
        .ok_or_else(|| CalcError::column_not_found(&req.column, &columns))
        .map(|column| AggregateResponse {
            value: aggregate_rows(&req.data, column, req.kind, req.percentile),
            column: column.to_string(),
            kind: req.kind,
            row_count: req.data.len(),
        });
    reply("aggregate", result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    #[test]
    fn test_api_response_ok() {
        let response = ApiResponse::ok("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
        assert_eq!(response.request_id.len(), 36);
    }

    #[test]
    fn test_api_response_err_serialization() {
        let response: ApiResponse<String> = ApiResponse::err("boom");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_status_mapping() {
        let err = CalcError::column_not_found("x", &[]);
        assert_eq!(status_for(&err), StatusCode::UNPROCESSABLE_ENTITY);
        let err: CalcError = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_aggregate_handler() {
        let req = AggregateRequest {
            data: vec![row! { "Revenue" => 100 }, row! { "Revenue" => "n/a" }],
            column: "revenue".to_string(),
            kind: AggregationKind::Count,
            percentile: None,
        };
        let (status, Json(body)) = aggregate(Json(req)).await;
        assert_eq!(status, StatusCode::OK);
        let data = body.data.unwrap();
        assert_eq!(data.column, "Revenue");
        assert_eq!(data.value, Some(1.0));
        assert_eq!(data.row_count, 2);
    }

    #[tokio::test]
    async fn test_process_rejects_data_file() {
        let req: ChartRequest =
            serde_json::from_str(r#"{"chartType": "bar", "dataFile": "/etc/passwd"}"#).unwrap();
        let (status, Json(body)) = process(Json(req)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!body.success);
    }
}
