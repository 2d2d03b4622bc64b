use crate::core::chart::{process_chart_data, ChartDataMapping, ChartType, ProcessedChartData};
use crate::error::{CalcError, CalcResult};
use crate::types::Dataset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A chart to compute: type, mapping, and the rows (inline or in a file).
///
/// ```yaml
/// chartType: bar
/// mapping:
///   category: Region
///   yAxis: Revenue
/// dataFile: sales.json
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    #[serde(alias = "type", alias = "chart")]
    pub chart_type: ChartType,
    #[serde(default)]
    pub mapping: ChartDataMapping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Dataset>,
    /// Relative paths resolve against the request file's directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,
}

impl ChartRequest {
    pub fn rows(&self) -> &[crate::types::Row] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn process(&self) -> CalcResult<ProcessedChartData> {
        process_chart_data(self.rows(), &self.chart_type, &self.mapping)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Read a JSON or YAML array of row objects.
///
/// `.json` files are parsed as JSON, everything else as YAML.
pub fn load_dataset(path: &Path) -> CalcResult<Dataset> {
    let content = std::fs::read_to_string(path)?;
    parse_dataset(&content, is_json(path))
}

pub fn parse_dataset(content: &str, json: bool) -> CalcResult<Dataset> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Read a chart request and load its `dataFile`, if it names one
pub fn load_request(path: &Path) -> CalcResult<ChartRequest> {
    let content = std::fs::read_to_string(path)?;
    let mut request: ChartRequest = if is_json(path) {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };

    match (&request.data, &request.data_file) {
        (Some(_), Some(_)) => {
            return Err(CalcError::Validation(
                "Chart request sets both 'data' and 'dataFile'".to_string(),
            ))
        }
        (None, Some(file)) => {
            let resolved = match path.parent() {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };
            request.data = Some(load_dataset(&resolved)?);
        }
        _ => {}
    }

    Ok(request)
}
