use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Parsed, shape-checked output of a SQL generation call. The statement still
/// has to pass the validator before it can be attached to a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedQuery {
    pub statement: String,
    pub explanation: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
    Scatter,
    Area,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartDataset {
    pub label: String,
    pub values: Vec<Value>,
}

/// Chart specification produced from a successful query's results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
    pub rationale: String,
}

/// Free-form insight text plus any enumerated key findings pulled out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightText {
    pub text: String,
    pub key_findings: Vec<String>,
}
