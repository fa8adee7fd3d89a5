pub mod models;
pub mod providers;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::LlmConfig;
use models::{ChartSpec, GeneratedQuery, InsightText};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),
    #[error("malformed generation response: {0}")]
    Malformed(String),
    #[error("generation configuration error: {0}")]
    Config(String),
}

/// Required response shape per task, enforced when the raw reply is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Requires `statement`, `explanation`, `confidence` in [0, 1].
    Query,
    /// Requires `chart_type`, `title`, `labels`, `datasets`, `rationale`.
    Chart,
    /// Requires non-empty free text.
    Insight,
}

impl ResponseShape {
    fn wants_json(self) -> bool {
        !matches!(self, ResponseShape::Insight)
    }

    fn system_role(self) -> &'static str {
        match self {
            ResponseShape::Query => {
                "You are an expert SQL query generator. Generate SQL for a single \
                 in-memory table using standard SQL syntax. Always return valid JSON."
            }
            ResponseShape::Chart => {
                "You are an expert at data visualization. Suggest the chart that best \
                 represents the data. Always return valid JSON."
            }
            ResponseShape::Insight => {
                "You are a data analyst. Provide clear, actionable insights from data \
                 analysis results."
            }
        }
    }
}

/// Tagged parse result, one case per task.
#[derive(Debug, Clone)]
pub enum ParsedResponse {
    Query(GeneratedQuery),
    Chart(ChartSpec),
    Insight(InsightText),
}

/// Boundary to the external generative model. Implementations only move text;
/// shape enforcement lives in [`LlmManager::generate`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        json_response: bool,
    ) -> Result<String, GenerationError>;
}

/// Explicitly constructed gateway handle, passed into each pipeline instance.
/// No retry happens in here; callers decide whether a failed generation is
/// worth another attempt.
pub struct LlmManager {
    generator: Box<dyn TextGenerator>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let generator: Box<dyn TextGenerator> = match config.backend.as_str() {
            "openai" => Box::new(providers::openai::OpenAiProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            other => {
                return Err(GenerationError::Config(format!(
                    "unsupported LLM backend: {}",
                    other
                )))
            }
        };
        Ok(Self { generator })
    }

    /// Builds a manager around an arbitrary generator. Used by tests to
    /// substitute the network boundary.
    pub fn with_generator(generator: Box<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub async fn generate(
        &self,
        prompt: &str,
        shape: ResponseShape,
    ) -> Result<ParsedResponse, GenerationError> {
        let raw = self
            .generator
            .complete(shape.system_role(), prompt, shape.wants_json())
            .await?;
        parse_response(&raw, shape)
    }
}

/// Parses a raw model reply against the required shape for the task.
/// Any deviation (missing field, wrong type, out-of-range confidence,
/// unknown chart type, empty insight) is `GenerationMalformed`.
pub fn parse_response(raw: &str, shape: ResponseShape) -> Result<ParsedResponse, GenerationError> {
    let cleaned = strip_code_fence(raw);

    match shape {
        ResponseShape::Query => {
            let query: GeneratedQuery = serde_json::from_str(cleaned)
                .map_err(|e| GenerationError::Malformed(e.to_string()))?;
            if query.statement.trim().is_empty() {
                return Err(GenerationError::Malformed(
                    "field `statement` is empty".to_string(),
                ));
            }
            if !(0.0..=1.0).contains(&query.confidence) {
                return Err(GenerationError::Malformed(format!(
                    "field `confidence` must be in [0, 1], got {}",
                    query.confidence
                )));
            }
            Ok(ParsedResponse::Query(query))
        }
        ResponseShape::Chart => {
            let chart: ChartSpec = serde_json::from_str(cleaned)
                .map_err(|e| GenerationError::Malformed(e.to_string()))?;
            Ok(ParsedResponse::Chart(chart))
        }
        ResponseShape::Insight => {
            let text = cleaned.trim();
            if text.is_empty() {
                return Err(GenerationError::Malformed(
                    "insight response is empty".to_string(),
                ));
            }
            Ok(ParsedResponse::Insight(InsightText {
                text: text.to_string(),
                key_findings: extract_key_findings(text),
            }))
        }
    }
}

/// Models sometimes wrap JSON in markdown fences even when asked not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Pulls enumerated findings ("- ..." or "1. ...") out of insight text.
fn extract_key_findings(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("- ") {
                return Some(rest.trim().to_string());
            }
            match line.split_once('.') {
                Some((ordinal, rest))
                    if !ordinal.is_empty() && ordinal.chars().all(|c| c.is_ascii_digit()) =>
                {
                    Some(rest.trim().to_string())
                }
                _ => None,
            }
        })
        .filter(|finding| !finding.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::ChartType;

    #[test]
    fn parses_well_formed_query_response() {
        let raw = r#"{"statement": "SELECT region FROM data", "explanation": "lists regions", "confidence": 0.9}"#;
        match parse_response(raw, ResponseShape::Query).unwrap() {
            ParsedResponse::Query(q) => {
                assert_eq!(q.statement, "SELECT region FROM data");
                assert_eq!(q.confidence, 0.9);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn missing_confidence_is_malformed() {
        let raw = r#"{"statement": "SELECT region FROM data", "explanation": "x"}"#;
        let err = parse_response(raw, ResponseShape::Query).unwrap_err();
        match err {
            GenerationError::Malformed(msg) => assert!(msg.contains("confidence")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn out_of_range_confidence_is_malformed() {
        let raw = r#"{"statement": "SELECT region FROM data", "explanation": "x", "confidence": 1.4}"#;
        let err = parse_response(raw, ResponseShape::Query).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn wrong_field_type_is_malformed() {
        let raw = r#"{"statement": 7, "explanation": "x", "confidence": 0.5}"#;
        let err = parse_response(raw, ResponseShape::Query).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn fenced_json_is_accepted() {
        let raw = "```json\n{\"statement\": \"SELECT sales FROM data\", \"explanation\": \"e\", \"confidence\": 0.5}\n```";
        assert!(matches!(
            parse_response(raw, ResponseShape::Query).unwrap(),
            ParsedResponse::Query(_)
        ));
    }

    #[test]
    fn parses_chart_response() {
        let raw = r#"{
            "chart_type": "bar",
            "title": "Sales by region",
            "labels": ["east", "west"],
            "datasets": [{"label": "total", "values": [10.5, 20]}],
            "rationale": "categorical comparison"
        }"#;
        match parse_response(raw, ResponseShape::Chart).unwrap() {
            ParsedResponse::Chart(chart) => {
                assert_eq!(chart.chart_type, ChartType::Bar);
                assert_eq!(chart.labels.len(), 2);
                assert_eq!(chart.datasets[0].values.len(), 2);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn unknown_chart_type_is_malformed() {
        let raw = r#"{
            "chart_type": "heatmap",
            "title": "t",
            "labels": [],
            "datasets": [],
            "rationale": "r"
        }"#;
        let err = parse_response(raw, ResponseShape::Chart).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[test]
    fn insight_extracts_key_findings() {
        let raw = "Sales are concentrated in the east.\n- East leads with 60% of revenue\n- West is declining quarter over quarter\n";
        match parse_response(raw, ResponseShape::Insight).unwrap() {
            ParsedResponse::Insight(insight) => {
                assert_eq!(insight.key_findings.len(), 2);
                assert!(insight.text.contains("concentrated"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn numbered_findings_survive_double_digits() {
        let raw = "Summary first.\n9. ninth point\n10. tenth point\n11. eleventh point\n";
        match parse_response(raw, ResponseShape::Insight).unwrap() {
            ParsedResponse::Insight(insight) => {
                assert_eq!(
                    insight.key_findings,
                    vec!["ninth point", "tenth point", "eleventh point"]
                );
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn empty_insight_is_malformed() {
        let err = parse_response("   \n", ResponseShape::Insight).unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }
}
