use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::exec::{self, ExecError, ExecutionResult};
use crate::llm::models::{ChartSpec, GeneratedQuery, InsightText};
use crate::llm::{GenerationError, LlmManager, ParsedResponse, ResponseShape};
use crate::prompt;
use crate::record::{QueryRecord, QueryStatus};
use crate::source::{SourceError, TableSource};
use crate::store::{RecordStore, StoreError};
use crate::validate::{self, ValidationError};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Execution(#[from] ExecError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("query record {0} not found")]
    RecordNotFound(i64),
    #[error("record {id} is not eligible for analysis: status is {status}")]
    RecordNotEligible { id: i64, status: QueryStatus },
    #[error("internal error: {0}")]
    Internal(String),
}

/// Everything a caller gets back from one pipeline run. The record carries
/// the terminal status; the result is present only when execution succeeded
/// and is discarded after the response is returned.
#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub record: QueryRecord,
    pub confidence: f64,
    pub result: Option<ExecutionResult>,
}

/// One pipeline instance per process, holding explicitly constructed handles
/// to the store and the generation gateway. Each request independently loads
/// its own table, so there is no shared mutable state between requests.
pub struct QueryPipeline {
    store: RecordStore,
    llm: Arc<LlmManager>,
    config: PipelineConfig,
}

impl QueryPipeline {
    pub fn new(store: RecordStore, llm: Arc<LlmManager>, config: PipelineConfig) -> Self {
        Self { store, llm, config }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Full question-to-result flow.
    ///
    /// Source, generation, and validation failures abort before any record is
    /// created. Execution failures terminate the new record in `error` and
    /// are reported inside the outcome, not as a pipeline error.
    pub async fn run_question(
        &self,
        user: &str,
        locator: &str,
        question: &str,
        execute: bool,
    ) -> Result<QueryOutcome, PipelineError> {
        let (source, sample) = self.load_source(locator).await?;
        info!(
            locator = source.locator(),
            rows = source.row_count(),
            "source ready"
        );

        let generated = self
            .generate_statement(question, source.schema(), &sample)
            .await?;
        info!(
            statement = %generated.statement,
            confidence = generated.confidence,
            "generated statement"
        );

        // Validation gates record creation: only checked statements are
        // ever attached to history.
        let statement = validate::validate(&generated.statement, source.schema())?;

        let record = self.store.create(
            user,
            locator,
            question,
            Some(statement.as_str()),
            Some(&generated.explanation),
        )?;

        if !execute {
            return Ok(QueryOutcome {
                record,
                confidence: generated.confidence,
                result: None,
            });
        }

        self.store.mark_running(record.id)?;

        let execution = self.execute_bounded(source, statement).await?;

        let result = match execution {
            Ok(result) => {
                self.store
                    .mark_success(record.id, result.row_count as i64, result.execution_time_ms)?;
                Some(result)
            }
            Err(err) => {
                warn!(record = record.id, error = %err, "execution failed");
                self.store.mark_error(record.id, &err.to_string())?;
                None
            }
        };

        let record = self
            .store
            .get(record.id, user)?
            .ok_or(PipelineError::RecordNotFound(record.id))?;

        Ok(QueryOutcome {
            record,
            confidence: generated.confidence,
            result,
        })
    }

    /// Re-runs a stored question as a brand-new record. The original record
    /// is never mutated, whatever state it is in.
    pub async fn rerun(&self, user: &str, id: i64) -> Result<QueryOutcome, PipelineError> {
        let original = self
            .store
            .get(id, user)?
            .ok_or(PipelineError::RecordNotFound(id))?;
        self.run_question(user, &original.source, &original.question, true)
            .await
    }

    /// Regenerates chart inputs for a successful record and asks the model
    /// for a chart spec.
    pub async fn chart(&self, user: &str, id: i64) -> Result<ChartSpec, PipelineError> {
        let (record, result) = self.replay(user, id).await?;
        let statement = record.statement.as_deref().unwrap_or_default();
        let prompt = prompt::build_chart_prompt(&record.question, statement, &result);
        match self.llm.generate(&prompt, ResponseShape::Chart).await? {
            ParsedResponse::Chart(spec) => Ok(spec),
            _ => Err(PipelineError::Internal(
                "gateway returned wrong response shape".to_string(),
            )),
        }
    }

    /// Regenerates insight inputs for a successful record and asks the model
    /// for insight text.
    pub async fn insight(&self, user: &str, id: i64) -> Result<InsightText, PipelineError> {
        let (record, result) = self.replay(user, id).await?;
        let statement = record.statement.as_deref().unwrap_or_default();
        let prompt = prompt::build_insight_prompt(&record.question, statement, &result);
        match self.llm.generate(&prompt, ResponseShape::Insight).await? {
            ParsedResponse::Insight(insight) => Ok(insight),
            _ => Err(PipelineError::Internal(
                "gateway returned wrong response shape".to_string(),
            )),
        }
    }

    /// Re-executes a stored statement against the current table state.
    /// Deliberately not cached: the source may have changed since the
    /// original run and full result sets are never retained.
    async fn replay(
        &self,
        user: &str,
        id: i64,
    ) -> Result<(QueryRecord, ExecutionResult), PipelineError> {
        let record = self
            .store
            .get(id, user)?
            .ok_or(PipelineError::RecordNotFound(id))?;

        if record.status != QueryStatus::Success {
            return Err(PipelineError::RecordNotEligible {
                id,
                status: record.status,
            });
        }

        let statement = record.statement.clone().ok_or_else(|| {
            PipelineError::Internal(format!("record {} succeeded without a statement", id))
        })?;

        let locator = record.source.clone();
        let (source, statement) = task::spawn_blocking(
            move || -> Result<(TableSource, validate::ValidatedStatement), PipelineError> {
                let source = TableSource::load(&locator)?;
                // Re-validated against the current schema; the table may have
                // been reloaded with different columns since the original run.
                let statement = validate::validate(&statement, source.schema())?;
                Ok((source, statement))
            },
        )
        .await
        .map_err(|e| PipelineError::Internal(e.to_string()))??;

        let result = self.execute_bounded(source, statement).await??;

        Ok((record, result))
    }

    async fn load_source(
        &self,
        locator: &str,
    ) -> Result<(TableSource, Vec<Vec<Value>>), PipelineError> {
        let locator = locator.to_string();
        let sample_rows = self.config.sample_rows;
        let loaded = task::spawn_blocking(
            move || -> Result<(TableSource, Vec<Vec<Value>>), SourceError> {
                let source = TableSource::load(&locator)?;
                let sample = source.sample(sample_rows)?;
                Ok((source, sample))
            },
        )
        .await
        .map_err(|e| PipelineError::Internal(e.to_string()))??;
        Ok(loaded)
    }

    async fn generate_statement(
        &self,
        question: &str,
        schema: &crate::source::schema::TableSchema,
        sample: &[Vec<Value>],
    ) -> Result<GeneratedQuery, PipelineError> {
        let prompt = prompt::build_query_prompt(question, schema, sample);
        match self.llm.generate(&prompt, ResponseShape::Query).await? {
            ParsedResponse::Query(generated) => Ok(generated),
            _ => Err(PipelineError::Internal(
                "gateway returned wrong response shape".to_string(),
            )),
        }
    }

    /// Executes on the blocking pool, optionally bounded by the configured
    /// timeout. The engine-level outcome comes back as an inner result so the
    /// caller can terminate the record instead of dropping the error.
    async fn execute_bounded(
        &self,
        source: TableSource,
        statement: validate::ValidatedStatement,
    ) -> Result<Result<ExecutionResult, ExecError>, PipelineError> {
        let handle = task::spawn_blocking(move || exec::execute(&source, &statement));

        match self.config.execution_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), handle).await {
                Ok(joined) => joined.map_err(|e| PipelineError::Internal(e.to_string())),
                Err(_) => Ok(Err(ExecError::Timeout(ms))),
            },
            None => handle.await.map_err(|e| PipelineError::Internal(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TextGenerator;
    use async_trait::async_trait;
    use std::io::Write;

    struct MockGenerator {
        query_response: String,
        chart_response: String,
        insight_response: String,
    }

    impl MockGenerator {
        fn with_query(response: &str) -> Self {
            Self {
                query_response: response.to_string(),
                chart_response: r#"{
                    "chart_type": "bar",
                    "title": "Totals",
                    "labels": ["east", "west"],
                    "datasets": [{"label": "total", "values": [1, 2]}],
                    "rationale": "categorical comparison"
                }"#
                .to_string(),
                insight_response: "East leads.\n- East has the highest total\n".to_string(),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn complete(
            &self,
            system: &str,
            _prompt: &str,
            _json_response: bool,
        ) -> Result<String, GenerationError> {
            if system.contains("SQL") {
                Ok(self.query_response.clone())
            } else if system.contains("visualization") {
                Ok(self.chart_response.clone())
            } else {
                Ok(self.insight_response.clone())
            }
        }
    }

    fn sales_csv() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".csv")
            .tempfile()
            .unwrap();
        writeln!(file, "region,sales").unwrap();
        let regions = ["east", "west", "north", "south"];
        for i in 0..100 {
            writeln!(file, "{},{}.5", regions[i % regions.len()], i).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn pipeline_with(generator: MockGenerator) -> (tempfile::TempDir, QueryPipeline) {
        pipeline_with_config(
            generator,
            PipelineConfig {
                sample_rows: 3,
                execution_timeout_ms: None,
            },
        )
    }

    fn pipeline_with_config(
        generator: MockGenerator,
        config: PipelineConfig,
    ) -> (tempfile::TempDir, QueryPipeline) {
        let (dir, store) = crate::store::tests::memory_store();
        let llm = Arc::new(LlmManager::with_generator(Box::new(generator)));
        (dir, QueryPipeline::new(store, llm, config))
    }

    const GOOD_QUERY_JSON: &str = r#"{
        "statement": "SELECT region, SUM(sales) AS total FROM data GROUP BY region",
        "explanation": "Sums sales per region",
        "confidence": 0.92
    }"#;

    #[tokio::test]
    async fn question_flows_to_successful_record() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", true)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, QueryStatus::Success);
        assert_eq!(outcome.confidence, 0.92);
        let result = outcome.result.unwrap();
        assert!(result.row_count <= 4);
        assert_eq!(outcome.record.row_count, Some(result.row_count as i64));
        assert!(outcome.record.execution_time_ms.is_some());
        assert!(outcome
            .record
            .statement
            .as_deref()
            .unwrap()
            .contains("GROUP BY region"));
    }

    #[tokio::test]
    async fn execute_false_leaves_record_pending() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", false)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, QueryStatus::Pending);
        assert!(outcome.result.is_none());
        assert!(outcome.record.row_count.is_none());
    }

    #[tokio::test]
    async fn malformed_generation_creates_no_record() {
        let csv = sales_csv();
        let missing_confidence =
            r#"{"statement": "SELECT region FROM data", "explanation": "x"}"#;
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(missing_confidence));

        let err = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "q", true)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Generation(GenerationError::Malformed(_))
        ));
        assert_eq!(pipeline.store().count_all().unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_statement_creates_no_record() {
        let csv = sales_csv();
        let cte = r#"{
            "statement": "WITH recent AS (SELECT * FROM data) SELECT * FROM recent",
            "explanation": "x",
            "confidence": 0.9
        }"#;
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(cte));

        let err = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "q", true)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::UnsupportedConstruct(_))
        ));
        assert_eq!(pipeline.store().count_all().unwrap(), 0);
    }

    #[tokio::test]
    async fn engine_failure_terminates_record_in_error() {
        let csv = sales_csv();
        // Passes the validator, fails in the engine: SUM over VARCHAR.
        let bad_types = r#"{
            "statement": "SELECT SUM(region) AS total FROM data",
            "explanation": "x",
            "confidence": 0.7
        }"#;
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(bad_types));

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "q", true)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, QueryStatus::Error);
        assert!(outcome.result.is_none());
        assert!(outcome.record.error_message.is_some());
        assert!(outcome.record.row_count.is_none());
        assert!(outcome.record.execution_time_ms.is_none());
    }

    #[tokio::test]
    async fn execution_timeout_terminates_record_in_error() {
        let csv = sales_csv();
        // A zero budget expires before the blocking execution can finish.
        let (_dir, pipeline) = pipeline_with_config(
            MockGenerator::with_query(GOOD_QUERY_JSON),
            PipelineConfig {
                sample_rows: 3,
                execution_timeout_ms: Some(0),
            },
        );

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", true)
            .await
            .unwrap();

        assert_eq!(outcome.record.status, QueryStatus::Error);
        assert!(outcome.result.is_none());
        assert!(outcome
            .record
            .error_message
            .as_deref()
            .unwrap()
            .contains("timed out"));
        assert!(outcome.record.row_count.is_none());
    }

    #[tokio::test]
    async fn replay_is_bounded_by_execution_timeout() {
        let csv = sales_csv();
        let (_dir, store) = crate::store::tests::memory_store();
        let llm = Arc::new(LlmManager::with_generator(Box::new(
            MockGenerator::with_query(GOOD_QUERY_JSON),
        )));

        let relaxed = QueryPipeline::new(
            store.clone(),
            llm.clone(),
            PipelineConfig {
                sample_rows: 3,
                execution_timeout_ms: None,
            },
        );
        let outcome = relaxed
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", true)
            .await
            .unwrap();

        let bounded = QueryPipeline::new(
            store,
            llm,
            PipelineConfig {
                sample_rows: 3,
                execution_timeout_ms: Some(0),
            },
        );
        let err = bounded.chart("u1", outcome.record.id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Execution(ExecError::Timeout(0))
        ));
    }

    #[tokio::test]
    async fn rerun_creates_new_record_and_preserves_original() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));
        let locator = csv.path().to_str().unwrap().to_string();

        let first = pipeline
            .run_question("u1", &locator, "total sales by region", true)
            .await
            .unwrap();
        let second = pipeline.rerun("u1", first.record.id).await.unwrap();

        assert_ne!(first.record.id, second.record.id);
        let original = pipeline
            .store()
            .get(first.record.id, "u1")
            .unwrap()
            .unwrap();
        assert_eq!(original.status, QueryStatus::Success);
        assert_eq!(original.question, second.record.question);
        assert_eq!(pipeline.store().count_all().unwrap(), 2);
    }

    #[tokio::test]
    async fn chart_replays_successful_record() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", true)
            .await
            .unwrap();

        let spec = pipeline.chart("u1", outcome.record.id).await.unwrap();
        assert_eq!(spec.labels, vec!["east".to_string(), "west".to_string()]);
        assert_eq!(spec.datasets.len(), 1);

        let insight = pipeline.insight("u1", outcome.record.id).await.unwrap();
        assert_eq!(insight.key_findings.len(), 1);
    }

    #[tokio::test]
    async fn replay_of_pending_record_is_not_eligible() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));

        let outcome = pipeline
            .run_question("u1", csv.path().to_str().unwrap(), "total sales by region", false)
            .await
            .unwrap();

        let err = pipeline.chart("u1", outcome.record.id).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RecordNotEligible {
                status: QueryStatus::Pending,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn replay_of_missing_record_is_not_found() {
        let csv = sales_csv();
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));
        drop(csv);

        let err = pipeline.chart("u1", 999).await.unwrap_err();
        assert!(matches!(err, PipelineError::RecordNotFound(999)));
    }

    #[tokio::test]
    async fn unavailable_source_aborts_before_any_record() {
        let (_dir, pipeline) = pipeline_with(MockGenerator::with_query(GOOD_QUERY_JSON));

        let err = pipeline
            .run_question("u1", "/does/not/exist.csv", "q", true)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Source(SourceError::Unavailable(_))
        ));
        assert_eq!(pipeline.store().count_all().unwrap(), 0);
    }
}
