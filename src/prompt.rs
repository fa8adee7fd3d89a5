//! Deterministic prompt construction. No I/O, no timestamps, no random ids:
//! identical inputs always produce byte-identical prompts.

use crate::exec::ExecutionResult;
use crate::source::schema::TableSchema;
use crate::source::TABLE_NAME;
use crate::value::Value;

/// Result rows embedded in a chart prompt.
pub const CHART_ROW_CAP: usize = 10;
/// Result rows embedded in an insight prompt.
pub const INSIGHT_ROW_CAP: usize = 20;

/// Builds the SQL-generation prompt from the question, the introspected
/// schema, and a bounded sample of rows.
pub fn build_query_prompt(question: &str, schema: &TableSchema, sample: &[Vec<Value>]) -> String {
    let column_list = schema
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.column_type))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sample_rows = String::new();
    for row in sample {
        let rendered = schema
            .columns
            .iter()
            .zip(row.iter())
            .map(|(col, val)| format!("{}={}", col.name, val))
            .collect::<Vec<_>>()
            .join(", ");
        sample_rows.push_str(&rendered);
        sample_rows.push('\n');
    }

    format!(
        r#"Given a dataset with the following schema:

TABLE: {table}
COLUMNS: {columns}
ROW COUNT: {row_count}

SAMPLE DATA (first {sample_len} rows):
{sample}
USER QUESTION: "{question}"

Generate a SQL query that answers this question.

IMPORTANT RULES:
1. Use "{table}" as the table name
2. Column names must exactly match the schema (case-sensitive)
3. Produce a single SELECT statement
4. Do NOT use CTEs or window functions
5. For aggregations, always use GROUP BY
6. Use standard SQL only (SELECT, FROM, WHERE, GROUP BY, ORDER BY, LIMIT)

Return your response in JSON format:
{{
  "statement": "SELECT ... FROM {table} ...",
  "explanation": "Brief explanation of what the query does",
  "confidence": 0.9
}}

The confidence must be between 0.0 and 1.0 based on how certain you are that
the query correctly answers the question.
"#,
        table = TABLE_NAME,
        columns = column_list,
        row_count = schema.row_count,
        sample_len = sample.len(),
        sample = sample_rows,
        question = question,
    )
}

/// Builds the chart-spec prompt from the question, the executed statement, and
/// a bounded prefix of the result.
pub fn build_chart_prompt(question: &str, statement: &str, result: &ExecutionResult) -> String {
    format!(
        r#"QUESTION: "{question}"
SQL QUERY: {statement}

RESULTS:
Columns: {columns}
Row count: {row_count}
Data (first {cap} rows):
{rows}
Based on the question and results, suggest the best chart and return JSON:
{{
  "chart_type": "bar|line|pie|doughnut|scatter|area",
  "title": "Chart title",
  "labels": ["Label 1", "Label 2"],
  "datasets": [
    {{
      "label": "Dataset name",
      "values": [1, 2]
    }}
  ],
  "rationale": "Why this chart type was chosen"
}}
"#,
        question = question,
        statement = statement,
        columns = result.columns.join(", "),
        row_count = result.row_count,
        cap = CHART_ROW_CAP,
        rows = render_rows(result, CHART_ROW_CAP),
    )
}

/// Builds the insight prompt from the question, the executed statement, and a
/// bounded prefix of the result.
pub fn build_insight_prompt(question: &str, statement: &str, result: &ExecutionResult) -> String {
    format!(
        r#"USER QUESTION: "{question}"
SQL QUERY: {statement}

ANALYSIS RESULTS:
Total rows: {row_count}
Columns: {columns}
Data (first {cap} rows):
{rows}
Analyze these results and provide 2-3 key insights that answer the user's
question. Focus on the direct answer, notable patterns or trends, and
actionable recommendations. List each key finding on its own line starting
with "- ". Keep the insights concise and business-focused.
"#,
        question = question,
        statement = statement,
        row_count = result.row_count,
        columns = result.columns.join(", "),
        cap = INSIGHT_ROW_CAP,
        rows = render_rows(result, INSIGHT_ROW_CAP),
    )
}

fn render_rows(result: &ExecutionResult, cap: usize) -> String {
    let mut out = String::new();
    for row in result.rows.iter().take(cap) {
        let rendered = result
            .columns
            .iter()
            .zip(row.iter())
            .map(|(col, val)| format!("{}={}", col, val))
            .collect::<Vec<_>>()
            .join(", ");
        out.push_str(&rendered);
        out.push('\n');
    }
    out
}
