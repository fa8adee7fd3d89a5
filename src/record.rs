use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a natural-language query record.
///
/// `pending -> running -> {success, error}`. Running is transient (elided
/// for synchronous execution in older deployments, kept here so asynchronous
/// execution needs no schema change). Terminal states only leave via deletion
/// of the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    Pending,
    Running,
    Success,
    Error,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Pending => "pending",
            QueryStatus::Running => "running",
            QueryStatus::Success => "success",
            QueryStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(QueryStatus::Pending),
            "running" => Some(QueryStatus::Running),
            "success" => Some(QueryStatus::Success),
            "error" => Some(QueryStatus::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryStatus::Success | QueryStatus::Error)
    }

    /// Legal forward transitions only.
    pub fn can_transition_to(&self, next: QueryStatus) -> bool {
        match self {
            QueryStatus::Pending => matches!(
                next,
                QueryStatus::Running | QueryStatus::Success | QueryStatus::Error
            ),
            QueryStatus::Running => matches!(next, QueryStatus::Success | QueryStatus::Error),
            QueryStatus::Success | QueryStatus::Error => false,
        }
    }
}

impl std::fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One natural-language query instance. `row_count` and `execution_time_ms`
/// are set only on success; `error_message` only on error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub user: String,
    pub source: String,
    pub question: String,
    pub statement: Option<String>,
    pub explanation: Option<String>,
    pub status: QueryStatus,
    pub error_message: Option<String>,
    pub row_count: Option<i64>,
    pub execution_time_ms: Option<f64>,
    pub created_at: DateTime<Utc>,
}
