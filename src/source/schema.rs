use serde::{Deserialize, Serialize};

/// Inferred column type, folded down from DuckDB's declared type zoo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    String,
    Datetime,
    Unknown,
}

impl ColumnType {
    /// Maps a DuckDB declared type (as reported by `PRAGMA table_info`) to the
    /// inferred portable type.
    pub fn from_declared(declared: &str) -> Self {
        let lowered = declared.trim().to_lowercase();
        match lowered.as_str() {
            "tinyint" | "smallint" | "integer" | "int" | "bigint" | "hugeint" | "utinyint"
            | "usmallint" | "uinteger" | "ubigint" => ColumnType::Integer,
            "float" | "real" | "double" => ColumnType::Float,
            "boolean" | "bool" => ColumnType::Boolean,
            "varchar" | "text" | "string" => ColumnType::String,
            "date" | "time" | "timestamp" | "timestamp with time zone" | "timestamptz" => {
                ColumnType::Datetime
            }
            _ if lowered.starts_with("decimal") => ColumnType::Float,
            _ if lowered.starts_with("timestamp") => ColumnType::Datetime,
            _ => ColumnType::Unknown,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::String => "string",
            ColumnType::Datetime => "datetime",
            ColumnType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

/// Ordered column list plus row count, derived once per load and immutable
/// until the source is reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
    pub row_count: u64,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Exact, case-sensitive column lookup.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}
