use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::source::schema::TableSchema;
use crate::source::TABLE_NAME;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}

/// A generated statement that passed the dialect and column-reference checks.
/// The only way to obtain one is through [`validate`], so the executor never
/// sees an unchecked statement.
#[derive(Debug, Clone)]
pub struct ValidatedStatement(String);

impl ValidatedStatement {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ValidatedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SQL keywords that may appear in the supported dialect subset. Anything the
/// identifier scan finds outside this set must be a schema column or a
/// select-list alias.
const KEYWORDS: &[&str] = &[
    "select", "from", "where", "group", "order", "by", "having", "limit", "offset", "distinct",
    "as", "and", "or", "not", "in", "is", "null", "like", "between", "asc", "desc", "case",
    "when", "then", "else", "end", "cast", "true", "false", "integer", "bigint", "double",
    "float", "varchar", "date", "timestamp", "boolean",
];

/// Functions the engine supports against a single table.
const FUNCTIONS: &[&str] = &[
    "count", "sum", "avg", "min", "max", "round", "abs", "coalesce", "lower", "upper", "length",
    "trim", "substr", "substring", "concat", "strftime", "year", "month", "day", "floor", "ceil",
    "nullif", "replace",
];

/// Verbs that mutate data or schema; never allowed in a generated statement.
const FORBIDDEN_VERBS: &[&str] = &["insert", "update", "delete", "drop", "alter", "create"];

/// Restricts a generated statement to the safe dialect subset before it can
/// reach the executor.
///
/// Rejected constructs: multiple statements, DDL/DML verbs, common table
/// expressions, window functions, joins, and references to any table other
/// than the fixed `data` alias. Column references are checked against the
/// schema case-sensitively.
pub fn validate(statement: &str, schema: &TableSchema) -> Result<ValidatedStatement, ValidationError> {
    let trimmed = statement.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        return Err(ValidationError::UnsupportedConstruct(
            "empty statement".to_string(),
        ));
    }

    let stripped = strip_string_literals(trimmed);

    if stripped.contains(';') {
        return Err(ValidationError::UnsupportedConstruct(
            "multiple statements".to_string(),
        ));
    }

    let words: Vec<String> = word_regex()
        .find_iter(&stripped)
        .map(|m| m.as_str().to_lowercase())
        .collect();

    for word in &words {
        if FORBIDDEN_VERBS.contains(&word.as_str()) {
            return Err(ValidationError::UnsupportedConstruct(format!(
                "{} is not allowed",
                word.to_uppercase()
            )));
        }
        if word == "with" {
            return Err(ValidationError::UnsupportedConstruct(
                "WITH (common table expression)".to_string(),
            ));
        }
        if word == "over" {
            return Err(ValidationError::UnsupportedConstruct(
                "OVER (window function)".to_string(),
            ));
        }
        if word == "join" {
            return Err(ValidationError::UnsupportedConstruct(
                "JOIN (queries run against a single table)".to_string(),
            ));
        }
    }

    match words.first().map(String::as_str) {
        Some("select") => {}
        Some(other) => {
            return Err(ValidationError::UnsupportedConstruct(format!(
                "statement must start with SELECT, found {}",
                other.to_uppercase()
            )))
        }
        None => {
            return Err(ValidationError::UnsupportedConstruct(
                "empty statement".to_string(),
            ))
        }
    }

    check_table_references(&stripped)?;
    check_column_references(&stripped, schema)?;

    Ok(ValidatedStatement(trimmed.to_string()))
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static regex"))
}

fn from_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bfrom\s+("?)([A-Za-z_][A-Za-z0-9_]*)"?"#).expect("static regex")
    })
}

fn alias_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bas\s+("?)([A-Za-z_][A-Za-z0-9_]*)"?"#).expect("static regex")
    })
}

fn ident_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|[A-Za-z_][A-Za-z0-9_]*"#).expect("static regex"))
}

/// Replaces single-quoted literal contents with spaces so literal text never
/// trips the construct or identifier checks.
fn strip_string_literals(statement: &str) -> String {
    let mut out = String::with_capacity(statement.len());
    let mut in_literal = false;
    for ch in statement.chars() {
        if ch == '\'' {
            in_literal = !in_literal;
            out.push(ch);
        } else if in_literal {
            out.push(' ');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Every FROM must reference the fixed table name, nothing else.
fn check_table_references(stripped: &str) -> Result<(), ValidationError> {
    let from_re = from_regex();
    for caps in from_re.captures_iter(stripped) {
        let table = &caps[2];
        if table != TABLE_NAME {
            return Err(ValidationError::UnsupportedConstruct(format!(
                "FROM {} (only the {} table is addressable)",
                table, TABLE_NAME
            )));
        }
    }
    if !from_re.is_match(stripped) {
        return Err(ValidationError::UnsupportedConstruct(format!(
            "statement must select FROM {}",
            TABLE_NAME
        )));
    }
    Ok(())
}

fn check_column_references(stripped: &str, schema: &TableSchema) -> Result<(), ValidationError> {
    // Select-list aliases are legal references in ORDER BY / HAVING.
    let aliases: HashSet<String> = alias_regex()
        .captures_iter(stripped)
        .map(|caps| caps[2].to_string())
        .collect();

    for m in ident_regex().find_iter(stripped) {
        let token = m.as_str();
        let (ident, quoted) = if let Some(inner) = token.strip_prefix('"') {
            (inner.trim_end_matches('"'), true)
        } else {
            (token, false)
        };

        if !quoted {
            let lowered = ident.to_lowercase();
            if KEYWORDS.contains(&lowered.as_str()) || FUNCTIONS.contains(&lowered.as_str()) {
                continue;
            }
        }
        if ident == TABLE_NAME || aliases.contains(ident) {
            continue;
        }
        if !schema.has_column(ident) {
            return Err(ValidationError::UnknownColumn(ident.to_string()));
        }
    }
    Ok(())
}
