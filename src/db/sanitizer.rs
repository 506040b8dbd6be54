//! Post-processing of model output and the statement gate in front of the
//! database.
//!
//! None of this parses SQL. The allow-list looks at the first word of each
//! `;`-separated segment only, so keywords hidden in comments or string
//! literals pass straight through. Treat it as a guard against the model
//! wandering off, not as a security boundary.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::GatewayError;

/// Commands `validate_statement_list` lets through.
pub const MUTATION_ALLOW_LIST: [&str; 7] = [
    "CREATE", "ALTER", "INSERT", "UPDATE", "DELETE", "DROP", "TRUNCATE",
];

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:[a-z0-9_+-]+[ \t]*\r?\n)?(.*?)```").expect("fenced block regex")
});
static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```[a-z0-9_+-]*\s*").expect("leading fence regex"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*```$").expect("trailing fence regex"));
static TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*$").expect("trailing comma regex"));
static COMMA_BEFORE_SEMICOLON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*;\s*$").expect("comma before semicolon regex"));
static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Removes markdown code fences (optionally language-tagged) around model output.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();

    let body = match FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    };

    // Unbalanced fences (model stopped early, or only closed the block)
    let body = LEADING_FENCE.replace(body, "");
    let body = TRAILING_FENCE.replace(&body, "");
    body.trim().to_string()
}

/// Cleans generated SQL: strips fences and a dangling comma left at the end of
/// a VALUES list.
pub fn clean_sql(raw: &str) -> String {
    let sql = strip_code_fences(raw);
    let sql = TRAILING_COMMA.replace(&sql, "");
    let sql = COMMA_BEFORE_SEMICOLON.replace(&sql, ";");
    sql.trim().to_string()
}

/// First run of ASCII letters, upper-cased.
pub fn leading_keyword(statement: &str) -> String {
    statement
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Splits `sql` on `;` and checks every statement against
/// [`MUTATION_ALLOW_LIST`]. One bad statement rejects the whole batch.
pub fn validate_statement_list(sql: &str) -> Result<Vec<String>, GatewayError> {
    let statements: Vec<String> = sql
        .split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(String::from)
        .collect();

    for statement in &statements {
        let keyword = leading_keyword(statement);
        if !MUTATION_ALLOW_LIST.contains(&keyword.as_str()) {
            return Err(GatewayError::UnauthorizedStatement(preview(statement)));
        }
    }

    Ok(statements)
}

pub fn is_select(sql: &str) -> bool {
    leading_keyword(sql) == "SELECT"
}

/// Cache-key form of a query: no surrounding whitespace or semicolons, inner
/// whitespace collapsed.
pub fn normalize_sql(sql: &str) -> String {
    let trimmed = sql.trim_matches(|c: char| c.is_whitespace() || c == ';' || c == '\0');
    WHITESPACE.replace_all(trimmed, " ").into_owned()
}

/// Table names are interpolated into catalog queries, so only `[a-zA-Z0-9_]` is accepted.
pub fn validate_table_name(name: &str) -> Result<&str, GatewayError> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(GatewayError::Validation(format!("Invalid table name: '{}'", name)))
    }
}

pub(crate) fn preview(statement: &str) -> String {
    let head: String = statement.chars().take(50).collect();
    if head.len() < statement.len() {
        format!("{}...", head)
    } else {
        head
    }
}
