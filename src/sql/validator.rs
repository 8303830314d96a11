//! Query Safety Validator
//!
//! Lexical and structural screening of model-generated SQL. This is a
//! best-effort gate against accidental or naive misuse, not a security
//! boundary against an adversary who can steer the model.

use crate::error::{AgentError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::fmt;
use tracing::{debug, warn};

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "drop", "delete", "update", "insert", "alter", "truncate", "create", "attach", "detach",
    "grant", "revoke", "commit", "rollback", "savepoint", "exec", "execute", "shutdown",
];

/// Vendor stored-procedure prefixes, matched at the start of a word
const FORBIDDEN_PREFIXES: &[&str] = &["sp_", "xp_"];

lazy_static! {
    static ref KEYWORD_PATTERNS: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"(?i)\b{}\b", kw)).unwrap()))
        .chain(
            FORBIDDEN_PREFIXES
                .iter()
                .map(|p| (*p, Regex::new(&format!(r"(?i)\b{}", p)).unwrap()))
        )
        .collect();

    static ref DANGEROUS_PATTERNS: Vec<(&'static str, Regex)> = vec![
        ("inline comment", Regex::new(r"--").unwrap()),
        ("block comment", Regex::new(r"/\*").unwrap()),
        ("UNION SELECT injection", Regex::new(r"(?is)\bunion\b.*\bselect\b").unwrap()),
        ("WAITFOR DELAY", Regex::new(r"(?is)\bwaitfor\b.*\bdelay\b").unwrap()),
        ("SLEEP()", Regex::new(r"(?i)\bsleep\s*\(").unwrap()),
        ("BENCHMARK()", Regex::new(r"(?i)\bbenchmark\s*\(").unwrap()),
        ("PG_SLEEP", Regex::new(r"(?i)\bpg_sleep\b").unwrap()),
    ];

    static ref FROM_CLAUSE: Regex = Regex::new(r"(?i)\bfrom\b").unwrap();
}

/// Why a statement was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotReadOnly,
    MultipleStatements,
    ForbiddenKeyword(String),
    DangerousPattern(String),
    MissingFromClause,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotReadOnly => write!(f, "Only read-only statements allowed (query must start with SELECT)"),
            Rejection::MultipleStatements => write!(f, "Multiple SQL statements detected"),
            Rejection::ForbiddenKeyword(kw) => write!(f, "Contains forbidden keyword: {}", kw),
            Rejection::DangerousPattern(name) => write!(f, "Contains dangerous SQL pattern: {}", name),
            Rejection::MissingFromClause => write!(f, "Query missing FROM clause"),
        }
    }
}

pub struct SqlValidator;

impl SqlValidator {
    /// Check a single statement, returning the first rule it breaks
    pub fn check(sql: &str) -> std::result::Result<(), Rejection> {
        let trimmed = sql.trim();

        if !trimmed.to_lowercase().starts_with("select") {
            return Err(Rejection::NotReadOnly);
        }

        if count_statements(trimmed) > 1 {
            return Err(Rejection::MultipleStatements);
        }

        for (keyword, pattern) in KEYWORD_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return Err(Rejection::ForbiddenKeyword(keyword.to_string()));
            }
        }

        for (name, pattern) in DANGEROUS_PATTERNS.iter() {
            if pattern.is_match(trimmed) {
                return Err(Rejection::DangerousPattern(name.to_string()));
            }
        }

        if !FROM_CLAUSE.is_match(trimmed) {
            return Err(Rejection::MissingFromClause);
        }

        Ok(())
    }

    /// `check` as a crate `Result`, logging rejections
    pub fn validate(sql: &str) -> Result<()> {
        Self::check(sql).map_err(|rejection| {
            warn!("Rejected SQL ({}): {}", rejection, sql);
            AgentError::Validation(rejection.to_string())
        })
    }
}

/// Number of statements in `sql`. Uses the SQL parser when it understands
/// the text, otherwise counts `;`-separated segments outside quotes.
pub fn count_statements(sql: &str) -> usize {
    match Parser::parse_sql(&SQLiteDialect {}, sql) {
        Ok(statements) => statements.len(),
        Err(e) => {
            debug!("sqlparser could not parse statement ({}), using lexical split", e);
            count_statements_lexically(sql)
        }
    }
}

fn count_statements_lexically(sql: &str) -> usize {
    let mut count = 0;
    let mut segment_has_content = false;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    segment_has_content = true;
                }
                ';' => {
                    if segment_has_content {
                        count += 1;
                    }
                    segment_has_content = false;
                }
                c if !c.is_whitespace() => segment_has_content = true,
                _ => {}
            },
        }
    }

    if segment_has_content {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_select() {
        assert_eq!(SqlValidator::check("SELECT tahun, nilai FROM inflasi WHERE tahun = 2023 LIMIT 5;"), Ok(()));
        assert_eq!(SqlValidator::check("  select * from t"), Ok(()));
    }

    #[test]
    fn test_rejects_non_select() {
        for sql in ["UPDATE t SET a = 1", "WITH x AS (SELECT 1) SELECT * FROM x", "PRAGMA table_info(t)"] {
            let rejection = SqlValidator::check(sql).unwrap_err();
            assert_eq!(rejection, Rejection::NotReadOnly);
            assert!(rejection.to_string().contains("Only read-only statements allowed"));
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        assert_eq!(
            SqlValidator::check("SELECT * FROM t; DROP TABLE t;"),
            Err(Rejection::MultipleStatements)
        );
    }

    #[test]
    fn test_forbidden_keywords_match_whole_words_only() {
        assert_eq!(
            SqlValidator::check("SELECT update_ts, last_updated, created_by FROM t"),
            Ok(())
        );
        assert_eq!(
            SqlValidator::check("SELECT * FROM t WHERE x = (delete)"),
            Err(Rejection::ForbiddenKeyword("delete".to_string()))
        );
        assert_eq!(
            SqlValidator::check("SELECT update FROM t"),
            Err(Rejection::ForbiddenKeyword("update".to_string()))
        );
        assert_eq!(
            SqlValidator::check("SELECT sp_helpdb FROM t"),
            Err(Rejection::ForbiddenKeyword("sp_".to_string()))
        );
        assert_eq!(SqlValidator::check("SELECT wasp_count FROM t"), Ok(()));
        assert_eq!(
            SqlValidator::check("SELECT exec('x') FROM t"),
            Err(Rejection::ForbiddenKeyword("exec".to_string()))
        );
    }

    #[test]
    fn test_dangerous_patterns() {
        assert!(matches!(
            SqlValidator::check("SELECT * FROM t -- sneaky"),
            Err(Rejection::DangerousPattern(_))
        ));
        assert!(matches!(
            SqlValidator::check("SELECT a FROM t UNION SELECT password FROM users"),
            Err(Rejection::DangerousPattern(_))
        ));
        assert!(matches!(
            SqlValidator::check("SELECT sleep(10) FROM t"),
            Err(Rejection::DangerousPattern(_))
        ));
    }

    #[test]
    fn test_missing_from() {
        assert_eq!(SqlValidator::check("SELECT 1"), Err(Rejection::MissingFromClause));
    }

    #[test]
    fn test_lexical_statement_count_ignores_quoted_semicolons() {
        assert_eq!(count_statements_lexically("SELECT ';' FROM t;"), 1);
        assert_eq!(count_statements_lexically("SELECT 1 FROM t; SELECT 2 FROM u"), 2);
        assert_eq!(count_statements_lexically("SELECT 1 FROM t;;  ;"), 1);
    }

    #[test]
    fn test_validate_maps_to_validation_error() {
        let err = SqlValidator::validate("DELETE FROM t").unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
