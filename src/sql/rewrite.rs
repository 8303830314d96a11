//! Deterministic rewrites applied to statements that passed validation.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WHERE_TOKEN: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();
    static ref LIMIT_TOKEN: Regex = Regex::new(r"(?i)\blimit\b").unwrap();
    /// Clauses that must follow WHERE, in the order they are searched
    static ref TRAILING_CLAUSES: Vec<Regex> = vec![
        Regex::new(r"(?i)\bgroup\s+by\b").unwrap(),
        Regex::new(r"(?i)\border\s+by\b").unwrap(),
        Regex::new(r"(?i)\blimit\b").unwrap(),
    ];
}

/// Placeholder predicate for scope restriction; the region is bound, never
/// spliced into the statement text.
pub fn scope_predicate(access_column: &str) -> String {
    format!("{} LIKE ?", access_column)
}

/// Bound value paired with `scope_predicate`
pub fn scope_param(region: &str) -> String {
    format!("{}%", region)
}

fn scope_pattern(access_column: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)\b{}\s+LIKE\s+\?", regex::escape(access_column))).ok()
}

/// Parenthesis depth at byte offset `pos`, ignoring parentheses inside
/// single-quoted literals
fn depth_at(sql: &str, pos: usize) -> i32 {
    let mut depth = 0;
    let mut in_literal = false;
    for c in sql[..pos].chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => depth -= 1,
            _ => {}
        }
    }
    depth
}

/// First match of `pattern` outside any parenthesized subexpression
fn find_top_level(pattern: &Regex, sql: &str) -> Option<(usize, usize)> {
    pattern
        .find_iter(sql)
        .find(|m| depth_at(sql, m.start()) == 0)
        .map(|m| (m.start(), m.end()))
}

/// Positional `?` placeholders outside single-quoted literals
pub fn placeholder_count(sql: &str) -> usize {
    let mut in_literal = false;
    sql.chars()
        .filter(|c| {
            if *c == '\'' {
                in_literal = !in_literal;
            }
            *c == '?' && !in_literal
        })
        .count()
}

/// Number of `<access_column> LIKE ?` predicates after the top-level WHERE.
/// Literal filters on the column do not count: only a bound placeholder
/// restricts scope.
pub fn scope_filter_count(sql: &str, access_column: &str) -> usize {
    let Some((_, where_end)) = find_top_level(&WHERE_TOKEN, sql) else {
        return 0;
    };
    scope_pattern(access_column)
        .map(|p| p.find_iter(&sql[where_end..]).count())
        .unwrap_or(0)
}

/// Whether `sql` already restricts on `access_column` through a placeholder
pub fn has_scope_filter(sql: &str, access_column: &str) -> bool {
    scope_filter_count(sql, access_column) > 0
}

/// Add `<access_column> LIKE ?` to the statement. Returns the rewritten SQL
/// and whether a placeholder was added.
///
/// Existing WHERE: the predicate goes right after the keyword and the old
/// condition is parenthesized behind AND, so an OR in it cannot widen the
/// scope. Otherwise a new WHERE is placed before GROUP BY / ORDER BY / LIMIT,
/// or at the end. Only top-level clauses are considered; keywords inside a
/// subquery are left alone.
pub fn inject_scope_filter(sql: &str, access_column: &str) -> (String, bool) {
    if has_scope_filter(sql, access_column) {
        return (sql.to_string(), false);
    }

    let predicate = scope_predicate(access_column);
    let (body, terminator) = split_terminator(sql);

    if let Some((where_start, where_end)) = find_top_level(&WHERE_TOKEN, body) {
        let rest = &body[where_end..];
        let condition_end = TRAILING_CLAUSES
            .iter()
            .filter_map(|clause| find_top_level(clause, rest).map(|(start, _)| start))
            .min()
            .unwrap_or(rest.len());
        let tail = rest[condition_end..].trim();
        let rewritten = format!(
            "{}WHERE {} AND ({}){}{}{}",
            &body[..where_start],
            predicate,
            rest[..condition_end].trim(),
            if tail.is_empty() { "" } else { " " },
            tail,
            terminator
        );
        return (rewritten, true);
    }

    for clause in TRAILING_CLAUSES.iter() {
        if let Some((start, _)) = find_top_level(clause, body) {
            let rewritten = format!(
                "{} WHERE {} {}{}",
                body[..start].trim_end(),
                predicate,
                &body[start..],
                terminator
            );
            return (rewritten, true);
        }
    }

    (format!("{} WHERE {}{}", body.trim_end(), predicate, terminator), true)
}

/// Append `LIMIT n` unless the statement already has a top-level LIMIT
pub fn add_limit_if_missing(sql: &str, limit: usize) -> String {
    if find_top_level(&LIMIT_TOKEN, sql).is_some() {
        return sql.to_string();
    }
    let (body, _) = split_terminator(sql);
    format!("{} LIMIT {};", body.trim_end(), limit)
}

/// Split a trailing `;` (and surrounding whitespace) off the statement
fn split_terminator(sql: &str) -> (&str, &'static str) {
    let trimmed = sql.trim_end();
    match trimmed.strip_suffix(';') {
        Some(body) => (body.trim_end(), ";"),
        None => (trimmed, ""),
    }
}
