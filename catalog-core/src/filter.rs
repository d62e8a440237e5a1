//! The list-endpoint filter grammar.
//!
//! Conjunctions of `field OP value` with `OP` one of `=`, `!=`, `>`, `<`,
//! `>=`, `<=`, `LIKE`, joined by a case-insensitive ` AND `. Values are
//! quoted with `'` or `"`; `LIKE` uses `%` wildcards and matches
//! case-insensitively. The surface is deliberately small; richer filters
//! belong behind a capability flag.

use crate::error::CoreError;
use crate::record::Record;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A parsed conjunction of clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterQuery {
    pub clauses: Vec<FilterClause>,
}

/// Splits on a case-insensitive ` AND ` outside quotes.
fn split_conjunctions(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) if c == q => {
                quote = None;
                current.push(c);
                i += 1;
            }
            Some(_) => {
                current.push(c);
                i += 1;
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                    current.push(c);
                    i += 1;
                } else if chars[i..].len() >= 5
                    && chars[i].is_whitespace()
                    && chars[i + 1..i + 4]
                        .iter()
                        .collect::<String>()
                        .eq_ignore_ascii_case("and")
                    && chars[i + 4].is_whitespace()
                {
                    parts.push(current.clone());
                    current.clear();
                    i += 5;
                } else {
                    current.push(c);
                    i += 1;
                }
            }
        }
    }
    parts.push(current);
    parts
}

fn parse_clause(input: &str) -> Result<FilterClause, CoreError> {
    let input = input.trim();
    // Operators are only recognised left of the first quote, so quoted
    // values may contain operator characters. Two-character operators must
    // be tried before their one-character prefixes.
    const OPS: [(&str, FilterOp); 7] = [
        ("!=", FilterOp::Ne),
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        ("=", FilterOp::Eq),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
        (" LIKE ", FilterOp::Like),
    ];
    let search_end = input
        .find(|c| c == '\'' || c == '"')
        .unwrap_or(input.len());
    let head = &input[..search_end];
    for (token, op) in OPS {
        let idx = if op == FilterOp::Like {
            head.to_uppercase().find(token)
        } else {
            head.find(token)
        };
        if let Some(idx) = idx {
            let field = input[..idx].trim();
            let raw_value = input[idx + token.len()..].trim();
            if field.is_empty() {
                return Err(CoreError::invalid(format!(
                    "filter clause '{input}' is missing a field"
                )));
            }
            return Ok(FilterClause {
                field: field.to_string(),
                op,
                value: parse_value(raw_value)?,
            });
        }
    }
    Err(CoreError::invalid(format!(
        "filter clause '{input}' has no operator"
    )))
}

fn parse_value(raw: &str) -> Result<Value, CoreError> {
    if raw.is_empty() {
        return Err(CoreError::invalid("filter value must not be empty"));
    }
    let bytes = raw.as_bytes();
    if (bytes[0] == b'\'' || bytes[0] == b'"') && bytes.len() >= 2 {
        if bytes[bytes.len() - 1] != bytes[0] {
            return Err(CoreError::invalid(format!("unterminated quote in '{raw}'")));
        }
        return Ok(Value::String(raw[1..raw.len() - 1].to_string()));
    }
    if let Ok(b) = raw.parse::<bool>() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(d) = raw.parse::<f64>() {
        return Ok(Value::from(d));
    }
    Ok(Value::String(raw.to_string()))
}

fn like_matches(pattern: &str, candidate: &str) -> bool {
    let escaped = regex::escape(&pattern.to_lowercase()).replace("%", ".*");
    match regex::Regex::new(&format!("^{escaped}$")) {
        Ok(re) => re.is_match(&candidate.to_lowercase()),
        Err(_) => false,
    }
}

fn compare_numbers(a: f64, b: f64, op: FilterOp) -> bool {
    match op {
        FilterOp::Gt => a > b,
        FilterOp::Lt => a < b,
        FilterOp::Ge => a >= b,
        FilterOp::Le => a <= b,
        _ => false,
    }
}

impl FilterClause {
    fn matches_value(&self, actual: &Value) -> bool {
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(candidate), Some(pattern)) => like_matches(pattern, candidate),
                _ => false,
            },
            FilterOp::Gt | FilterOp::Lt | FilterOp::Ge | FilterOp::Le => {
                match (actual.as_f64(), self.value.as_f64()) {
                    (Some(a), Some(b)) => compare_numbers(a, b, self.op),
                    // Ordered comparison falls back to lexicographic strings.
                    _ => match (actual.as_str(), self.value.as_str()) {
                        (Some(a), Some(b)) => compare_numbers(
                            if a < b { -1.0 } else if a > b { 1.0 } else { 0.0 },
                            0.0,
                            self.op,
                        ),
                        _ => false,
                    },
                }
            }
        }
    }
}

impl FilterQuery {
    pub fn parse(input: &str) -> Result<FilterQuery, CoreError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(FilterQuery::default());
        }
        let clauses = split_conjunctions(input)
            .into_iter()
            .map(|part| parse_clause(&part))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterQuery { clauses })
    }

    /// True when every clause matches the record.
    pub fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|clause| {
            record
                .field(&clause.field)
                .map(|actual| clause.matches_value(&actual))
                .unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}
