// src/manifest/parser.rs

//! Low-level parsing of manifest header values
//!
//! A header value is a comma-separated list of clauses. Each clause has one
//! or more paths (package or module names) followed by `;`-separated
//! parameters: `key=value` attributes and `key:=value` directives. Values
//! may be double-quoted to protect embedded commas and semicolons, e.g.
//! `pkg.a;version="[1.0,2.0)"`.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// One parsed clause of a manifest header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    /// Package or module names this clause applies to
    pub paths: Vec<String>,
    /// `key=value` attributes (e.g. `version`)
    pub attributes: HashMap<String, String>,
    /// `key:=value` directives (e.g. `include`, `exclude`)
    pub directives: HashMap<String, String>,
}

impl Clause {
    /// Get an attribute value by name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Get a directive value by name
    pub fn directive(&self, name: &str) -> Option<&str> {
        self.directives.get(name).map(String::as_str)
    }
}

/// Parse a full header value into clauses
pub fn parse_clauses(value: &str) -> Result<Vec<Clause>> {
    let mut clauses = Vec::new();
    for raw in split_quoted(value, ',')? {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        clauses.push(parse_clause(raw)?);
    }
    Ok(clauses)
}

fn parse_clause(raw: &str) -> Result<Clause> {
    let mut clause = Clause::default();

    for segment in split_quoted(raw, ';')? {
        let segment = segment.trim();
        if segment.is_empty() {
            return Err(Error::MalformedManifest(format!(
                "empty segment in clause '{}'",
                raw
            )));
        }

        // Directives use `:=`, attributes plain `=`; paths have neither.
        if let Some(eq) = find_unquoted(segment, '=') {
            let (key, value) = segment.split_at(eq);
            let value = unquote(value[1..].trim());
            if let Some(key) = key.trim().strip_suffix(':') {
                clause.directives.insert(key.trim().to_string(), value);
            } else {
                clause.attributes.insert(key.trim().to_string(), value);
            }
        } else {
            if !clause.attributes.is_empty() || !clause.directives.is_empty() {
                return Err(Error::MalformedManifest(format!(
                    "path '{}' after parameters in clause '{}'",
                    segment, raw
                )));
            }
            clause.paths.push(segment.to_string());
        }
    }

    if clause.paths.is_empty() {
        return Err(Error::MalformedManifest(format!(
            "clause '{}' has no path",
            raw
        )));
    }

    Ok(clause)
}

/// Split on a separator, ignoring separators inside double quotes
fn split_quoted(s: &str, sep: char) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in s.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            c if c == sep && !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(Error::MalformedManifest(format!(
            "unterminated quote in '{}'",
            s
        )));
    }

    parts.push(current);
    Ok(parts)
}

/// Find the position of a character outside double quotes
fn find_unquoted(s: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c == needle && !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

/// Strip surrounding double quotes, if present
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_path() {
        let clauses = parse_clauses("pkg.a").unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].paths, vec!["pkg.a"]);
        assert!(clauses[0].attributes.is_empty());
    }

    #[test]
    fn test_multiple_clauses() {
        let clauses = parse_clauses("pkg.a, pkg.b;version=1.0").unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].paths, vec!["pkg.a"]);
        assert_eq!(clauses[1].attribute("version"), Some("1.0"));
    }

    #[test]
    fn test_quoted_value_with_comma() {
        let clauses = parse_clauses(r#"pkg.a;version="[1.0,2.0)""#).unwrap();
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].attribute("version"), Some("[1.0,2.0)"));
    }

    #[test]
    fn test_directive_vs_attribute() {
        let clauses =
            parse_clauses(r#"lazy;include:="pkg.a,pkg.b";exclude:="pkg.a.impl""#).unwrap();
        let clause = &clauses[0];
        assert_eq!(clause.paths, vec!["lazy"]);
        assert_eq!(clause.directive("include"), Some("pkg.a,pkg.b"));
        assert_eq!(clause.directive("exclude"), Some("pkg.a.impl"));
        assert!(clause.attributes.is_empty());
    }

    #[test]
    fn test_multiple_paths_share_parameters() {
        let clauses = parse_clauses("pkg.a;pkg.b;version=2.0").unwrap();
        assert_eq!(clauses[0].paths, vec!["pkg.a", "pkg.b"]);
        assert_eq!(clauses[0].attribute("version"), Some("2.0"));
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        assert!(parse_clauses(r#"pkg.a;version="[1.0,2.0)"#).is_err());
    }

    #[test]
    fn test_path_after_parameters_rejected() {
        assert!(parse_clauses("pkg.a;version=1.0;pkg.b").is_err());
    }

    #[test]
    fn test_empty_clause_skipped() {
        let clauses = parse_clauses("pkg.a,,pkg.b").unwrap();
        assert_eq!(clauses.len(), 2);
    }
}
