// src/event/filter.rs

//! LDAP-style service filters
//!
//! A small subset of RFC 1960 sufficient for service selection: equality,
//! presence (`attr=*`), and the `&`, `|`, `!` combinators, e.g.
//! `(&(objectClass=db.Driver)(|(vendor=acme)(!(tier=dev))))`.
//! The pseudo-attribute `objectClass` matches against the registered
//! interface names.

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

const OBJECT_CLASS: &str = "objectClass";

/// A parsed service filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceFilter {
    And(Vec<ServiceFilter>),
    Or(Vec<ServiceFilter>),
    Not(Box<ServiceFilter>),
    Equals { attribute: String, value: String },
    Present { attribute: String },
}

impl ServiceFilter {
    /// Parse a filter expression
    pub fn parse(input: &str) -> Result<Self> {
        let mut parser = Parser {
            input: input.trim(),
            pos: 0,
        };
        let filter = parser.parse_filter()?;
        if parser.pos != parser.input.len() {
            return Err(Error::InvalidFilter(format!(
                "trailing characters after filter in '{}'",
                input
            )));
        }
        Ok(filter)
    }

    /// Evaluate against a service's interfaces and properties
    pub fn matches(&self, interfaces: &[String], properties: &BTreeMap<String, Value>) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(interfaces, properties)),
            Self::Or(children) => children.iter().any(|c| c.matches(interfaces, properties)),
            Self::Not(child) => !child.matches(interfaces, properties),
            Self::Present { attribute } => {
                attribute.eq_ignore_ascii_case(OBJECT_CLASS)
                    || properties.contains_key(attribute)
            }
            Self::Equals { attribute, value } => {
                if attribute.eq_ignore_ascii_case(OBJECT_CLASS) {
                    return interfaces.iter().any(|i| i == value);
                }
                properties
                    .get(attribute)
                    .is_some_and(|v| value_equals(v, value))
            }
        }
    }
}

/// Compare a JSON property value with a filter literal
fn value_equals(value: &Value, literal: &str) -> bool {
    match value {
        Value::String(s) => s == literal,
        Value::Bool(b) => literal.parse::<bool>() == Ok(*b),
        Value::Number(n) => literal
            .parse::<f64>()
            .is_ok_and(|parsed| n.as_f64() == Some(parsed)),
        Value::Array(items) => items.iter().any(|v| value_equals(v, literal)),
        _ => false,
    }
}

impl fmt::Display for ServiceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(children) => {
                write!(f, "(&")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Self::Or(children) => {
                write!(f, "(|")?;
                for child in children {
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            Self::Not(child) => write!(f, "(!{})", child),
            Self::Equals { attribute, value } => write!(f, "({}={})", attribute, value),
            Self::Present { attribute } => write!(f, "({}=*)", attribute),
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn parse_filter(&mut self) -> Result<ServiceFilter> {
        self.expect('(')?;
        let filter = match self.peek() {
            Some('&') => {
                self.pos += 1;
                ServiceFilter::And(self.parse_children()?)
            }
            Some('|') => {
                self.pos += 1;
                ServiceFilter::Or(self.parse_children()?)
            }
            Some('!') => {
                self.pos += 1;
                ServiceFilter::Not(Box::new(self.parse_filter()?))
            }
            _ => self.parse_comparison()?,
        };
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_children(&mut self) -> Result<Vec<ServiceFilter>> {
        let mut children = Vec::new();
        while self.peek() == Some('(') {
            children.push(self.parse_filter()?);
        }
        if children.is_empty() {
            return Err(Error::InvalidFilter(format!(
                "combinator without operands in '{}'",
                self.input
            )));
        }
        Ok(children)
    }

    fn parse_comparison(&mut self) -> Result<ServiceFilter> {
        let attribute = self.take_until(&['=', ')'])?;
        if attribute.is_empty() {
            return Err(Error::InvalidFilter(format!(
                "empty attribute at position {} in '{}'",
                self.pos, self.input
            )));
        }
        self.expect('=')?;
        let value = self.take_until(&[')'])?;

        if value == "*" {
            Ok(ServiceFilter::Present { attribute })
        } else {
            Ok(ServiceFilter::Equals { attribute, value })
        }
    }

    fn take_until(&mut self, stops: &[char]) -> Result<String> {
        let rest = &self.input[self.pos..];
        let end = rest
            .char_indices()
            .find(|(_, c)| stops.contains(c))
            .map(|(i, _)| i)
            .ok_or_else(|| {
                Error::InvalidFilter(format!("unterminated expression in '{}'", self.input))
            })?;
        self.pos += end;
        Ok(rest[..end].trim().to_string())
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += expected.len_utf8();
                Ok(())
            }
            other => Err(Error::InvalidFilter(format!(
                "expected '{}' at position {} in '{}', found {:?}",
                expected, self.pos, self.input, other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_equality_match() {
        let filter = ServiceFilter::parse("(vendor=acme)").unwrap();
        assert!(filter.matches(&[], &props(&[("vendor", json!("acme"))])));
        assert!(!filter.matches(&[], &props(&[("vendor", json!("other"))])));
        assert!(!filter.matches(&[], &props(&[])));
    }

    #[test]
    fn test_object_class_matches_interfaces() {
        let filter = ServiceFilter::parse("(objectClass=db.Driver)").unwrap();
        let interfaces = vec!["db.Driver".to_string(), "db.Pool".to_string()];
        assert!(filter.matches(&interfaces, &props(&[])));
        assert!(!filter.matches(&["other.Api".to_string()], &props(&[])));
    }

    #[test]
    fn test_presence() {
        let filter = ServiceFilter::parse("(vendor=*)").unwrap();
        assert!(filter.matches(&[], &props(&[("vendor", json!("anything"))])));
        assert!(!filter.matches(&[], &props(&[])));
    }

    #[test]
    fn test_and_or_not() {
        let filter =
            ServiceFilter::parse("(&(vendor=acme)(|(tier=prod)(!(region=eu))))").unwrap();
        assert!(filter.matches(
            &[],
            &props(&[("vendor", json!("acme")), ("tier", json!("prod"))])
        ));
        assert!(filter.matches(
            &[],
            &props(&[("vendor", json!("acme")), ("region", json!("us"))])
        ));
        assert!(!filter.matches(
            &[],
            &props(&[("vendor", json!("acme")), ("region", json!("eu"))])
        ));
    }

    #[test]
    fn test_numeric_and_bool_values() {
        let filter = ServiceFilter::parse("(port=8080)").unwrap();
        assert!(filter.matches(&[], &props(&[("port", json!(8080))])));

        let filter = ServiceFilter::parse("(secure=true)").unwrap();
        assert!(filter.matches(&[], &props(&[("secure", json!(true))])));
    }

    #[test]
    fn test_array_value_matches_any_element() {
        let filter = ServiceFilter::parse("(tag=fast)").unwrap();
        assert!(filter.matches(&[], &props(&[("tag", json!(["slow", "fast"]))])));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(ServiceFilter::parse("vendor=acme").is_err());
        assert!(ServiceFilter::parse("(vendor=acme").is_err());
        assert!(ServiceFilter::parse("(&)").is_err());
        assert!(ServiceFilter::parse("(=x)").is_err());
        assert!(ServiceFilter::parse("(a=b)(c=d)").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let text = "(&(objectClass=db.Driver)(vendor=acme))";
        let filter = ServiceFilter::parse(text).unwrap();
        assert_eq!(filter.to_string(), text);
        assert_eq!(ServiceFilter::parse(&filter.to_string()).unwrap(), filter);
    }
}
