//! Typed argument parsing and validation.
//!
//! Each raw token is checked against a [`ParameterDefinition`] and converted
//! into a JSON value, so handlers receive `i64`/`f64`/`bool`/string values
//! instead of raw text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::schema::{ParameterDefinition, TypeCatalog};

/// Why a token failed to parse.
#[derive(Debug, Error)]
pub enum TypeError {
    /// A required parameter was not supplied.
    #[error("missing required value for '{0}'")]
    Missing(String),
    /// The token does not satisfy the declared type.
    #[error("'{value}' is not a valid {expected}")]
    Invalid {
        /// The offending token.
        value: String,
        /// The type that was expected.
        expected: String,
    },
    /// A list bound fewer items than the declared minimum.
    #[error("'{name}' needs at least {min} values")]
    TooFew {
        /// Parameter name.
        name: String,
        /// Declared minimum.
        min: usize,
    },
    /// A list bound more items than the declared maximum.
    #[error("'{name}' accepts at most {max} values")]
    TooMany {
        /// Parameter name.
        name: String,
        /// Declared maximum.
        max: usize,
    },
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("literal pattern compiles")
    })
}

/// Parses raw tokens against parameter definitions using the type catalog.
#[derive(Debug, Clone)]
pub struct TypeParser {
    catalog: TypeCatalog,
}

impl TypeParser {
    /// Build a parser over the given catalog.
    pub fn new(catalog: TypeCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog backing this parser.
    pub fn catalog(&self) -> &TypeCatalog {
        &self.catalog
    }

    /// Parse `raw` against `def`, applying optionality, list splitting,
    /// range expansion, and deduplication.
    pub fn parse(&self, raw: Option<&str>, def: &ParameterDefinition) -> Result<Value, TypeError> {
        let raw = match raw {
            Some(token) => token,
            None => {
                if def.can_be_absent() {
                    return Ok(def.default.clone().unwrap_or(Value::Null));
                }
                return Err(TypeError::Missing(def.name.clone()));
            }
        };

        if def.is_list {
            return self.parse_list(raw, def);
        }
        self.parse_one(raw, &def.type_name)
    }

    /// Parse a single (non-list) token against a type expression.
    pub fn parse_one(&self, raw: &str, type_expr: &str) -> Result<Value, TypeError> {
        // Union: attempt each branch left-to-right, first success wins.
        if type_expr.contains('|') {
            for branch in type_expr.split('|') {
                if let Ok(value) = self.parse_one(raw, branch.trim()) {
                    return Ok(value);
                }
            }
            return Err(TypeError::Invalid {
                value: raw.to_owned(),
                expected: type_expr.to_owned(),
            });
        }
        self.parse_named(raw, type_expr)
    }

    fn parse_list(&self, raw: &str, def: &ParameterDefinition) -> Result<Value, TypeError> {
        let mut items: Vec<Value> = Vec::new();
        for token in split_list(raw) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if self.base_type_of(&def.type_name) == "int" {
                if let Some(range) = parse_int_range(token) {
                    for n in range {
                        items.push(Value::from(n));
                    }
                    continue;
                }
            }
            items.push(self.parse_one(token, &def.type_name)?);
        }

        // Dedup preserving first occurrence.
        let mut deduped: Vec<Value> = Vec::new();
        for item in items {
            if !deduped.contains(&item) {
                deduped.push(item);
            }
        }

        if let Some(min) = def.min {
            if deduped.len() < min {
                return Err(TypeError::TooFew {
                    name: def.name.clone(),
                    min,
                });
            }
        }
        if let Some(max) = def.max {
            if deduped.len() > max {
                return Err(TypeError::TooMany {
                    name: def.name.clone(),
                    max,
                });
            }
        }
        Ok(Value::Array(deduped))
    }

    /// Resolve a derived type down to its base type name.
    fn base_type_of<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        // Bounded walk guards against a cyclic catalog.
        for _ in 0..8 {
            match self.catalog.get(current).and_then(|t| t.derived_from.as_deref()) {
                Some(base) => current = base,
                None => break,
            }
        }
        current
    }

    fn parse_named(&self, raw: &str, name: &str) -> Result<Value, TypeError> {
        let invalid = || TypeError::Invalid {
            value: raw.to_owned(),
            expected: name.to_owned(),
        };

        match name {
            "int" => raw
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid()),
            "float" => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from)
                .ok_or_else(invalid),
            "bool" => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(invalid()),
            },
            "word" => {
                if !raw.is_empty() && !raw.chars().any(char::is_whitespace) {
                    Ok(Value::from(raw))
                } else {
                    Err(invalid())
                }
            }
            "string" | "Arguments" | "any" => Ok(Value::from(raw)),
            "*" => {
                if raw == "*" {
                    Ok(Value::from("*"))
                } else {
                    Err(invalid())
                }
            }
            "date" => chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(|_| Value::from(raw))
                .map_err(|_| invalid()),
            "time" => chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S")
                .or_else(|_| chrono::NaiveTime::parse_from_str(raw, "%H:%M"))
                .map(|_| Value::from(raw))
                .map_err(|_| invalid()),
            "datetime" => chrono::DateTime::parse_from_rfc3339(raw)
                .map(|_| Value::from(raw))
                .map_err(|_| invalid()),
            "email" => {
                if email_regex().is_match(raw) {
                    Ok(Value::from(raw))
                } else {
                    Err(invalid())
                }
            }
            derived => self.parse_derived(raw, derived),
        }
    }

    fn parse_derived(&self, raw: &str, name: &str) -> Result<Value, TypeError> {
        let invalid = || TypeError::Invalid {
            value: raw.to_owned(),
            expected: name.to_owned(),
        };
        let def = self.catalog.get(name).ok_or_else(invalid)?;
        let base = def.derived_from.as_deref().unwrap_or("string");
        let value = self.parse_named(raw, base)?;

        let suffix_ok = match name {
            "GroupId" => raw.ends_with("@g.us"),
            "UserId" => raw.ends_with("@s.whatsapp.net"),
            "Role" | "Service" | "Command" | "Setting" => {
                !raw.is_empty() && !raw.chars().any(char::is_whitespace)
            }
            _ => true,
        };
        if suffix_ok {
            Ok(value)
        } else {
            Err(invalid())
        }
    }
}

/// Split a comma-list, honouring `\,` escapes of the delimiter.
fn split_list(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for ch in raw.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == ',' {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    if escaped {
        current.push('\\');
    }
    parts.push(current);
    parts
}

/// Expand `N-M` into the inclusive integer range, ascending or descending.
fn parse_int_range(token: &str) -> Option<Vec<i64>> {
    // Split at a '-' that is not the leading sign.
    let split_at = token.char_indices().skip(1).find(|(_, c)| *c == '-')?.0;
    let (left, right) = token.split_at(split_at);
    let start: i64 = left.parse().ok()?;
    let end: i64 = right.get(1..)?.parse().ok()?;
    if start <= end {
        Some((start..=end).collect())
    } else {
        Some((end..=start).rev().collect())
    }
}
