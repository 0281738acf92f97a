//! Label and field selectors used to filter list and watch results

use crate::{Result, StorageError};
use example_core::DynamicObject;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let get = |key: &str| labels.and_then(|l| l.get(key));
        match self {
            Requirement::Equals(k, v) => get(k) == Some(v),
            Requirement::NotEquals(k, v) => get(k) != Some(v),
            Requirement::In(k, values) => get(k).is_some_and(|v| values.contains(v)),
            Requirement::NotIn(k, values) => get(k).is_none_or(|v| !values.contains(v)),
            Requirement::Exists(k) => get(k).is_some(),
            Requirement::DoesNotExist(k) => get(k).is_none(),
        }
    }
}

/// A parsed label selector, e.g. `tier=frontend,env in (prod,staging),!legacy`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
    source: String,
}

impl LabelSelector {
    /// Selector that matches everything
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in split_terms(selector)? {
            requirements.push(parse_requirement(&term)?);
        }
        Ok(Self {
            requirements,
            source: selector.trim().to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on commas outside of parentheses
fn split_terms(selector: &str) -> Result<Vec<String>> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in selector.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    StorageError::bad_request(format!("unbalanced parentheses in selector {:?}", selector))
                })?;
                current.push(c);
            }
            ',' if depth == 0 => terms.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err(StorageError::bad_request(format!(
            "unbalanced parentheses in selector {:?}",
            selector
        )));
    }
    terms.push(current);

    let terms: Vec<String> = terms.into_iter().map(|t| t.trim().to_string()).collect();
    if terms.len() == 1 && terms[0].is_empty() {
        return Ok(Vec::new());
    }
    if terms.iter().any(|t| t.is_empty()) {
        return Err(StorageError::bad_request(format!(
            "empty requirement in selector {:?}",
            selector
        )));
    }
    Ok(terms)
}

fn parse_requirement(term: &str) -> Result<Requirement> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(label_key(key)?));
    }

    if let Some((key, rest)) = split_keyword(term, " notin ") {
        return Ok(Requirement::NotIn(label_key(key)?, value_set(rest)?));
    }
    if let Some((key, rest)) = split_keyword(term, " in ") {
        return Ok(Requirement::In(label_key(key)?, value_set(rest)?));
    }

    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(label_key(key)?, label_value(value)?));
    }
    if let Some((key, value)) = term.split_once("==") {
        return Ok(Requirement::Equals(label_key(key)?, label_value(value)?));
    }
    if let Some((key, value)) = term.split_once('=') {
        return Ok(Requirement::Equals(label_key(key)?, label_value(value)?));
    }

    Ok(Requirement::Exists(label_key(term)?))
}

fn split_keyword<'a>(term: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let idx = term.find(keyword)?;
    Some((&term[..idx], &term[idx + keyword.len()..]))
}

fn value_set(rest: &str) -> Result<Vec<String>> {
    let inner = rest
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| StorageError::bad_request(format!("expected a parenthesized value set, got {:?}", rest)))?;

    inner
        .split(',')
        .map(label_value)
        .collect::<Result<Vec<_>>>()
}

fn label_key(key: &str) -> Result<String> {
    let key = key.trim();
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
    if !valid {
        return Err(StorageError::bad_request(format!("invalid label key {:?}", key)));
    }
    Ok(key.to_string())
}

fn label_value(value: &str) -> Result<String> {
    let value = value.trim();
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(StorageError::bad_request(format!("invalid label value {:?}", value)));
    }
    Ok(value.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Namespace,
}

impl Field {
    fn get<'a>(&self, object: &'a DynamicObject) -> &'a str {
        match self {
            Field::Name => object.name().unwrap_or_default(),
            Field::Namespace => object.namespace().unwrap_or_default(),
        }
    }
}

/// A parsed field selector. Only `metadata.name` and `metadata.namespace` are indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<(Field, bool, String)>,
    source: String,
}

impl FieldSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(selector: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for term in split_terms(selector)? {
            let (field, equals, value) = if let Some((f, v)) = term.split_once("!=") {
                (f, false, v)
            } else if let Some((f, v)) = term.split_once("==") {
                (f, true, v)
            } else if let Some((f, v)) = term.split_once('=') {
                (f, true, v)
            } else {
                return Err(StorageError::bad_request(format!(
                    "invalid field selector term {:?}",
                    term
                )));
            };

            let field = match field.trim() {
                "metadata.name" => Field::Name,
                "metadata.namespace" => Field::Namespace,
                other => {
                    return Err(StorageError::bad_request(format!(
                        "field label not supported: {}",
                        other
                    )))
                }
            };
            requirements.push((field, equals, value.trim().to_string()));
        }

        Ok(Self {
            requirements,
            source: selector.trim().to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, object: &DynamicObject) -> bool {
        self.requirements
            .iter()
            .all(|(field, equals, value)| (field.get(object) == value) == *equals)
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
