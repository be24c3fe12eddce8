//! Placeholder expansion for definition templates
//!
//! Templates are plain JSON. Any string may contain `${parameter.<path>}` or
//! `${context.<key>}` references. A string consisting of exactly one reference is
//! replaced by the referenced JSON value, keeping its type; otherwise references
//! are interpolated as text and must resolve to scalars.

use crate::error::TemplateError;
use serde_json::Value;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Values visible to a template
pub struct TemplateScope<'a> {
    pub parameter: &'a Value,
    pub context: &'a Value,
}

impl<'a> TemplateScope<'a> {
    pub fn new(parameter: &'a Value, context: &'a Value) -> Self {
        Self { parameter, context }
    }

    fn lookup(&self, path: &str) -> Result<&'a Value, TemplateError> {
        let mut segments = path.split('.');
        let root = match segments.next() {
            Some("parameter") => self.parameter,
            Some("context") => self.context,
            _ => return Err(TemplateError::UnboundReference(path.to_string())),
        };

        let mut current = root;
        for segment in segments {
            if segment.is_empty() {
                return Err(TemplateError::Malformed(path.to_string()));
            }
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| TemplateError::UnboundReference(path.to_string()))?;
        }
        Ok(current)
    }
}

/// Expand every placeholder inside `template`.
pub fn expand(template: &Value, scope: &TemplateScope<'_>) -> Result<Value, TemplateError> {
    match template {
        Value::String(s) => expand_string(s, scope),
        Value::Array(items) => items
            .iter()
            .map(|item| expand(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), expand(value, scope)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn expand_string(s: &str, scope: &TemplateScope<'_>) -> Result<Value, TemplateError> {
    if !s.contains(OPEN) {
        return Ok(Value::String(s.to_string()));
    }

    // whole-value reference keeps the referenced type
    if let Some(path) = sole_reference(s) {
        return scope.lookup(path).cloned();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let end = after
            .find(CLOSE)
            .ok_or_else(|| TemplateError::Malformed(s.to_string()))?;
        let path = after[..end].trim();
        if path.is_empty() {
            return Err(TemplateError::Malformed(s.to_string()));
        }

        match scope.lookup(path)? {
            Value::String(v) => out.push_str(v),
            Value::Number(n) => out.push_str(&n.to_string()),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            _ => return Err(TemplateError::NonScalarInterpolation(path.to_string())),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn sole_reference(s: &str) -> Option<&str> {
    let inner = s.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    let path = inner.trim();
    (!path.is_empty()).then_some(path)
}
