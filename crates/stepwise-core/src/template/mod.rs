//! Template references between steps.
//!
//! Two forms are recognised inside parameter values:
//! - whole-value: the string is exactly `$step<ID>.<field>[.<segment>...]`.
//!   It is replaced by the referenced value, keeping its shape (list, map or
//!   scalar).
//! - inline: `{$step<ID>.<field>}` embedded in a longer string. Only scalars
//!   are interpolated; a list, map or null target is an error.
//!
//! Segments after the field navigate maps by key and lists by index.
//! Step ids usable in references consist of ASCII alphanumerics, `_` and `-`.
//!
//! Resolution is pure: the same value resolved against an unchanged context
//! always yields identical output.

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::types::{StepId, StepStatus};

pub const REFERENCE_PREFIX: &str = "$step";

/// A parsed `$step<ID>.<field>...` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateRef {
    pub step_id: StepId,
    pub field: String,
    /// Navigation below `field`
    pub path: Vec<String>,
}

impl TemplateRef {
    pub fn new(step_id: impl Into<StepId>, field: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            field: field.into(),
            path: Vec::new(),
        }
    }

    pub fn with_path(mut self, path: Vec<String>) -> Self {
        self.path = path;
        self
    }

    /// `field` plus any nested segments, dot-joined.
    pub fn field_path(&self) -> String {
        let mut out = self.field.clone();
        for segment in &self.path {
            out.push('.');
            out.push_str(segment);
        }
        out
    }

    /// Canonical whole-value token.
    pub fn token(&self) -> String {
        format!("{}{}.{}", REFERENCE_PREFIX, self.step_id, self.field_path())
    }

    /// Canonical inline token.
    pub fn inline_token(&self) -> String {
        format!("{{{}}}", self.token())
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceForm {
    Whole,
    Inline,
}

/// Where a reference occurs inside a step's parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSite {
    /// Top-level parameter key containing the reference
    pub param: String,
    pub form: ReferenceForm,
    pub reference: TemplateRef,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("reference '{reference}' points at step '{step}' which has no result")]
    MissingResult { reference: String, step: StepId },

    #[error("reference '{reference}' points at step '{step}' which ended as {status}")]
    StepNotCompleted {
        reference: String,
        step: StepId,
        status: StepStatus,
    },

    #[error("reference '{reference}': field '{field}' is absent from the output of step '{step}'")]
    MissingField {
        reference: String,
        step: StepId,
        field: String,
    },

    #[error("inline reference '{reference}' resolves to a {kind}; only scalars can be interpolated")]
    NonScalarInline {
        reference: String,
        kind: &'static str,
    },

    #[error("unresolved reference '{0}' remains after resolution")]
    Unresolved(String),
}

pub(crate) fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parse a canonical token at the start of `input`, returning the reference
/// and the number of bytes it spans.
pub(crate) fn parse_token(input: &str) -> Option<(TemplateRef, usize)> {
    let rest = input.strip_prefix(REFERENCE_PREFIX)?;
    let id_len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
    if id_len == 0 {
        return None;
    }

    let mut consumed = REFERENCE_PREFIX.len() + id_len;
    let mut cursor = &rest[id_len..];
    let mut segments = Vec::new();
    while let Some(after_dot) = cursor.strip_prefix('.') {
        let seg_len = after_dot
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(after_dot.len());
        if seg_len == 0 {
            break;
        }
        segments.push(after_dot[..seg_len].to_string());
        consumed += 1 + seg_len;
        cursor = &after_dot[seg_len..];
    }

    let mut segments = segments.into_iter();
    let field = segments.next()?;
    let reference = TemplateRef::new(&rest[..id_len], field).with_path(segments.collect());
    Some((reference, consumed))
}

/// The reference if `value` is exactly one whole-value token.
pub fn parse_whole(value: &str) -> Option<TemplateRef> {
    match parse_token(value) {
        Some((reference, len)) if len == value.len() => Some(reference),
        _ => None,
    }
}

/// Inline `{$step...}` spans as `(start, end_exclusive, reference)`.
pub(crate) fn inline_spans(input: &str) -> Vec<(usize, usize, TemplateRef)> {
    let mut spans = Vec::new();
    let mut offset = 0;
    while let Some(pos) = input[offset..].find("{$step") {
        let start = offset + pos;
        let token_start = start + 1;
        if let Some((reference, len)) = parse_token(&input[token_start..]) {
            let close = token_start + len;
            if input[close..].starts_with('}') {
                spans.push((start, close + 1, reference));
                offset = close + 1;
                continue;
            }
        }
        offset = token_start;
    }
    spans
}

/// Every canonical reference inside `params`, in key order.
pub fn collect_references(params: &Map<String, Value>) -> Vec<ReferenceSite> {
    let mut sites = Vec::new();
    for (key, value) in params {
        collect_from_value(key, value, &mut sites);
    }
    sites
}

fn collect_from_value(param: &str, value: &Value, sites: &mut Vec<ReferenceSite>) {
    match value {
        Value::String(s) => {
            if let Some(reference) = parse_whole(s) {
                sites.push(ReferenceSite {
                    param: param.to_string(),
                    form: ReferenceForm::Whole,
                    reference,
                });
                return;
            }
            for (_, _, reference) in inline_spans(s) {
                sites.push(ReferenceSite {
                    param: param.to_string(),
                    form: ReferenceForm::Inline,
                    reference,
                });
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_from_value(param, item, sites);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_from_value(param, item, sites);
            }
        }
        _ => {}
    }
}

/// Rewrite canonical references in place. `rewrite` returns the replacement
/// for a reference, or `None` to keep it. Returns whether anything changed.
pub fn rewrite_references<F>(value: &mut Value, rewrite: &mut F) -> bool
where
    F: FnMut(&TemplateRef) -> Option<TemplateRef>,
{
    match value {
        Value::String(s) => {
            if let Some(reference) = parse_whole(s) {
                if let Some(replacement) = rewrite(&reference) {
                    *s = replacement.token();
                    return true;
                }
                return false;
            }

            let spans = inline_spans(s);
            if spans.is_empty() {
                return false;
            }
            let mut changed = false;
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for (start, end, reference) in spans {
                out.push_str(&s[last..start]);
                match rewrite(&reference) {
                    Some(replacement) => {
                        out.push_str(&replacement.inline_token());
                        changed = true;
                    }
                    None => out.push_str(&s[start..end]),
                }
                last = end;
            }
            out.push_str(&s[last..]);
            if changed {
                *s = out;
            }
            changed
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= rewrite_references(item, rewrite);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for item in map.values_mut() {
                changed |= rewrite_references(item, rewrite);
            }
            changed
        }
        _ => false,
    }
}

/// First leftover reference token anywhere in `value`, if any.
pub fn find_unresolved(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let mut offset = 0;
            while let Some(pos) = s[offset..].find(REFERENCE_PREFIX) {
                let start = offset + pos;
                if let Some((_, len)) = parse_token(&s[start..]) {
                    return Some(s[start..start + len].to_string());
                }
                offset = start + REFERENCE_PREFIX.len();
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_unresolved),
        Value::Object(map) => map.values().find_map(find_unresolved),
        _ => None,
    }
}

/// Resolves template references against the results accumulated so far.
pub struct TemplateResolver<'a> {
    context: &'a ExecutionContext,
}

impl<'a> TemplateResolver<'a> {
    pub fn new(context: &'a ExecutionContext) -> Self {
        Self { context }
    }

    /// Resolve every parameter of a step.
    ///
    /// The resolved map is scanned afterwards; a reference token surviving
    /// resolution is an error rather than something handed to a tool.
    pub fn resolve_params(
        &self,
        params: &Map<String, Value>,
    ) -> Result<Map<String, Value>, TemplateError> {
        let mut resolved = Map::new();
        for (key, value) in params {
            let value = self.resolve_value(value)?;
            if let Some(token) = find_unresolved(&value) {
                return Err(TemplateError::Unresolved(token));
            }
            resolved.insert(key.clone(), value);
        }
        Ok(resolved)
    }

    /// Resolve a single value (recursing into lists and maps).
    pub fn resolve_value(&self, value: &Value) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => {
                if let Some(reference) = parse_whole(s) {
                    return self.lookup(&reference).cloned();
                }
                self.interpolate(s)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::new();
                for (key, item) in map {
                    out.insert(key.clone(), self.resolve_value(item)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Look up the value a reference points at.
    pub fn lookup(&self, reference: &TemplateRef) -> Result<&'a Value, TemplateError> {
        let result = self.context.get(reference.step_id.as_str()).ok_or_else(|| {
            TemplateError::MissingResult {
                reference: reference.token(),
                step: reference.step_id.clone(),
            }
        })?;
        if !result.is_completed() {
            return Err(TemplateError::StepNotCompleted {
                reference: reference.token(),
                step: reference.step_id.clone(),
                status: result.status,
            });
        }

        let missing = || TemplateError::MissingField {
            reference: reference.token(),
            step: reference.step_id.clone(),
            field: reference.field_path(),
        };
        let mut current = result.output.get(&reference.field).ok_or_else(missing)?;
        for segment in &reference.path {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(missing)?;
        }
        Ok(current)
    }

    fn interpolate(&self, input: &str) -> Result<Value, TemplateError> {
        let spans = inline_spans(input);
        if spans.is_empty() {
            return Ok(Value::String(input.to_string()));
        }

        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for (start, end, reference) in spans {
            out.push_str(&input[last..start]);
            out.push_str(&scalar_text(self.lookup(&reference)?, &reference)?);
            last = end;
        }
        out.push_str(&input[last..]);
        Ok(Value::String(out))
    }
}

fn scalar_text(value: &Value, reference: &TemplateRef) -> Result<String, TemplateError> {
    let kind = match value {
        Value::String(s) => return Ok(s.clone()),
        Value::Number(n) => return Ok(n.to_string()),
        Value::Bool(b) => return Ok(b.to_string()),
        Value::Null => "null",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    };
    Err(TemplateError::NonScalarInline {
        reference: reference.token(),
        kind,
    })
}
