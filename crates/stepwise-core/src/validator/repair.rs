//! Deterministic plan repairs.
//!
//! Every rewrite made here is reported back as an autocorrected warning.
//! Nothing outside the fixed rule set is guessed at.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde_json::Value;

use super::ValidationIssue;
use crate::action::ActionMeta;
use crate::schema::declared_properties;
use crate::template::{
    is_ident_char, parse_token, rewrite_references, TemplateRef, REFERENCE_PREFIX,
};
use crate::types::{Plan, StepId};

/// Wildcard action key in the alias table
pub const ANY_ACTION: &str = "*";

/// Replacement field names keyed by (producing action, referenced field).
///
/// Exact action entries win over wildcard entries. A replacement is only
/// used when the producing action's output schema declares it.
#[derive(Debug, Clone, Default)]
pub struct FieldAliasTable {
    entries: BTreeMap<(String, String), Vec<String>>,
}

impl FieldAliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in wildcard table of common field-name mix-ups.
    pub fn builtin() -> Self {
        const BUILTIN: &[(&str, &[&str])] = &[
            ("content", &["text", "result", "output"]),
            ("text", &["content", "result", "output"]),
            ("output", &["result", "text", "content"]),
            ("result", &["output", "text", "content"]),
            ("body", &["content", "text"]),
            ("file_path", &["path"]),
            ("filepath", &["path"]),
            ("output_path", &["path"]),
            ("file", &["path"]),
            ("doc_path", &["path"]),
            ("filename", &["path"]),
            ("path", &["file_path", "output_path"]),
            ("results", &["items"]),
            ("items", &["results"]),
            ("url", &["link"]),
            ("link", &["url"]),
        ];

        let mut table = Self::new();
        for (field, replacements) in BUILTIN {
            for replacement in *replacements {
                table.insert(ANY_ACTION, *field, *replacement);
            }
        }
        table
    }

    /// Add a candidate replacement. Candidates are tried in insertion order.
    pub fn insert(
        &mut self,
        action: impl Into<String>,
        field: impl Into<String>,
        replacement: impl Into<String>,
    ) {
        let replacements = self
            .entries
            .entry((action.into(), field.into()))
            .or_default();
        let replacement = replacement.into();
        if !replacements.contains(&replacement) {
            replacements.push(replacement);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First declared replacement for `field` of `action`.
    pub fn lookup<'a>(&'a self, action: &str, field: &str, declared: &[String]) -> Option<&'a str> {
        let exact = self.entries.get(&(action.to_string(), field.to_string()));
        let wildcard = self.entries.get(&(ANY_ACTION.to_string(), field.to_string()));
        exact
            .into_iter()
            .chain(wildcard)
            .flatten()
            .find(|candidate| declared.iter().any(|d| d == *candidate))
            .map(String::as_str)
    }
}

/// Rewrite malformed reference tokens to the canonical shapes.
pub(super) fn repair_token_shapes(plan: &mut Plan, issues: &mut Vec<ValidationIssue>) {
    let declared: HashSet<String> = plan.steps.iter().map(|s| s.id.to_string()).collect();
    for step in &mut plan.steps {
        for (param, value) in step.params.iter_mut() {
            let mut rewrites = Vec::new();
            repair_value(value, &declared, &mut rewrites);
            for (from, to) in rewrites {
                tracing::debug!(step_id = %step.id, param = %param, from = %from, to = %to, "repaired reference token");
                issues.push(ValidationIssue::corrected(
                    &step.id,
                    format!(
                        "step '{}' parameter '{}': rewrote malformed reference '{}' as '{}'",
                        step.id, param, from, to
                    ),
                ));
            }
        }
    }
}

fn repair_value(value: &mut Value, declared: &HashSet<String>, rewrites: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) => {
            if let Some(repaired) = repair_string(s, declared, rewrites) {
                *s = repaired;
            }
        }
        Value::Array(items) => {
            for item in items {
                repair_value(item, declared, rewrites);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                repair_value(item, declared, rewrites);
            }
        }
        _ => {}
    }
}

/// Repaired string, or `None` when nothing needed rewriting.
fn repair_string(
    input: &str,
    declared: &HashSet<String>,
    rewrites: &mut Vec<(String, String)>,
) -> Option<String> {
    if !input.contains("step") {
        return None;
    }

    let mut out = String::with_capacity(input.len());
    let mut changed = false;
    let mut pos = 0;
    while pos < input.len() {
        let rest = &input[pos..];
        if let Some((reference, len, canonical)) = match_reference_at(rest, declared) {
            let original = &rest[..len];
            let whole = pos == 0 && len == input.len();
            let inline = original.starts_with('{') && !original.starts_with("{{");
            let replacement = if whole && !inline {
                reference.token()
            } else {
                reference.inline_token()
            };
            if canonical && (whole || inline) {
                out.push_str(original);
            } else {
                rewrites.push((original.to_string(), replacement.clone()));
                out.push_str(&replacement);
                changed = true;
            }
            pos += len;
            continue;
        }

        let Some(ch) = rest.chars().next() else {
            break;
        };
        out.push(ch);
        pos += ch.len_utf8();
    }

    changed.then_some(out)
}

/// Recognise a reference token at the start of `input`.
///
/// Returns the reference, the length of the matched text and whether the
/// match was already a canonical token.
fn match_reference_at(input: &str, declared: &HashSet<String>) -> Option<(TemplateRef, usize, bool)> {
    // {{step1.x}} / {{$step1.x}} / {{ $step1.x }}
    if let Some(inner_start) = input.strip_prefix("{{") {
        let close = inner_start.find("}}")?;
        let inner = inner_start[..close].trim();
        let reference = parse_bracketed(inner, declared)?;
        return Some((reference, 2 + close + 2, false));
    }

    // ${step1.x}
    if let Some(inner_start) = input.strip_prefix("${") {
        let close = inner_start.find('}')?;
        let reference = parse_bracketed(inner_start[..close].trim(), declared)?;
        return Some((reference, 2 + close + 1, false));
    }

    // {$step1.x}, possibly with a malformed id
    if let Some(inner) = input.strip_prefix('{') {
        let (reference, len, canonical) = parse_loose(inner, declared)?;
        if !inner[len..].starts_with('}') {
            return None;
        }
        return Some((reference, 1 + len + 1, canonical));
    }

    parse_loose(input, declared)
}

/// `step1.x` or `$step1.x` inside brackets; must span the whole inner text.
fn parse_bracketed(inner: &str, declared: &HashSet<String>) -> Option<TemplateRef> {
    let bare = inner.strip_prefix('$').unwrap_or(inner);
    if !bare.starts_with("step") {
        return None;
    }
    let candidate = format!("${}", bare);
    let (reference, len, _) = parse_loose(&candidate, declared)?;
    (len == candidate.len()).then_some(reference)
}

/// Parse `$step<ID>.<field>...`, also accepting `$step_1.x`, `$step-1.x` and
/// `$step.1.x` when the separator-free id is a declared step.
fn parse_loose(input: &str, declared: &HashSet<String>) -> Option<(TemplateRef, usize, bool)> {
    let after_prefix = input.strip_prefix(REFERENCE_PREFIX)?;
    let mut separator = after_prefix.chars().next()?;
    if !matches!(separator, '_' | '-' | '.') {
        separator = '\0';
    }

    if separator != '\0' {
        let stripped = &after_prefix[1..];
        let id_starts = stripped.chars().next().is_some_and(is_ident_char);
        if id_starts {
            let candidate = format!("{}{}", REFERENCE_PREFIX, stripped);
            if let Some((reference, len)) = parse_token(&candidate) {
                let as_written = format!("{}{}", separator, reference.step_id);
                let written_is_declared = separator != '.' && declared.contains(&as_written);
                if declared.contains(reference.step_id.as_str()) && !written_is_declared {
                    return Some((reference, len + 1, false));
                }
            }
        }
    }

    let (reference, len) = parse_token(input)?;
    Some((reference, len, true))
}

/// Rewrite references to output fields the producer does not declare.
pub(super) fn repair_field_aliases(
    plan: &mut Plan,
    contracts: &BTreeMap<String, ActionMeta>,
    aliases: &FieldAliasTable,
    issues: &mut Vec<ValidationIssue>,
) {
    let producers: HashMap<StepId, String> = plan
        .steps
        .iter()
        .map(|s| (s.id.clone(), s.action.clone()))
        .collect();

    for step in &mut plan.steps {
        let owner = step.id.clone();
        for value in step.params.values_mut() {
            rewrite_references(value, &mut |reference: &TemplateRef| {
                let action = producers.get(&reference.step_id)?;
                let declared = contracts
                    .get(action)
                    .map(|meta| declared_properties(&meta.output_schema))
                    .unwrap_or_default();
                if declared.is_empty() || declared.contains(&reference.field) {
                    return None;
                }

                match aliases.lookup(action, &reference.field, &declared) {
                    Some(replacement) => {
                        let repaired = TemplateRef::new(reference.step_id.clone(), replacement)
                            .with_path(reference.path.clone());
                        issues.push(ValidationIssue::corrected(
                            &owner,
                            format!(
                                "step '{}': action '{}' has no output field '{}'; using '{}' instead",
                                owner, action, reference.field, replacement
                            ),
                        ));
                        Some(repaired)
                    }
                    None => {
                        issues.push(ValidationIssue::warning(
                            &owner,
                            format!(
                                "step '{}': reference '{}' names field '{}' which action '{}' does not declare (declared: {})",
                                owner,
                                reference,
                                reference.field,
                                action,
                                declared.join(", ")
                            ),
                        ));
                        None
                    }
                }
            });
        }
    }
}

/// Fill missing attachment-like parameters from the nearest earlier step
/// that produced an artifact of the required kind.
pub(super) fn inject_artifact_references(
    plan: &mut Plan,
    contracts: &BTreeMap<String, ActionMeta>,
    issues: &mut Vec<ValidationIssue>,
) {
    for idx in 0..plan.steps.len() {
        let step = &plan.steps[idx];
        let Some(required) = contracts
            .get(&step.action)
            .and_then(|meta| meta.artifact_input.clone())
        else {
            continue;
        };
        if step
            .params
            .get(&required.param)
            .is_some_and(|value| !is_blank(value))
        {
            continue;
        }

        let downstream = downstream_of(plan, idx);
        let producer = plan.steps[..idx].iter().rev().find_map(|candidate| {
            if downstream.contains(&candidate.id) {
                return None;
            }
            let output = contracts.get(&candidate.action)?.artifact_output.as_ref()?;
            (output.kind == required.kind).then(|| (candidate.id.clone(), output.field.clone()))
        });

        let step = &mut plan.steps[idx];
        match producer {
            Some((producer_id, field)) => {
                let reference = TemplateRef::new(producer_id.clone(), field);
                step.params
                    .insert(required.param.clone(), Value::String(reference.token()));
                if !step.depends_on_step(&producer_id) {
                    step.depends_on.push(producer_id.clone());
                }
                tracing::debug!(step_id = %step.id, param = %required.param, reference = %reference, "injected artifact reference");
                issues.push(ValidationIssue::corrected(
                    &step.id,
                    format!(
                        "step '{}': parameter '{}' requires a '{}' artifact; injected '{}' from step '{}'",
                        step.id, required.param, required.kind, reference, producer_id
                    ),
                ));
            }
            None => issues.push(ValidationIssue::warning(
                &step.id,
                format!(
                    "step '{}': parameter '{}' requires a '{}' artifact but no earlier step produces one",
                    step.id, required.param, required.kind
                ),
            )),
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Ids of steps that transitively depend on `plan.steps[idx]`.
fn downstream_of(plan: &Plan, idx: usize) -> HashSet<StepId> {
    let mut reached = HashSet::new();
    let mut queue = VecDeque::from([plan.steps[idx].id.clone()]);
    while let Some(current) = queue.pop_front() {
        for step in &plan.steps {
            if step.depends_on_step(&current) && reached.insert(step.id.clone()) {
                queue.push_back(step.id.clone());
            }
        }
    }
    reached
}
