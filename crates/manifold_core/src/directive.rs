//! Directive classification.
//!
//! A rendered document is a directive when it is a map. Keys starting with
//! `$` are control keys; everything else is the literal payload. The action
//! a directive performs is computed once here, and directives that ask for
//! more than one terminal action are rejected.

use std::path::PathBuf;

use manifold_templates::{merge, pattern_list};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Prefix marking control keys.
pub const CONTROL_PREFIX: char = '$';

/// Control keys that select a terminal action, in evaluation order.
const TERMINAL_KEYS: [&str; 5] = ["$template", "$copy", "$exec", "$text", "$merge"];

/// The terminal action of a directive.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectiveAction {
    /// Only preparatory steps, if any.
    None,
    /// Expand a nested template over a nested manifest.
    Expand {
        template: PathBuf,
        manifest: Value,
        schema: Option<PathBuf>,
    },
    /// Copy matched files into the `$out` directory.
    Copy { patterns: Vec<String> },
    /// Run a shell command.
    Exec { command: String },
    /// Write a literal string.
    Text { text: String },
    /// Concatenate matched files.
    Merge {
        patterns: Vec<String>,
        separator: String,
    },
    /// Serialize the payload, optionally merged onto an input document.
    Output { input: Option<PathBuf> },
}

impl DirectiveAction {
    pub fn name(&self) -> &'static str {
        match self {
            DirectiveAction::None => "none",
            DirectiveAction::Expand { .. } => "template",
            DirectiveAction::Copy { .. } => "copy",
            DirectiveAction::Exec { .. } => "exec",
            DirectiveAction::Text { .. } => "text",
            DirectiveAction::Merge { .. } => "merge",
            DirectiveAction::Output { .. } => "output",
        }
    }
}

/// Ordered regex substitutions applied to emitted text.
#[derive(Debug, Clone, Default)]
pub struct Replacements {
    rules: Vec<(Regex, String)>,
}

impl Replacements {
    fn from_value(value: Option<&Value>) -> EngineResult<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let map = value.as_object().ok_or_else(|| {
            EngineError::InvalidDirective(format!("$replace must be a map, found {}", value))
        })?;

        let mut rules = Vec::with_capacity(map.len());
        for (pattern, replacement) in map {
            let regex = Regex::new(pattern).map_err(|e| EngineError::InvalidReplace {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            let replacement = match replacement {
                Value::String(text) => text.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            rules.push((regex, replacement));
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule, in declaration order, to `text`.
    pub fn apply(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (regex, replacement)| {
                regex.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }
}

/// A classified directive.
#[derive(Debug, Clone)]
pub struct Directive {
    pub mkdir: Vec<String>,
    pub chdir: Option<String>,
    pub rm: Vec<String>,
    pub out: Option<String>,
    pub archive: Option<PathBuf>,
    pub replace: Replacements,
    pub action: DirectiveAction,
    /// Non-control fields with `$root` applied.
    pub payload: Value,
}

fn string_list(key: &str, value: Option<&Value>) -> EngineResult<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(text)) => Ok(vec![text.clone()]),
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| match entry {
                Value::String(text) => Ok(text.clone()),
                other => Err(EngineError::InvalidDirective(format!(
                    "{} entries must be strings, found {}",
                    key, other
                ))),
            })
            .collect(),
        Some(other) => Err(EngineError::InvalidDirective(format!(
            "{} must be a string or a list, found {}",
            key, other
        ))),
    }
}

fn optional_string(key: &str, value: Option<&Value>) -> EngineResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(Value::Number(number)) => Ok(Some(number.to_string())),
        Some(other) => Err(EngineError::InvalidDirective(format!(
            "{} must be a string, found {}",
            key, other
        ))),
    }
}

/// Strip control keys from `fields` and apply `$root`.
///
/// A `$root` map is deep-merged onto the remaining fields; a `$root` string
/// replaces the payload entirely.
pub fn payload_of(fields: &Map<String, Value>) -> Value {
    let stripped: Map<String, Value> = fields
        .iter()
        .filter(|(key, _)| !key.starts_with(CONTROL_PREFIX))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let mut payload = Value::Object(stripped);

    match fields.get("$root") {
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(root @ Value::Object(_)) => {
            merge(&mut payload, root);
            payload
        }
        _ => payload,
    }
}

impl Directive {
    /// Classify a rendered document. Documents that are not maps are no-ops.
    pub fn classify(document: &Value) -> EngineResult<Option<Directive>> {
        let Value::Object(fields) = document else {
            return Ok(None);
        };

        let terminal: Vec<String> = TERMINAL_KEYS
            .iter()
            .filter(|key| fields.get(**key).is_some_and(|value| !value.is_null()))
            .map(|key| key.to_string())
            .collect();
        if terminal.len() > 1 {
            return Err(EngineError::ConflictingDirective(terminal));
        }

        let out = optional_string("$out", fields.get("$out"))?;
        let action = match terminal.first().map(String::as_str) {
            Some("$template") => {
                let template = optional_string("$template", fields.get("$template"))?
                    .unwrap_or_default();
                let manifest = match fields.get("$manifest") {
                    Some(manifest) if !manifest.is_null() => manifest.clone(),
                    _ => {
                        return Err(EngineError::IncompleteDirective(format!(
                            "$template {} has no $manifest",
                            template
                        )))
                    }
                };
                DirectiveAction::Expand {
                    template: PathBuf::from(template),
                    manifest,
                    schema: optional_string("$schema", fields.get("$schema"))?.map(PathBuf::from),
                }
            }
            Some("$copy") => {
                let copy = &fields["$copy"];
                let files = copy.get("files").unwrap_or(copy);
                DirectiveAction::Copy {
                    patterns: pattern_list(files),
                }
            }
            Some("$exec") => DirectiveAction::Exec {
                command: optional_string("$exec", fields.get("$exec"))?.unwrap_or_default(),
            },
            Some("$text") => match &fields["$text"] {
                Value::String(text) => DirectiveAction::Text { text: text.clone() },
                Value::Number(_) | Value::Bool(_) => DirectiveAction::Text {
                    text: fields["$text"].to_string(),
                },
                _ => {
                    return Err(EngineError::InvalidDirective(
                        "$text must be a string".to_string(),
                    ))
                }
            },
            Some(_) => {
                let merge = &fields["$merge"];
                let files = merge.get("files").unwrap_or(merge);
                if out.is_none() {
                    return Err(EngineError::IncompleteDirective(
                        "$merge has no $out".to_string(),
                    ));
                }
                DirectiveAction::Merge {
                    patterns: pattern_list(files),
                    separator: optional_string("$merge.separator", merge.get("separator"))?
                        .unwrap_or_default(),
                }
            }
            None if out.is_some() => DirectiveAction::Output {
                input: optional_string("$in", fields.get("$in"))?.map(PathBuf::from),
            },
            None => DirectiveAction::None,
        };

        Ok(Some(Directive {
            mkdir: string_list("$mkdir", fields.get("$mkdir"))?,
            chdir: optional_string("$chdir", fields.get("$chdir"))?,
            rm: string_list("$rm", fields.get("$rm"))?,
            out,
            archive: optional_string("$archive", fields.get("$archive"))?.map(PathBuf::from),
            replace: Replacements::from_value(fields.get("$replace"))?,
            action,
            payload: payload_of(fields),
        }))
    }
}
