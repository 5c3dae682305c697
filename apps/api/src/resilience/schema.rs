//! Schema validation of recovered model output.
//!
//! `parse_and_validate` = `recover_json` → JSON Schema check → serde into `T`.
//! A value either matches the declared shape exactly or the caller is told;
//! nothing is coerced. Callers that can live with a degraded answer pass a
//! fallback, which is returned (and the discarded error logged) on failure.

use std::sync::Arc;

use jsonschema::error::ValidationErrorKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::resilience::errors::GenerationError;
use crate::resilience::json_recovery::recover_json;

/// How much of the raw text to keep at each end in failure logs.
const LOG_EXCERPT_CHARS: usize = 500;

#[derive(Debug, Error)]
#[error("invalid schema '{name}': {message}")]
pub struct SchemaError {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required property is absent.
    MissingField,
    /// An array has too few or too many items.
    WrongCount,
    /// Any other shape mismatch (type, enum, range, length, union).
    Mismatch,
    /// Schema passed but the value does not deserialize into the target type.
    Deserialize,
}

/// The recovered value does not have the declared shape.
#[derive(Debug, Clone, Error)]
#[error("{context}: schema violation at {path}: {expected} (actual: {actual})")]
pub struct ValidationError {
    pub context: String,
    /// JSON pointer of the first violation; "/" for the root.
    pub path: String,
    pub kind: ViolationKind,
    pub expected: String,
    pub actual: String,
    /// Every violation found, as "path: message".
    pub violations: Vec<String>,
}

/// A compiled JSON Schema document.
#[derive(Clone)]
pub struct JsonSchema {
    name: String,
    validator: Arc<jsonschema::Validator>,
}

impl JsonSchema {
    pub fn compile(name: impl Into<String>, document: Value) -> Result<Self, SchemaError> {
        let name = name.into();
        let validator = jsonschema::validator_for(&document).map_err(|e| SchemaError {
            name: name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self {
            name,
            validator: Arc::new(validator),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchema").field("name", &self.name).finish()
    }
}

/// The shape a response is checked against, chosen explicitly by the caller.
#[derive(Debug, Clone)]
pub enum ResponseSchema {
    Strict(JsonSchema),
    /// Loosely-typed "record of string to anything": any JSON object passes.
    Permissive,
}

/// Per-call options for `parse_and_validate`.
#[derive(Debug, Clone)]
pub struct ParseOptions<T> {
    /// Label for error messages and logs.
    pub context: String,
    pub fallback: Option<T>,
}

impl<T> ParseOptions<T> {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: T) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

/// Recovers JSON from `raw_text`, validates it, and deserializes it into `T`.
///
/// Errors are `GenerationError::Recovery` or `GenerationError::Validation`,
/// unless a fallback was supplied.
pub fn parse_and_validate<T: DeserializeOwned>(
    raw_text: &str,
    schema: &ResponseSchema,
    options: ParseOptions<T>,
) -> Result<T, GenerationError> {
    let outcome = recover_json(raw_text)
        .map_err(GenerationError::from)
        .and_then(|recovered| {
            validate_value(&recovered.value, schema, &options.context)?;
            deserialize(recovered.value, &options.context)
        });

    match outcome {
        Ok(value) => Ok(value),
        Err(err) => {
            log_failure(raw_text, &err, &options.context);
            match options.fallback {
                Some(fallback) => {
                    warn!(context = %options.context, "Using fallback value after: {err}");
                    Ok(fallback)
                }
                None => Err(err),
            }
        }
    }
}

/// Checks an already-parsed value against `schema`.
pub fn validate_value(
    value: &Value,
    schema: &ResponseSchema,
    context: &str,
) -> Result<(), ValidationError> {
    match schema {
        ResponseSchema::Permissive => {
            if value.is_object() {
                Ok(())
            } else {
                Err(ValidationError {
                    context: context.to_string(),
                    path: "/".to_string(),
                    kind: ViolationKind::Mismatch,
                    expected: "an object".to_string(),
                    actual: describe(value),
                    violations: vec!["/: expected an object".to_string()],
                })
            }
        }
        ResponseSchema::Strict(schema) => {
            let mut first: Option<(String, ViolationKind, String, String)> = None;
            let mut violations = Vec::new();

            for e in schema.validator.iter_errors(value) {
                let path = pointer_or_root(e.instance_path.to_string());
                let message = e.to_string();
                violations.push(format!("{path}: {message}"));
                if first.is_none() {
                    let kind = match &e.kind {
                        ValidationErrorKind::Required { .. } => ViolationKind::MissingField,
                        ValidationErrorKind::MinItems { .. }
                        | ValidationErrorKind::MaxItems { .. } => ViolationKind::WrongCount,
                        _ => ViolationKind::Mismatch,
                    };
                    first = Some((path, kind, message, describe(&e.instance)));
                }
            }

            match first {
                None => Ok(()),
                Some((path, kind, expected, actual)) => Err(ValidationError {
                    context: context.to_string(),
                    path,
                    kind,
                    expected,
                    actual,
                    violations,
                }),
            }
        }
    }
}

fn deserialize<T: DeserializeOwned>(value: Value, context: &str) -> Result<T, GenerationError> {
    let actual = describe(&value);
    serde_json::from_value(value).map_err(|e| {
        let message = e.to_string();
        let kind = if message.contains("missing field") {
            ViolationKind::MissingField
        } else {
            ViolationKind::Deserialize
        };
        GenerationError::Validation(ValidationError {
            context: context.to_string(),
            path: "/".to_string(),
            kind,
            expected: message.clone(),
            actual,
            violations: vec![format!("/: {message}")],
        })
    })
}

fn pointer_or_root(pointer: String) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer
    }
}

/// Short shape description used in violation messages.
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string of length {}", s.chars().count()),
        Value::Array(items) => format!("array of length {}", items.len()),
        Value::Object(map) => format!("object with {} keys", map.len()),
    }
}

fn log_failure(raw_text: &str, err: &GenerationError, context: &str) {
    let head: String = raw_text.chars().take(LOG_EXCERPT_CHARS).collect();
    let char_count = raw_text.chars().count();
    let tail: String = raw_text
        .chars()
        .skip(char_count.saturating_sub(LOG_EXCERPT_CHARS))
        .collect();

    match err {
        GenerationError::Recovery(e) => error!(
            context,
            raw_len = raw_text.len(),
            offset = ?e.offset,
            head = %head,
            tail = %tail,
            "JSON recovery failed: {err}"
        ),
        GenerationError::Validation(e) => error!(
            context,
            raw_len = raw_text.len(),
            path = %e.path,
            violations = ?e.violations,
            head = %head,
            tail = %tail,
            "Schema validation failed: {err}"
        ),
        _ => error!(context, raw_len = raw_text.len(), "Parse failed: {err}"),
    }
}
