//! Shape of a drafted email sequence: the serde types and the JSON Schema the
//! raw model output is checked against before it is deserialized.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::resilience::schema::SchemaError;
use crate::resilience::JsonSchema;

/// Every sequence has exactly this many emails.
pub const SEQUENCE_LENGTH: usize = 5;

const MAX_SUBJECT_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSequence {
    pub emails: Vec<Email>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub email_number: u8,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<EmailPurpose>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailPurpose {
    Welcome,
    Story,
    Value,
    Objection,
    Offer,
}

impl EmailSequence {
    /// Subjects and bodies as one block, for output scanning.
    pub fn full_text(&self) -> String {
        self.emails
            .iter()
            .map(|e| format!("{}\n{}", e.subject, e.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

pub fn email_sequence_document() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["emails"],
        "properties": {
            "emails": {
                "type": "array",
                "minItems": SEQUENCE_LENGTH,
                "maxItems": SEQUENCE_LENGTH,
                "items": {
                    "type": "object",
                    "required": ["emailNumber", "subject", "body"],
                    "properties": {
                        "emailNumber": { "type": "integer", "minimum": 1, "maximum": SEQUENCE_LENGTH },
                        "subject": { "type": "string", "minLength": 1, "maxLength": MAX_SUBJECT_CHARS },
                        "body": { "type": "string", "minLength": 1 },
                        "purpose": {
                            "enum": ["welcome", "story", "value", "objection", "offer"]
                        }
                    }
                }
            }
        }
    })
}

pub fn email_sequence_schema() -> Result<JsonSchema, SchemaError> {
    JsonSchema::compile("email_sequence", email_sequence_document())
}
