// Resilience layer: every generation call flows through
// retry → raw text → JSON recovery → schema validation.

pub mod errors;
pub mod json_recovery;
pub mod retry;
pub mod schema;

pub use errors::{is_retryable, GenerationError};
pub use json_recovery::{recover_json, RecoveredJson, RecoveryError};
pub use retry::{retry_with_backoff, RetryOptions};
pub use schema::{
    parse_and_validate, JsonSchema, ParseOptions, ResponseSchema, ValidationError, ViolationKind,
};
