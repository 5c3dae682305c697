// Email sequence drafting: the generation flow this service exposes.
// All model calls go through llm_client and the resilience layer.

pub mod generator;
pub mod handlers;
pub mod prompts;
pub mod schema;

pub use generator::{SequenceDraft, SequenceGenerator, SequenceRequest};
