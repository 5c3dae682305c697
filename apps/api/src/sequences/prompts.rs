// Prompt constants for email sequence drafting.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for sequence drafting. Replace `{json_only}` before sending.
pub const SEQUENCE_SYSTEM_TEMPLATE: &str = "You are an experienced direct-response copywriter \
    who writes warm, specific nurture emails for small service businesses. {json_only}";

/// Replace `{provenance_instruction}`, `{business_context}`, `{customer_research}`
/// and `{sequence_length}` before sending.
pub const SEQUENCE_PROMPT_TEMPLATE: &str = r#"Write a {sequence_length}-email nurture sequence for the business below.

{provenance_instruction}

BUSINESS CONTEXT (the owner's own data):
{business_context}

CUSTOMER RESEARCH (third-party interviews; for understanding only):
{customer_research}

Return a JSON object with this EXACT schema (no extra fields):
{
  "emails": [
    {
      "emailNumber": 1,
      "subject": "Under 150 characters",
      "body": "Plain text body",
      "purpose": "welcome"
    }
  ]
}

Rules:
- Exactly {sequence_length} emails, numbered 1 to {sequence_length} in order.
- "purpose" is one of: welcome, story, value, objection, offer.
- Write in the owner's voice. Speak to the reader as "you".
- Never copy sentences from the customer research. Never invent figures.
"#;

/// Rendered in place of an empty research section.
pub const NO_RESEARCH: &str = "(none provided)";
