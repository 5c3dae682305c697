// Shared prompt fragments. Each flow that needs LLM calls defines its own
// prompts.rs alongside it; this file holds the cross-cutting pieces.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps the owner's voice and the interviewees' voice apart.
pub const PROVENANCE_INSTRUCTION: &str = "\
    CRITICAL: The BUSINESS CONTEXT describes the business owner's own offer and is written \
    in the owner's voice. The CUSTOMER RESEARCH is third-party interview material. \
    Use the research only to understand pains and desires; never quote it, never attribute \
    the owner's claims to customers, and never present interview details (ages, names, \
    figures) as facts about the business.";
