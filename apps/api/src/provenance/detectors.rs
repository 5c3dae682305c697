//! Heuristic pattern tables for cross-domain contamination.
//!
//! These are keyword/regex approximations, not classifiers. Widening coverage
//! means growing the tables, not changing the callers.

use once_cell::sync::Lazy;
use regex::Regex;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex is valid")
}

/// Owner text that reports what a customer said.
static CUSTOMER_VOICE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(customers?|clients?|buyers?|patients?|students?)\s+(said|says|say|told\s+(me|us)|tell\s+(me|us)|mentioned|mention|complained|shared|wrote)\b|\baccording\s+to\s+(a|one|my|our)\s+(customer|client)\b|\bone\s+(customer|client)\s+(said|told|mentioned)\b",
    )
});

/// First-person pain statements: the voice of an interviewee, not an owner.
static FIRST_PERSON_PAIN: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\bI\s+(really\s+|always\s+|just\s+)?(struggle|struggled|struggling|can't|cannot|couldn't|hate|worry|wish|dread|am\s+(so\s+)?(frustrated|overwhelmed|stuck|exhausted|tired\s+of)|have\s+trouble|find\s+it\s+hard|don't\s+know\s+how)\b|\bmy\s+(biggest\s+)?(problem|struggle|frustration|challenge)\s+is\b",
    )
});

/// Third-person or corporate phrasing about the business itself.
static BUSINESS_VOICE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b(the|our|this)\s+(company|business|brand|agency|firm|studio|practice)\s+(offers?|provides?|sells?|helps?|specializes|delivers?)\b|\bwe\s+(offer|provide|specialize|sell|deliver)\b|\bour\s+(services|products|packages|program|programme|pricing)\b",
    )
});

/// Markers left behind by a previous generation pass or a template.
static GENERATED_ARTIFACT: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)as\s+an\s+ai\b|language\s+model|\[insert\b|\{\{|\}\}|lorem\s+ipsum|```|<\|")
});

static FIRST_PERSON: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(I|me|my|mine|myself|we|us|our|ours|ourselves)\b"));

static SECOND_PERSON: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\b(you|your|yours|yourself|yourselves)\b"));

static THIRD_PERSON: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?i)\b(he|she|him|her|his|hers|they|them|their|theirs|himself|herself|themselves)\b")
});

/// Ages, family status, life stage.
static DEMOGRAPHIC: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?i)\b\d{2}[- ]?(years?|yrs?)[- ]old\b|\b(mother|father|mom|mum|dad|parent)\s+of\s+(\d+|one|two|three|four|five)\b|\bin\s+(my|his|her|their)\s+(20s|30s|40s|50s|60s|twenties|thirties|forties|fifties|sixties)\b|\baged\s+\d{2}\b",
    )
});

/// Money, percentages, and numbers of three or more digits.
static FIGURE: Lazy<Regex> =
    Lazy::new(|| compile(r"[$€£]\s?\d[\d,]*(\.\d+)?[kKmM]?\b|\b\d+(\.\d+)?\s?%|\b\d[\d,]{2,}\b"));

pub fn has_customer_voice(text: &str) -> bool {
    CUSTOMER_VOICE.is_match(text)
}

pub fn has_first_person_pain(text: &str) -> bool {
    FIRST_PERSON_PAIN.is_match(text)
}

pub fn has_business_voice(text: &str) -> bool {
    BUSINESS_VOICE.is_match(text)
}

pub fn has_generated_artifact(text: &str) -> bool {
    GENERATED_ARTIFACT.is_match(text)
}

/// Which pronoun families occur in `text`, as `["first", "second", "third"]` subsets.
pub fn pronoun_families(text: &str) -> Vec<&'static str> {
    let mut families = Vec::with_capacity(3);
    if FIRST_PERSON.is_match(text) {
        families.push("first");
    }
    if SECOND_PERSON.is_match(text) {
        families.push("second");
    }
    if THIRD_PERSON.is_match(text) {
        families.push("third");
    }
    families
}

pub fn has_mixed_pronouns(text: &str) -> bool {
    pronoun_families(text).len() >= 2
}

pub fn demographic_mentions(text: &str) -> Vec<String> {
    DEMOGRAPHIC
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn figures(text: &str) -> Vec<String> {
    FIGURE
        .find_iter(text)
        .map(|m| m.as_str().replace(' ', ""))
        .collect()
}
