//! Post-generation contamination scan.
//!
//! Best-effort: a clean report means none of the heuristics fired, not that
//! the output is provably free of cross-domain content. Findings are soft
//! warnings; they are reported alongside the response and never block it.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::provenance::{detectors, DomainContext, SourceType};

/// Consecutive words that must match for a verbatim leak.
const LEAK_WINDOW_WORDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContaminationIssue {
    /// A long run of the opposite domain's raw text appears in the output.
    VerbatimLeak { source_key: String, excerpt: String },
    MixedPronouns { families: Vec<&'static str> },
    /// A figure that only the opposite domain mentions.
    ForeignFigure { figure: String, source_key: String },
    /// Personal details in output written for the owner's domain.
    DemographicDetail { excerpt: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub is_clean: bool,
    pub issues: Vec<ContaminationIssue>,
}

/// Scans `generated` (written for `target`'s domain) for material from `opposite`.
pub fn scan_output(generated: &str, target: &DomainContext, opposite: &DomainContext) -> ScanReport {
    let mut issues = Vec::new();

    issues.extend(verbatim_leaks(generated, target, opposite));

    let owner_output = target.source_type() == Some(SourceType::OwnerBusinessData);

    let families = detectors::pronoun_families(generated);
    if pronouns_are_mixed(&families, owner_output) {
        issues.push(ContaminationIssue::MixedPronouns { families });
    }

    issues.extend(foreign_figures(generated, target, opposite));

    if owner_output {
        issues.extend(
            detectors::demographic_mentions(generated)
                .into_iter()
                .map(|excerpt| ContaminationIssue::DemographicDetail { excerpt }),
        );
    }

    if !issues.is_empty() {
        warn!(
            issue_count = issues.len(),
            issues = ?issues,
            "Contamination warning on generated output"
        );
    }

    ScanReport {
        is_clean: issues.is_empty(),
        issues,
    }
}

/// Owner copy speaks as "we" to "you", so that pair alone is the expected
/// voice there; only a third-person family alongside it counts as mixing.
fn pronouns_are_mixed(families: &[&'static str], owner_output: bool) -> bool {
    if owner_output {
        families.len() >= 2 && families.contains(&"third")
    } else {
        families.len() >= 2
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Space-padded so window matches land on word boundaries.
fn normalized(text: &str) -> String {
    format!(" {} ", words(text).join(" "))
}

fn verbatim_leaks(
    generated: &str,
    target: &DomainContext,
    opposite: &DomainContext,
) -> Vec<ContaminationIssue> {
    let output = normalized(generated);
    let own: String = target
        .raw_contents()
        .map(|(_, content)| normalized(content))
        .collect();

    let mut issues = Vec::new();
    for (key, content) in opposite.raw_contents() {
        let source_words = words(content);
        let leak = source_words
            .windows(LEAK_WINDOW_WORDS)
            .map(|window| format!(" {} ", window.join(" ")))
            // A phrase the target domain also uses is not a leak.
            .find(|phrase| output.contains(phrase.as_str()) && !own.contains(phrase.as_str()));

        if let Some(phrase) = leak {
            issues.push(ContaminationIssue::VerbatimLeak {
                source_key: key.to_string(),
                excerpt: phrase.trim().to_string(),
            });
        }
    }
    issues
}

fn foreign_figures(
    generated: &str,
    target: &DomainContext,
    opposite: &DomainContext,
) -> Vec<ContaminationIssue> {
    let in_output: BTreeSet<String> = detectors::figures(generated).into_iter().collect();
    if in_output.is_empty() {
        return Vec::new();
    }
    let own: BTreeSet<String> = target
        .raw_contents()
        .flat_map(|(_, content)| detectors::figures(content))
        .collect();

    let mut reported = BTreeSet::new();
    let mut issues = Vec::new();
    for (key, content) in opposite.raw_contents() {
        for figure in detectors::figures(content) {
            if in_output.contains(&figure) && !own.contains(&figure) && reported.insert(figure.clone())
            {
                issues.push(ContaminationIssue::ForeignFigure {
                    figure,
                    source_key: key.to_string(),
                });
            }
        }
    }
    issues
}
