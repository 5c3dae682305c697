//! Provenance: keeps the owner's business data and third-party interview data
//! in their own trust domains.
//!
//! Input fields are tagged with their declared domain at ingestion
//! (`tag_source`), scored by heuristic detectors, and filtered before they reach
//! a prompt (`build_context`). Generated text is re-scanned for leakage
//! afterwards (`scan_output`). The detectors are approximations: this reduces
//! cross-contamination risk, it does not eliminate it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub mod detectors;
pub mod scan;

pub use scan::{scan_output, ContaminationIssue, ScanReport};

/// A point must score strictly above this (and carry no flags) to be used.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceType {
    OwnerBusinessData,
    ThirdPartyInterviewData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFlag {
    /// Owner text quoting what customers said.
    CustomerVoiceInOwnerData,
    /// Owner text containing first-person pain statements.
    FirstPersonClientPattern,
    /// Interview text phrased like the business describing itself.
    BusinessVoiceInInterviewData,
    MixedPronouns,
    LikelyGeneratedArtifact,
}

impl ValidationFlag {
    /// Confidence deducted when this flag is raised.
    pub fn penalty(self) -> f64 {
        match self {
            ValidationFlag::FirstPersonClientPattern => 0.4,
            ValidationFlag::CustomerVoiceInOwnerData
            | ValidationFlag::BusinessVoiceInInterviewData => 0.3,
            ValidationFlag::MixedPronouns => 0.2,
            ValidationFlag::LikelyGeneratedArtifact => 0.1,
        }
    }
}

/// One input field tagged with its provenance. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatedDataPoint {
    key: String,
    content: String,
    source_type: SourceType,
    owner_id: String,
    confidence: f64,
    flags: BTreeSet<ValidationFlag>,
    lineage: Vec<SourceType>,
}

impl ValidatedDataPoint {
    fn new(key: String, content: String, source_type: SourceType, owner_id: &str) -> Self {
        let detected = detect_flags(&content, source_type);

        // Applied one flag at a time so confidence never rises as flags accumulate.
        let mut confidence: f64 = 1.0;
        let mut flags = BTreeSet::new();
        for flag in detected {
            if flags.insert(flag) {
                confidence = (confidence - flag.penalty()).clamp(0.0, 1.0);
            }
        }

        Self {
            key,
            content,
            source_type,
            owner_id: owner_id.to_string(),
            confidence,
            flags,
            lineage: vec![source_type],
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn source_type(&self) -> SourceType {
        self.source_type
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn flags(&self) -> &BTreeSet<ValidationFlag> {
        &self.flags
    }

    pub fn lineage(&self) -> &[SourceType] {
        &self.lineage
    }

    /// Usable in a prompt for its own domain.
    pub fn is_trusted(&self) -> bool {
        self.confidence > CONFIDENCE_THRESHOLD && self.flags.is_empty()
    }
}

fn detect_flags(content: &str, source_type: SourceType) -> Vec<ValidationFlag> {
    let mut flags = Vec::new();

    match source_type {
        SourceType::OwnerBusinessData => {
            if detectors::has_customer_voice(content) {
                flags.push(ValidationFlag::CustomerVoiceInOwnerData);
            }
            if detectors::has_first_person_pain(content) {
                flags.push(ValidationFlag::FirstPersonClientPattern);
            }
        }
        SourceType::ThirdPartyInterviewData => {
            if detectors::has_business_voice(content) {
                flags.push(ValidationFlag::BusinessVoiceInInterviewData);
            }
        }
    }

    if detectors::has_mixed_pronouns(content) {
        flags.push(ValidationFlag::MixedPronouns);
    }
    if detectors::has_generated_artifact(content) {
        flags.push(ValidationFlag::LikelyGeneratedArtifact);
    }

    flags
}

/// Tags every record with `source_type` and scores it.
pub fn tag_source(
    records: &BTreeMap<String, String>,
    source_type: SourceType,
    owner_id: &str,
) -> BTreeMap<String, ValidatedDataPoint> {
    records
        .iter()
        .map(|(key, content)| {
            let point =
                ValidatedDataPoint::new(key.clone(), content.clone(), source_type, owner_id);
            if !point.flags.is_empty() {
                debug!(
                    key = %point.key,
                    ?source_type,
                    confidence = point.confidence,
                    flags = ?point.flags,
                    "Data point flagged at ingestion"
                );
            }
            (key.clone(), point)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    Flagged { flags: Vec<ValidationFlag> },
    LowConfidence { confidence: f64 },
    /// The point belongs to a different domain than the rest of the context.
    ForeignDomain { source_type: SourceType },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExcludedPoint {
    pub key: String,
    /// Kept for output scanning only; never rendered into a prompt.
    #[serde(skip)]
    pub content: String,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

/// The trusted subset of one domain's data points, ready for a prompt.
#[derive(Debug, Clone, Default)]
pub struct DomainContext {
    source_type: Option<SourceType>,
    included: Vec<ValidatedDataPoint>,
    excluded: Vec<ExcludedPoint>,
}

impl DomainContext {
    pub fn source_type(&self) -> Option<SourceType> {
        self.source_type
    }

    pub fn included(&self) -> &[ValidatedDataPoint] {
        &self.included
    }

    pub fn excluded(&self) -> &[ExcludedPoint] {
        &self.excluded
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }

    /// Every `(key, content)` seen for this domain, trusted or not.
    pub fn raw_contents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.included
            .iter()
            .map(|p| (p.key.as_str(), p.content.as_str()))
            .chain(
                self.excluded
                    .iter()
                    .map(|p| (p.key.as_str(), p.content.as_str())),
            )
    }

    /// Prompt-ready "- key: content" lines.
    pub fn render(&self) -> String {
        self.included
            .iter()
            .map(|p| format!("- {}: {}", p.key, p.content.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Keeps only trusted points. The domain is that of the first point seen;
/// points from any other domain are excluded too.
pub fn build_context<'a>(points: impl IntoIterator<Item = &'a ValidatedDataPoint>) -> DomainContext {
    let mut context = DomainContext::default();

    for point in points {
        let domain = *context.source_type.get_or_insert(point.source_type);

        let reason = if point.source_type != domain {
            Some(ExclusionReason::ForeignDomain {
                source_type: point.source_type,
            })
        } else if !point.flags.is_empty() {
            Some(ExclusionReason::Flagged {
                flags: point.flags.iter().copied().collect(),
            })
        } else if !point.is_trusted() {
            Some(ExclusionReason::LowConfidence {
                confidence: point.confidence,
            })
        } else {
            None
        };

        match reason {
            None => context.included.push(point.clone()),
            Some(reason) => {
                warn!(key = %point.key, ?reason, "Excluding data point from prompt context");
                context.excluded.push(ExcludedPoint {
                    key: point.key.clone(),
                    content: point.content.clone(),
                    reason,
                });
            }
        }
    }

    context
}
