//! Email sequence drafting: wires provenance, retry, recovery, validation
//! and operation bookkeeping around one model call.
//!
//! Flow: start_exclusive → tag_source + build_context (both domains) →
//!       mark_in_progress → retry(generate → recover → validate) →
//!       liveness check → scan_output → complete | fail.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, PROVENANCE_INSTRUCTION};
use crate::llm_client::{SamplingParams, TextGenerator};
use crate::operations::{OperationManager, OperationStatus};
use crate::provenance::{
    build_context, scan_output, tag_source, DomainContext, ExcludedPoint, ScanReport, SourceType,
};
use crate::resilience::{
    parse_and_validate, retry_with_backoff, GenerationError, JsonSchema, ParseOptions,
    ResponseSchema, RetryOptions,
};
use crate::sequences::prompts::{NO_RESEARCH, SEQUENCE_PROMPT_TEMPLATE, SEQUENCE_SYSTEM_TEMPLATE};
use crate::sequences::schema::{EmailSequence, SEQUENCE_LENGTH};

/// Operation type recorded for sequence drafts; one in flight per user.
pub const OPERATION_TYPE: &str = "email_sequence";

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SequenceRequest {
    pub user_id: String,
    /// The owner's own business data, field name → text.
    pub business: BTreeMap<String, String>,
    /// Third-party interview transcripts, question/label → answer.
    #[serde(default)]
    pub interviews: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceDraft {
    pub operation_id: String,
    pub sequence: EmailSequence,
    /// Soft findings from the output scan; never block the response.
    pub contamination: ScanReport,
    /// Input fields kept out of the prompt, with the reason.
    pub excluded: Vec<ExcludedPoint>,
}

// ────────────────────────────────────────────────────────────────────────────
// Pipeline
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SequenceGenerator {
    llm: Arc<dyn TextGenerator>,
    operations: OperationManager,
    schema: ResponseSchema,
    retry: RetryOptions,
}

impl SequenceGenerator {
    pub fn new(
        llm: Arc<dyn TextGenerator>,
        operations: OperationManager,
        schema: JsonSchema,
        retry: RetryOptions,
    ) -> Self {
        Self {
            llm,
            operations,
            schema: ResponseSchema::Strict(schema),
            retry,
        }
    }

    /// Drafts a sequence as one tracked operation. The operation ends
    /// `Completed` with the draft as its result, or `Failed` with the error.
    pub async fn generate(&self, request: SequenceRequest) -> Result<SequenceDraft, GenerationError> {
        let mut metadata = Map::new();
        metadata.insert(
            "business_fields".to_string(),
            Value::from(request.business.len()),
        );
        metadata.insert(
            "interview_fields".to_string(),
            Value::from(request.interviews.len()),
        );
        let operation_id =
            self.operations
                .start_exclusive(&request.user_id, OPERATION_TYPE, Some(metadata))?;

        match self.run(&operation_id, &request).await {
            Ok(draft) => {
                if self
                    .operations
                    .complete(&operation_id, serde_json::to_value(&draft).ok())
                {
                    info!(
                        operation_id = %operation_id,
                        user_id = %request.user_id,
                        clean = draft.contamination.is_clean,
                        excluded = draft.excluded.len(),
                        "Email sequence drafted"
                    );
                    return Ok(draft);
                }
                // Cancelled or timed out after the last liveness check.
                ensure_live(&self.operations, &operation_id)?;
                Err(GenerationError::Internal(anyhow!(
                    "operation {operation_id} could not be completed"
                )))
            }
            Err(err) => {
                self.operations.fail(&operation_id, err.to_string());
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        operation_id: &str,
        request: &SequenceRequest,
    ) -> Result<SequenceDraft, GenerationError> {
        let owner_points = tag_source(
            &request.business,
            SourceType::OwnerBusinessData,
            &request.user_id,
        );
        let research_points = tag_source(
            &request.interviews,
            SourceType::ThirdPartyInterviewData,
            &request.user_id,
        );
        let business = build_context(owner_points.values());
        let research = build_context(research_points.values());

        if business.is_empty() {
            return Err(GenerationError::InsufficientContext(format!(
                "none of the {} business fields passed provenance checks",
                request.business.len()
            )));
        }

        let excluded: Vec<ExcludedPoint> = business
            .excluded()
            .iter()
            .chain(research.excluded())
            .cloned()
            .collect();

        let mut progress = Map::new();
        progress.insert("stage".to_string(), Value::from("generating"));
        progress.insert("excluded_points".to_string(), Value::from(excluded.len()));
        self.operations.mark_in_progress(operation_id, Some(progress));

        let prompt = build_prompt(&business, &research);
        let system = SEQUENCE_SYSTEM_TEMPLATE.replace("{json_only}", JSON_ONLY_SYSTEM);
        let sequence = self.draft(operation_id, &prompt, &system).await?;

        // A cancelled or timed-out operation's late result is discarded.
        ensure_live(&self.operations, operation_id)?;

        let contamination = scan_output(&sequence.full_text(), &business, &research);

        Ok(SequenceDraft {
            operation_id: operation_id.to_string(),
            sequence,
            contamination,
            excluded,
        })
    }

    /// One retried unit of work: fresh sample → recover → validate → number check.
    async fn draft(
        &self,
        operation_id: &str,
        prompt: &str,
        system: &str,
    ) -> Result<EmailSequence, GenerationError> {
        let llm = self.llm.as_ref();
        let operations = &self.operations;
        let schema = &self.schema;

        retry_with_backoff(
            move || async move {
                ensure_live(operations, operation_id)?;
                let raw = llm
                    .generate(prompt, system, SamplingParams::default())
                    .await?;
                let sequence: EmailSequence =
                    parse_and_validate(&raw, schema, ParseOptions::new("email sequence"))?;
                in_order(sequence)
            },
            &self.retry,
        )
        .await
    }
}

/// Errors unless the operation is still `Pending` or `InProgress`.
fn ensure_live(operations: &OperationManager, operation_id: &str) -> Result<(), GenerationError> {
    match operations.get_operation(operation_id).map(|op| op.status) {
        Some(OperationStatus::Pending | OperationStatus::InProgress) => Ok(()),
        Some(OperationStatus::Cancelled) => {
            info!(operation_id, "Operation cancelled; discarding result");
            Err(GenerationError::Cancelled(operation_id.to_string()))
        }
        Some(OperationStatus::Failed) => Err(GenerationError::Timeout {
            operation_id: operation_id.to_string(),
            after: operations.limits().timeout,
        }),
        Some(OperationStatus::Completed) => Err(GenerationError::Internal(anyhow!(
            "operation {operation_id} was already completed"
        ))),
        None => Err(GenerationError::UnknownOperation(operation_id.to_string())),
    }
}

/// The schema bounds each number to 1..=5; this rejects duplicates and
/// sorts the emails by number.
fn in_order(mut sequence: EmailSequence) -> Result<EmailSequence, GenerationError> {
    let numbers: BTreeSet<u8> = sequence.emails.iter().map(|e| e.email_number).collect();
    if numbers.len() != SEQUENCE_LENGTH {
        warn!(numbers = ?numbers, "Email numbers are not unique");
        return Err(anyhow!(
            "expected {SEQUENCE_LENGTH} unique emailNumbers, got {}",
            numbers.len()
        )
        .into());
    }
    sequence.emails.sort_by_key(|e| e.email_number);
    Ok(sequence)
}

fn build_prompt(business: &DomainContext, research: &DomainContext) -> String {
    let customer_research = if research.is_empty() {
        NO_RESEARCH.to_string()
    } else {
        research.render()
    };

    SEQUENCE_PROMPT_TEMPLATE
        .replace("{provenance_instruction}", PROVENANCE_INSTRUCTION)
        .replace("{business_context}", &business.render())
        .replace("{customer_research}", &customer_research)
        .replace("{sequence_length}", &SEQUENCE_LENGTH.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::ServiceError;
    use crate::operations::OperationLimits;
    use crate::provenance::ContaminationIssue;
    use crate::sequences::schema::email_sequence_schema;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Plays back canned responses in order and records every prompt.
    #[derive(Default)]
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<Result<String, ServiceError>>>,
        prompts: Mutex<Vec<String>>,
        /// Cancels this user's operations when called, before answering.
        cancel_for: Option<(OperationManager, String)>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<Result<String, ServiceError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        fn prompt(&self, index: usize) -> String {
            self.prompts.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            prompt: &str,
            _system: &str,
            _params: SamplingParams,
        ) -> Result<String, ServiceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some((operations, user_id)) = &self.cancel_for {
                for op in operations.get_user_operations(user_id) {
                    operations.cancel(&op.id);
                }
            }
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ServiceError::new(Some(500), "script exhausted")))
        }
    }

    fn sequence_json(numbers: &[u8], body: &str) -> String {
        let emails: Vec<String> = numbers
            .iter()
            .map(|n| format!(r#"{{"emailNumber":{n},"subject":"Part {n}","body":"{body}"}}"#))
            .collect();
        format!(r#"{{"emails":[{}]}}"#, emails.join(","))
    }

    fn valid_output() -> String {
        format!(
            "```json\n{}\n```",
            sequence_json(&[1, 2, 3, 4, 5], "Weekly planning keeps the week calm.")
        )
    }

    fn to_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn request(business: &[(&str, &str)], interviews: &[(&str, &str)]) -> SequenceRequest {
        SequenceRequest {
            user_id: "user-1".to_string(),
            business: to_map(business),
            interviews: to_map(interviews),
        }
    }

    fn default_request() -> SequenceRequest {
        request(
            &[("offer", "Weekly planning sessions for solo founders")],
            &[(
                "q1",
                "Honestly the mornings are chaos because the kids need to be at school by eight",
            )],
        )
    }

    fn pipeline(llm: Arc<ScriptedGenerator>, operations: OperationManager) -> SequenceGenerator {
        SequenceGenerator::new(
            llm,
            operations,
            email_sequence_schema().unwrap(),
            RetryOptions::new("email sequence").base_delay(Duration::from_millis(10)),
        )
    }

    fn operations() -> OperationManager {
        OperationManager::in_memory(OperationLimits::default())
    }

    #[tokio::test]
    async fn test_drafts_sequence_and_completes_operation() {
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(valid_output())]));
        let ops = operations();
        let draft = pipeline(llm.clone(), ops.clone())
            .generate(default_request())
            .await
            .unwrap();

        assert_eq!(draft.sequence.emails.len(), 5);
        assert!(draft.contamination.is_clean, "{:?}", draft.contamination);
        assert!(draft.excluded.is_empty());
        assert_eq!(llm.calls(), 1);

        let prompt = llm.prompt(0);
        assert!(prompt.contains("- offer: Weekly planning sessions for solo founders"));
        assert!(prompt.contains("- q1: Honestly the mornings are chaos"));

        let op = ops.get_operation(&draft.operation_id).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.operation_type, OPERATION_TYPE);
        assert_eq!(op.metadata["stage"], "generating");
        assert_eq!(op.metadata["business_fields"], 1);
        assert!(op.result.is_some());
    }

    #[tokio::test]
    async fn test_flagged_fields_never_reach_the_prompt() {
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(valid_output())]));
        let req = request(
            &[
                ("offer", "Weekly planning sessions for solo founders"),
                ("quote", "A customer said the pricing felt steep"),
            ],
            &[("q1", "The company offers a money-back guarantee")],
        );
        let draft = pipeline(llm.clone(), operations()).generate(req).await.unwrap();

        let prompt = llm.prompt(0);
        assert!(!prompt.contains("steep"));
        assert!(!prompt.contains("money-back"));
        assert!(prompt.contains("(none provided)"));

        let keys: Vec<&str> = draft.excluded.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["quote", "q1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_email_count_triggers_a_fresh_sample() {
        let single = "```json\n{\"emails\":[{\"emailNumber\":1,\"subject\":\"Hi\",\"body\":\"Hello\"}]}\n```";
        let llm = Arc::new(ScriptedGenerator::new(vec![
            Ok(single.to_string()),
            Ok(valid_output()),
        ]));
        let draft = pipeline(llm.clone(), operations())
            .generate(default_request())
            .await
            .unwrap();
        assert_eq!(draft.sequence.emails.len(), 5);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_email_numbers_trigger_a_fresh_sample() {
        let llm = Arc::new(ScriptedGenerator::new(vec![
            Ok(sequence_json(&[1, 1, 3, 4, 5], "Planning.")),
            Ok(sequence_json(&[5, 4, 3, 2, 1], "Planning.")),
        ]));
        let draft = pipeline(llm.clone(), operations())
            .generate(default_request())
            .await
            .unwrap();
        let numbers: Vec<u8> = draft.sequence.emails.iter().map(|e| e.email_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_truncated_output_is_repaired_without_retry() {
        let full = sequence_json(&[1, 2, 3, 4, 5], "Planning.");
        let truncated = full.strip_suffix("}]}").unwrap().to_string();
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(truncated)]));
        let draft = pipeline(llm.clone(), operations())
            .generate(default_request())
            .await
            .unwrap();
        assert_eq!(draft.sequence.emails.len(), 5);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_fails_operation_without_retry() {
        let llm = Arc::new(ScriptedGenerator::new(vec![Err(ServiceError::new(
            Some(401),
            "invalid x-api-key",
        ))]));
        let ops = operations();
        let err = pipeline(llm.clone(), ops.clone())
            .generate(default_request())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Rejected(_)));
        assert_eq!(llm.calls(), 1);

        let op = &ops.get_user_operations("user-1")[0];
        assert_eq!(op.status, OperationStatus::Failed);
        assert!(op.error.as_deref().unwrap().contains("invalid x-api-key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_surface_last_error() {
        let llm = Arc::new(ScriptedGenerator::new(vec![]));
        let err = pipeline(llm.clone(), operations())
            .generate(default_request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));
        assert_eq!(llm.calls(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_request_is_rejected_before_calling_service() {
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(valid_output())]));
        let ops = operations();
        ops.start("user-1", OPERATION_TYPE, None).unwrap();

        let err = pipeline(llm.clone(), ops)
            .generate(default_request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::OperationConflict { .. }));
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_untrusted_business_data_is_rejected() {
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(valid_output())]));
        let ops = operations();
        let req = request(&[("pain", "I struggle with my schedule")], &[]);
        let err = pipeline(llm.clone(), ops.clone())
            .generate(req)
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::InsufficientContext(_)));
        assert_eq!(llm.calls(), 0);
        assert_eq!(
            ops.get_user_operations("user-1")[0].status,
            OperationStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_cancelled_operation_discards_result() {
        let ops = operations();
        let llm = Arc::new(ScriptedGenerator {
            responses: Mutex::new(vec![Ok(valid_output())].into()),
            cancel_for: Some((ops.clone(), "user-1".to_string())),
            ..ScriptedGenerator::default()
        });
        let err = pipeline(llm.clone(), ops.clone())
            .generate(default_request())
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::Cancelled(_)));
        let op = &ops.get_user_operations("user-1")[0];
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert!(op.result.is_none());
    }

    #[tokio::test]
    async fn test_contamination_is_reported_but_does_not_block() {
        let leaked = "The mornings are chaos because the kids need to be at school by eight.";
        let llm = Arc::new(ScriptedGenerator::new(vec![Ok(sequence_json(
            &[1, 2, 3, 4, 5],
            leaked,
        ))]));
        let draft = pipeline(llm, operations())
            .generate(default_request())
            .await
            .unwrap();

        assert!(!draft.contamination.is_clean);
        assert!(draft.contamination.issues.iter().any(|i| matches!(
            i,
            ContaminationIssue::VerbatimLeak { source_key, .. } if source_key == "q1"
        )));
    }
}
