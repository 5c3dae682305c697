use crate::operations::OperationManager;
use crate::sequences::SequenceGenerator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Per-user operation bookkeeping; shared with the sequence pipeline.
    pub operations: OperationManager,
    /// Sequence pipeline. Holds the `Arc<dyn TextGenerator>`, swappable in tests.
    pub sequences: SequenceGenerator,
}
