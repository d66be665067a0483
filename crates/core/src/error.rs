#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Identifier '{prefix}' is ambiguous: {matches} files match")]
    AmbiguousIdentifier { prefix: String, matches: usize },

    #[error("Workflow node '{node_id}' not found")]
    SlotNotFound { node_id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
