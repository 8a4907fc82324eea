use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Universe not found: {0}")]
    UniverseNotFound(Uuid),

    #[error("Node not found: {0}")]
    NodeNotFound(Uuid),

    #[error("Invalid task state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let id = Uuid::new_v4();
        let error = CoreError::UniverseNotFound(id);
        assert!(error.to_string().contains(&id.to_string()));
    }
}
