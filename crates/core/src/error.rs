use crate::types::{Credits, DbId};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Insufficient funds: {required} credits required, {available} available")]
    InsufficientFunds { required: Credits, available: Credits },

    #[error("Internal error: {0}")]
    Internal(String),
}
