//! External services the orchestrator depends on.
//!
//! Each is a narrow `async_trait` object so hosts can plug in their own
//! database, ledger and object store. All methods report failures as
//! [`CoreError`].

use async_trait::async_trait;
use genforge_core::error::CoreError;
use genforge_core::output::{CreateOutputRecord, OutputRecord};
use genforge_core::template::GenerationTemplate;
use genforge_core::types::{Credits, DbId};

pub use genforge_events::LiveNotifier;

/// Read access to generation templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Returns [`CoreError::NotFound`] when no template has this id.
    async fn get_template(&self, id: DbId) -> Result<GenerationTemplate, CoreError>;
}

/// Per-user credit balance.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_balance(&self, user_id: DbId) -> Result<Credits, CoreError>;

    /// Subtract `amount` and return the new balance.
    ///
    /// Fails with [`CoreError::InsufficientFunds`] when the balance is too low.
    /// The check and the subtraction must be one atomic step.
    async fn debit(&self, user_id: DbId, amount: Credits, reason: &str)
        -> Result<Credits, CoreError>;
}

/// Durable object storage for produced files.
#[async_trait]
pub trait DurableStorage: Send + Sync {
    /// Store `bytes` under `key` and return a URL that serves them.
    async fn upload(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, CoreError>;
}

/// Persistence for output metadata.
#[async_trait]
pub trait OutputStore: Send + Sync {
    async fn create(&self, input: CreateOutputRecord) -> Result<OutputRecord, CoreError>;
}
