//! crates/chat_relay_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the relay's core logic.
//! The remote chat-completion provider sits behind `CompletionService` so the
//! core never depends on a specific HTTP client or vendor.

use async_trait::async_trait;

use crate::domain::Turn;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., network, provider).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produces the next assistant turn for an ordered conversation.
    async fn complete(&self, history: &[Turn]) -> PortResult<Turn>;
}
