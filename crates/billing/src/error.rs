//! Billing error types

use thiserror::Error;
use uuid::Uuid;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// Missing or malformed product/price configuration. Fatal to the single
    /// call that hit it; surfaced to the caller, never retried automatically.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Billing provider call failed or timed out. Transient: the whole
    /// reconciliation is retried on the next trigger, never partially
    /// applied.
    #[error("Billing provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Team {0} has no billing subscription")]
    NoSubscription(Uuid),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Provider(err.to_string())
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
