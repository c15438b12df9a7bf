// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! FleetHub Billing Engine
//!
//! Keeps the Stripe subscription of each team synchronized with internally
//! tracked resource counts, and resolves expired team trials.
//!
//! ## Features
//!
//! - **Reconciliation**: idempotently converge member/device line item
//!   quantities toward counts derived from platform state
//! - **Trial lifecycle**: suspend or migrate trial projects once a team's
//!   trial window closes
//! - **Checkout**: build the Stripe checkout session that sets up a team's
//!   subscription
//! - **Plan resolution**: per-plan product/price overrides over platform
//!   defaults

pub mod checkout;
pub mod client;
pub mod counts;
pub mod error;
pub mod gateway;
pub mod pg_store;
pub mod reconcile;
pub mod store;
pub mod stripe_gateway;
pub mod trial;

#[cfg(test)]
mod edge_case_tests;
#[cfg(test)]
mod test_fixtures;

// Client
pub use client::{PlanPricingOverride, ProductPrice, StripeClient, StripeConfig};

// Counts
pub use counts::billable_device_count;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    CheckoutLineItem, CheckoutMode, CheckoutSessionDescriptor, CheckoutSessionRequest,
    ProrationBehavior, SubscriptionGateway, SubscriptionLineItem,
};

// Stores
pub use pg_store::PostgresStore;
pub use store::PlatformStore;

// Services
pub use reconcile::BillingService;
pub use stripe_gateway::StripeGateway;
pub use trial::{billing_state_for_new_project, TrialHousekeeper};
