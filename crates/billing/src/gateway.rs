//! Boundary over the external billing provider.
//!
//! The engine only ever talks to the provider through this trait: fetch the
//! current line items of a subscription, adjust quantities, append a new line
//! item, merge a metadata key, create a checkout session. The production
//! implementation lives in [`crate::stripe_gateway`]; an in-memory recording
//! implementation for tests lives in the [`test`] module.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::BillingResult;

/// A line item mirrored from the remote subscription.
///
/// Mirrored, never the source of truth: internal counts always win and the
/// remote item is reconciled toward them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLineItem {
    /// Provider-side item identifier
    pub id: String,
    pub quantity: u64,
    /// Product identifier the item bills for
    pub product: String,
}

/// How the provider should prorate a quantity change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProrationBehavior {
    /// Create prorations, settled on the next invoice (default)
    #[default]
    CreateProrations,
    /// No proration
    None,
    /// Invoice the difference immediately
    AlwaysInvoice,
}

impl ProrationBehavior {
    /// Stripe API string for this behavior
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateProrations => "create_prorations",
            Self::None => "none",
            Self::AlwaysInvoice => "always_invoice",
        }
    }
}

/// Checkout session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutMode {
    Subscription,
    Payment,
}

/// One priced line of a checkout session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLineItem {
    pub price: String,
    pub quantity: u64,
}

/// Payload for creating a checkout session
#[derive(Debug, Clone)]
pub struct CheckoutSessionRequest {
    pub mode: CheckoutMode,
    /// Existing provider customer to reuse; `None` lets the provider create
    /// a new customer on completion
    pub customer_id: Option<String>,
    /// Internal reference attached to the session (team slug)
    pub client_reference: String,
    pub line_items: Vec<CheckoutLineItem>,
    /// Metadata stored on the subscription the session creates
    pub subscription_metadata: HashMap<String, String>,
    pub success_url: String,
    pub cancel_url: String,
    /// Promotion code applied as a discount; when unset the hosted page
    /// allows manual promotion-code entry instead
    pub promotion_code: Option<String>,
}

/// Descriptor of a created checkout session
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckoutSessionDescriptor {
    pub id: String,
    pub url: Option<String>,
}

/// Narrow call contract against the external billing provider
#[async_trait]
pub trait SubscriptionGateway: Send + Sync {
    /// Current line items of a subscription
    async fn subscription_items(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Vec<SubscriptionLineItem>>;

    /// Set the quantity of an existing line item
    async fn update_item_quantity(
        &self,
        subscription_id: &str,
        item_id: &str,
        quantity: u64,
        proration: ProrationBehavior,
    ) -> BillingResult<()>;

    /// Append a new line item to the subscription as a whole-subscription
    /// update (the item does not exist yet, so there is no item id to target)
    async fn add_subscription_item(
        &self,
        subscription_id: &str,
        price: &str,
        quantity: u64,
    ) -> BillingResult<()>;

    /// Merge a metadata key into the subscription
    async fn tag_subscription(
        &self,
        subscription_id: &str,
        key: &str,
        value: &str,
    ) -> BillingResult<()>;

    /// Create a checkout session
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> BillingResult<CheckoutSessionDescriptor>;
}

/// In-memory recording gateway for tests.
#[cfg(any(test, feature = "test-billing"))]
#[allow(clippy::unwrap_used)]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use std::sync::RwLock;

    /// A write call observed by the recording gateway
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum GatewayCall {
        ItemUpdated {
            item_id: String,
            quantity: u64,
            proration: ProrationBehavior,
        },
        ItemAdded {
            subscription_id: String,
            price: String,
            quantity: u64,
        },
        Tagged {
            subscription_id: String,
            key: String,
            value: String,
        },
        SessionCreated,
    }

    impl GatewayCall {
        /// Whether this call mutated subscription line items
        pub fn is_item_write(&self) -> bool {
            matches!(self, Self::ItemUpdated { .. } | Self::ItemAdded { .. })
        }
    }

    #[derive(Default)]
    struct RemoteSubscription {
        items: Vec<SubscriptionLineItem>,
        metadata: HashMap<String, String>,
    }

    #[derive(Default)]
    struct State {
        subscriptions: HashMap<String, RemoteSubscription>,
        /// Product attached to items created from a given price
        price_products: HashMap<String, String>,
        calls: Vec<GatewayCall>,
        sessions: Vec<CheckoutSessionRequest>,
        next_item: u64,
    }

    /// Records every call and applies writes to in-memory state, so repeated
    /// reconciliation converges the way the live provider would.
    #[derive(Default)]
    pub struct RecordingGateway {
        state: RwLock<State>,
    }

    impl RecordingGateway {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register an empty remote subscription
        pub fn add_subscription(&self, subscription_id: &str) {
            let mut state = self.state.write().unwrap();
            state
                .subscriptions
                .entry(subscription_id.to_string())
                .or_default();
        }

        /// Seed a line item on a subscription
        pub fn add_item(&self, subscription_id: &str, item_id: &str, product: &str, quantity: u64) {
            let mut state = self.state.write().unwrap();
            state
                .subscriptions
                .entry(subscription_id.to_string())
                .or_default()
                .items
                .push(SubscriptionLineItem {
                    id: item_id.to_string(),
                    quantity,
                    product: product.to_string(),
                });
        }

        /// Teach the gateway which product an appended price creates items for
        pub fn map_price(&self, price: &str, product: &str) {
            self.state
                .write()
                .unwrap()
                .price_products
                .insert(price.to_string(), product.to_string());
        }

        pub fn calls(&self) -> Vec<GatewayCall> {
            self.state.read().unwrap().calls.clone()
        }

        /// Number of calls that mutated subscription line items
        pub fn item_writes(&self) -> usize {
            self.state
                .read()
                .unwrap()
                .calls
                .iter()
                .filter(|c| c.is_item_write())
                .count()
        }

        pub fn item_quantity(&self, subscription_id: &str, product: &str) -> Option<u64> {
            self.state
                .read()
                .unwrap()
                .subscriptions
                .get(subscription_id)?
                .items
                .iter()
                .find(|item| item.product == product)
                .map(|item| item.quantity)
        }

        pub fn metadata(&self, subscription_id: &str) -> HashMap<String, String> {
            self.state
                .read()
                .unwrap()
                .subscriptions
                .get(subscription_id)
                .map(|sub| sub.metadata.clone())
                .unwrap_or_default()
        }

        pub fn sessions(&self) -> Vec<CheckoutSessionRequest> {
            self.state.read().unwrap().sessions.clone()
        }
    }

    #[async_trait]
    impl SubscriptionGateway for RecordingGateway {
        async fn subscription_items(
            &self,
            subscription_id: &str,
        ) -> BillingResult<Vec<SubscriptionLineItem>> {
            let state = self.state.read().unwrap();
            state
                .subscriptions
                .get(subscription_id)
                .map(|sub| sub.items.clone())
                .ok_or_else(|| {
                    BillingError::Provider(format!("No such subscription: {}", subscription_id))
                })
        }

        async fn update_item_quantity(
            &self,
            subscription_id: &str,
            item_id: &str,
            quantity: u64,
            proration: ProrationBehavior,
        ) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            let subscription = state.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::Provider(format!("No such subscription: {}", subscription_id))
            })?;
            let item = subscription
                .items
                .iter_mut()
                .find(|item| item.id == item_id)
                .ok_or_else(|| {
                    BillingError::Provider(format!("No such subscription item: {}", item_id))
                })?;
            item.quantity = quantity;
            state.calls.push(GatewayCall::ItemUpdated {
                item_id: item_id.to_string(),
                quantity,
                proration,
            });
            Ok(())
        }

        async fn add_subscription_item(
            &self,
            subscription_id: &str,
            price: &str,
            quantity: u64,
        ) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            state.next_item += 1;
            let item_id = format!("si_{}", state.next_item);
            let product = state
                .price_products
                .get(price)
                .cloned()
                .unwrap_or_else(|| price.to_string());
            let subscription = state.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::Provider(format!("No such subscription: {}", subscription_id))
            })?;
            subscription.items.push(SubscriptionLineItem {
                id: item_id,
                quantity,
                product,
            });
            state.calls.push(GatewayCall::ItemAdded {
                subscription_id: subscription_id.to_string(),
                price: price.to_string(),
                quantity,
            });
            Ok(())
        }

        async fn tag_subscription(
            &self,
            subscription_id: &str,
            key: &str,
            value: &str,
        ) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            let subscription = state.subscriptions.get_mut(subscription_id).ok_or_else(|| {
                BillingError::Provider(format!("No such subscription: {}", subscription_id))
            })?;
            subscription
                .metadata
                .insert(key.to_string(), value.to_string());
            state.calls.push(GatewayCall::Tagged {
                subscription_id: subscription_id.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            });
            Ok(())
        }

        async fn create_checkout_session(
            &self,
            request: CheckoutSessionRequest,
        ) -> BillingResult<CheckoutSessionDescriptor> {
            let mut state = self.state.write().unwrap();
            state.sessions.push(request);
            state.calls.push(GatewayCall::SessionCreated);
            let id = format!("cs_test_{}", state.sessions.len());
            Ok(CheckoutSessionDescriptor {
                id,
                url: Some("https://checkout.stripe.test/session".to_string()),
            })
        }
    }
}
