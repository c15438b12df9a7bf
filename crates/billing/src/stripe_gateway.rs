//! Stripe-backed implementation of the subscription gateway

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionDiscounts,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionSubscriptionData, CustomerId,
    Subscription, SubscriptionId, UpdateSubscription, UpdateSubscriptionItems,
};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    CheckoutMode, CheckoutSessionDescriptor, CheckoutSessionRequest, ProrationBehavior,
    SubscriptionGateway, SubscriptionLineItem,
};

/// Upper bound for a single provider call. On timeout the attempt is
/// abandoned with no local state changes; the next trigger reconciles again.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe implementation of [`SubscriptionGateway`]
#[derive(Clone)]
pub struct StripeGateway {
    client: StripeClient,
    call_timeout: Duration,
}

impl StripeGateway {
    pub fn new(client: StripeClient) -> Self {
        Self {
            client,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(client: StripeClient, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }

    /// Run a provider call bounded by the configured timeout
    async fn bounded<T, F>(&self, operation: &str, fut: F) -> BillingResult<T>
    where
        F: Future<Output = Result<T, stripe::StripeError>> + Send,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result.map_err(BillingError::from),
            Err(_) => Err(BillingError::Provider(format!(
                "{} timed out after {:?}",
                operation, self.call_timeout
            ))),
        }
    }
}

fn parse_subscription_id(subscription_id: &str) -> BillingResult<SubscriptionId> {
    subscription_id
        .parse()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid subscription ID: {}", e)))
}

/// Product identifier of a subscription item, whether or not the price's
/// product is expanded in the API response
fn item_product(item: &stripe::SubscriptionItem) -> Option<String> {
    let price = item.price.as_ref()?;
    match &price.product {
        Some(stripe::Expandable::Id(id)) => Some(id.to_string()),
        Some(stripe::Expandable::Object(product)) => Some(product.id.to_string()),
        None => None,
    }
}

fn stripe_proration(proration: ProrationBehavior) -> SubscriptionProrationBehavior {
    match proration {
        ProrationBehavior::CreateProrations => SubscriptionProrationBehavior::CreateProrations,
        ProrationBehavior::None => SubscriptionProrationBehavior::None,
        ProrationBehavior::AlwaysInvoice => SubscriptionProrationBehavior::AlwaysInvoice,
    }
}

#[async_trait]
impl SubscriptionGateway for StripeGateway {
    async fn subscription_items(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Vec<SubscriptionLineItem>> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let subscription = self
            .bounded(
                "retrieve subscription",
                Subscription::retrieve(self.client.inner(), &sub_id, &[]),
            )
            .await?;

        Ok(subscription
            .items
            .data
            .iter()
            .filter_map(|item| {
                item_product(item).map(|product| SubscriptionLineItem {
                    id: item.id.to_string(),
                    quantity: item.quantity.unwrap_or(0),
                    product,
                })
            })
            .collect())
    }

    async fn update_item_quantity(
        &self,
        subscription_id: &str,
        item_id: &str,
        quantity: u64,
        proration: ProrationBehavior,
    ) -> BillingResult<()> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id.to_string()),
                quantity: Some(quantity),
                ..Default::default()
            }]),
            proration_behavior: Some(stripe_proration(proration)),
            ..Default::default()
        };

        self.bounded(
            "update subscription item",
            Subscription::update(self.client.inner(), &sub_id, params),
        )
        .await?;

        tracing::debug!(
            subscription_id = %subscription_id,
            item_id = %item_id,
            quantity = quantity,
            proration = proration.as_str(),
            "Updated subscription item quantity"
        );
        Ok(())
    }

    async fn add_subscription_item(
        &self,
        subscription_id: &str,
        price: &str,
        quantity: u64,
    ) -> BillingResult<()> {
        let sub_id = parse_subscription_id(subscription_id)?;
        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                price: Some(price.to_string()),
                quantity: Some(quantity),
                ..Default::default()
            }]),
            proration_behavior: Some(SubscriptionProrationBehavior::AlwaysInvoice),
            ..Default::default()
        };

        self.bounded(
            "append subscription item",
            Subscription::update(self.client.inner(), &sub_id, params),
        )
        .await?;

        tracing::debug!(
            subscription_id = %subscription_id,
            price = %price,
            quantity = quantity,
            "Appended subscription line item"
        );
        Ok(())
    }

    async fn tag_subscription(
        &self,
        subscription_id: &str,
        key: &str,
        value: &str,
    ) -> BillingResult<()> {
        let sub_id = parse_subscription_id(subscription_id)?;

        // Stripe merges metadata keys on update, so this never clobbers
        // other entries
        let mut metadata = HashMap::new();
        metadata.insert(key.to_string(), value.to_string());

        let params = UpdateSubscription {
            metadata: Some(metadata),
            ..Default::default()
        };

        self.bounded(
            "update subscription metadata",
            Subscription::update(self.client.inner(), &sub_id, params),
        )
        .await?;
        Ok(())
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> BillingResult<CheckoutSessionDescriptor> {
        let mode = match request.mode {
            CheckoutMode::Subscription => CheckoutSessionMode::Subscription,
            CheckoutMode::Payment => CheckoutSessionMode::Payment,
        };

        let customer = request
            .customer_id
            .as_deref()
            .map(|id| {
                id.parse::<CustomerId>()
                    .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))
            })
            .transpose()?;

        let line_items: Vec<CreateCheckoutSessionLineItems> = request
            .line_items
            .iter()
            .map(|item| CreateCheckoutSessionLineItems {
                price: Some(item.price.clone()),
                quantity: Some(item.quantity),
                ..Default::default()
            })
            .collect();

        // Reusing an existing customer: let checkout refresh their name
        let customer_update = customer.as_ref().map(|_| {
            stripe::CreateCheckoutSessionCustomerUpdate {
                name: Some(stripe::CreateCheckoutSessionCustomerUpdateName::Auto),
                ..Default::default()
            }
        });

        let discounts = request.promotion_code.as_ref().map(|code| {
            vec![CreateCheckoutSessionDiscounts {
                promotion_code: Some(code.clone()),
                ..Default::default()
            }]
        });
        // Manual promotion-code entry is only allowed when no discount is
        // already applied
        let allow_promotion_codes = if discounts.is_some() { None } else { Some(true) };

        let params = CreateCheckoutSession {
            mode: Some(mode),
            customer,
            customer_update,
            client_reference_id: Some(&request.client_reference),
            line_items: Some(line_items),
            subscription_data: Some(CreateCheckoutSessionSubscriptionData {
                metadata: Some(request.subscription_metadata.clone()),
                ..Default::default()
            }),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            discounts,
            allow_promotion_codes,
            ..Default::default()
        };

        let session = self
            .bounded(
                "create checkout session",
                CheckoutSession::create(self.client.inner(), params),
            )
            .await?;

        tracing::info!(
            session_id = %session.id,
            client_reference = %request.client_reference,
            "Created checkout session"
        );

        Ok(CheckoutSessionDescriptor {
            id: session.id.to_string(),
            url: session.url,
        })
    }
}
