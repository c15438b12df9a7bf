//! Stripe client configuration and plan price resolution

use std::collections::HashMap;

use serde::Deserialize;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Product/price pair for one billable resource class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductPrice {
    pub product: String,
    pub price: String,
}

/// Per-plan overrides of the platform default products/prices.
///
/// Any field left unset falls back to the platform default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanPricingOverride {
    pub team_product: Option<String>,
    pub team_price: Option<String>,
    pub device_product: Option<String>,
    pub device_price: Option<String>,
}

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,

    // Platform defaults for the member (team seat) line item
    pub team_product: Option<String>,
    pub team_price: Option<String>,

    // Platform defaults for the device line item
    pub device_product: Option<String>,
    pub device_price: Option<String>,

    /// Per-plan overrides keyed by plan name
    pub plan_pricing: HashMap<String, PlanPricingOverride>,

    /// Free credit (in cents) granted to first-time customers. When set,
    /// checkout sessions carry a `free_trial` metadata flag for the
    /// completion webhook to act on.
    pub new_customer_free_credit: Option<i64>,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let plan_pricing = match std::env::var("STRIPE_PLAN_PRICING") {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                BillingError::Config(format!("STRIPE_PLAN_PRICING is not valid JSON: {}", e))
            })?,
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            team_product: std::env::var("STRIPE_TEAM_PRODUCT").ok(),
            team_price: std::env::var("STRIPE_TEAM_PRICE").ok(),
            device_product: std::env::var("STRIPE_DEVICE_PRODUCT").ok(),
            device_price: std::env::var("STRIPE_DEVICE_PRICE").ok(),
            plan_pricing,
            new_customer_free_credit: std::env::var("STRIPE_NEW_CUSTOMER_FREE_CREDIT")
                .ok()
                .and_then(|v| v.parse().ok()),
        })
    }

    /// Product/price for the member (team seat) line item of a plan
    pub fn member_pricing(&self, plan_name: &str) -> BillingResult<ProductPrice> {
        let overrides = self.plan_pricing.get(plan_name);
        let product = overrides
            .and_then(|o| o.team_product.clone())
            .or_else(|| self.team_product.clone());
        let price = overrides
            .and_then(|o| o.team_price.clone())
            .or_else(|| self.team_price.clone());

        match (product, price) {
            (Some(product), Some(price)) => Ok(ProductPrice { product, price }),
            _ => Err(BillingError::Config(format!(
                "No team product/price configured for plan '{}'",
                plan_name
            ))),
        }
    }

    /// Product/price for the device line item of a plan
    pub fn device_pricing(&self, plan_name: &str) -> BillingResult<ProductPrice> {
        let overrides = self.plan_pricing.get(plan_name);
        let product = overrides
            .and_then(|o| o.device_product.clone())
            .or_else(|| self.device_product.clone());
        let price = overrides
            .and_then(|o| o.device_price.clone())
            .or_else(|| self.device_price.clone());

        match (product, price) {
            (Some(product), Some(price)) => Ok(ProductPrice { product, price }),
            _ => Err(BillingError::Config(format!(
                "No device product/price configured for plan '{}'",
                plan_name
            ))),
        }
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_defaults() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
            team_product: Some("prod_team_default".to_string()),
            team_price: Some("price_team_default".to_string()),
            device_product: Some("prod_device_default".to_string()),
            device_price: Some("price_device_default".to_string()),
            plan_pricing: HashMap::new(),
            new_customer_free_credit: None,
        }
    }

    #[test]
    fn falls_back_to_platform_defaults() {
        let config = config_with_defaults();
        let pricing = config.member_pricing("starter").unwrap();
        assert_eq!(pricing.product, "prod_team_default");
        assert_eq!(pricing.price, "price_team_default");
    }

    #[test]
    fn plan_override_wins_over_default() {
        let mut config = config_with_defaults();
        config.plan_pricing.insert(
            "starter".to_string(),
            PlanPricingOverride {
                team_product: Some("prod_team_starter".to_string()),
                team_price: Some("price_team_starter".to_string()),
                ..Default::default()
            },
        );

        let pricing = config.member_pricing("starter").unwrap();
        assert_eq!(pricing.product, "prod_team_starter");
        assert_eq!(pricing.price, "price_team_starter");

        // Unrelated plans keep the defaults
        let pricing = config.member_pricing("enterprise").unwrap();
        assert_eq!(pricing.product, "prod_team_default");
    }

    #[test]
    fn partial_override_falls_back_per_field() {
        let mut config = config_with_defaults();
        config.plan_pricing.insert(
            "starter".to_string(),
            PlanPricingOverride {
                device_price: Some("price_device_starter".to_string()),
                ..Default::default()
            },
        );

        let pricing = config.device_pricing("starter").unwrap();
        assert_eq!(pricing.product, "prod_device_default");
        assert_eq!(pricing.price, "price_device_starter");
    }

    #[test]
    fn missing_mapping_is_a_config_error() {
        let mut config = config_with_defaults();
        config.device_product = None;
        config.device_price = None;

        let err = config.device_pricing("starter").unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }
}
