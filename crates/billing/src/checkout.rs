//! Checkout session creation
//!
//! Builds the one-shot provider session a team completes to set up billing.
//! The subscription record itself is created by the completion webhook, which
//! is outside this crate.

use std::collections::HashMap;

use fleethub_shared::{Team, User};

use crate::error::BillingResult;
use crate::gateway::{
    CheckoutLineItem, CheckoutMode, CheckoutSessionDescriptor, CheckoutSessionRequest,
    SubscriptionGateway,
};
use crate::reconcile::BillingService;
use crate::store::PlatformStore;

impl<S: PlatformStore, G: SubscriptionGateway> BillingService<S, G> {
    /// Create a checkout session for setting up the team's subscription.
    ///
    /// Uses the plan's resolved team price, reuses the team's existing Stripe
    /// customer when one is on record, and attaches the `free_trial` metadata
    /// flag only when the free-credit amount is configured and an acting user
    /// is given — true iff that user has never held a subscription as a team
    /// owner.
    pub async fn create_subscription_session(
        &self,
        team: &Team,
        promo_code: Option<&str>,
        acting_user: Option<&User>,
    ) -> BillingResult<CheckoutSessionDescriptor> {
        let plan = self.team_plan(team).await?;
        let pricing = self.config.member_pricing(&plan.name)?;
        let existing = self.store.subscription_for_team(team.id).await?;

        let mut metadata = HashMap::new();
        metadata.insert("team".to_string(), team.slug.clone());

        if self.config.new_customer_free_credit.is_some() {
            if let Some(user) = acting_user {
                let eligible = !self.store.user_has_held_subscription(user.id).await?;
                metadata.insert("free_trial".to_string(), eligible.to_string());
            }
        }

        let base = self.config.app_base_url.trim_end_matches('/');
        let overview_url = format!("{}/team/{}/overview", base, team.slug);

        let request = CheckoutSessionRequest {
            mode: CheckoutMode::Subscription,
            customer_id: existing.map(|sub| sub.stripe_customer_id),
            client_reference: team.slug.clone(),
            line_items: vec![CheckoutLineItem {
                price: pricing.price,
                quantity: 1,
            }],
            subscription_metadata: metadata,
            success_url: format!("{}?billing_session={{CHECKOUT_SESSION_ID}}", overview_url),
            cancel_url: overview_url,
            promotion_code: promo_code.map(str::to_string),
        };

        let session = self.gateway.create_checkout_session(request).await?;

        tracing::info!(
            team_id = %team.id,
            session_id = %session.id,
            "Created subscription checkout session"
        );
        Ok(session)
    }
}
