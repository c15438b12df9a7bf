//! Subscription reconciliation
//!
//! Converges the remote subscription's line items toward quantities derived
//! from current platform state. Every operation recomputes the full desired
//! state and diffs it against the remote items before touching the provider,
//! so calls are idempotent and safe to re-run after partial failure:
//! at-least-once retries never double-bill because the comparison is against
//! absolute remote state, not a delta.
//!
//! No ordering is imposed between concurrent reconciliations for the same
//! team; each call compares against the remote item's current value, so the
//! remote state converges to the last-computed desired value.

use fleethub_shared::{Project, Subscription, Team, TeamPlan};

use crate::client::StripeConfig;
use crate::counts::billable_device_count;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{ProrationBehavior, SubscriptionGateway};
use crate::store::PlatformStore;

/// Billing engine facade: reconciliation, project registration and checkout
/// session creation for a team.
#[derive(Clone)]
pub struct BillingService<S, G> {
    pub(crate) store: S,
    pub(crate) gateway: G,
    pub(crate) config: StripeConfig,
}

impl<S: PlatformStore, G: SubscriptionGateway> BillingService<S, G> {
    pub fn new(store: S, gateway: G, config: StripeConfig) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }

    pub(crate) async fn team_plan(&self, team: &Team) -> BillingResult<TeamPlan> {
        self.store.plan(team.plan_id).await?.ok_or_else(|| {
            BillingError::NotFound(format!("Plan {} for team {}", team.plan_id, team.id))
        })
    }

    pub(crate) async fn team_subscription(&self, team: &Team) -> BillingResult<Subscription> {
        self.store
            .subscription_for_team(team.id)
            .await?
            .ok_or(BillingError::NoSubscription(team.id))
    }

    /// Reconcile the member line item with the team's membership count.
    ///
    /// Quantity changes are invoiced immediately rather than deferred to the
    /// next cycle, so billing reflects headcount changes without waiting for
    /// a renewal. A no-op when the remote quantity already matches.
    pub async fn update_team_member_count(&self, team: &Team) -> BillingResult<()> {
        let subscription = self.team_subscription(team).await?;
        let plan = self.team_plan(team).await?;
        let pricing = self.config.member_pricing(&plan.name)?;
        let desired = self.store.member_count(team.id).await?.max(0) as u64;

        let items = self
            .gateway
            .subscription_items(&subscription.stripe_subscription_id)
            .await?;

        match items.iter().find(|item| item.product == pricing.product) {
            Some(item) if item.quantity == desired => {
                tracing::debug!(
                    team_id = %team.id,
                    quantity = desired,
                    "Member line item already correct"
                );
            }
            Some(item) => {
                self.gateway
                    .update_item_quantity(
                        &subscription.stripe_subscription_id,
                        &item.id,
                        desired,
                        ProrationBehavior::AlwaysInvoice,
                    )
                    .await?;
                tracing::info!(
                    team_id = %team.id,
                    item_id = %item.id,
                    from = item.quantity,
                    to = desired,
                    "Updated member line item quantity"
                );
            }
            None => {
                // The base member item is created by checkout completion,
                // not by the reconciler
                tracing::warn!(
                    team_id = %team.id,
                    product = %pricing.product,
                    "Subscription has no member line item; skipping"
                );
            }
        }
        Ok(())
    }

    /// Reconcile the device line item with the team's billable device count
    /// (raw count minus the plan's free allocation, floored at zero).
    ///
    /// A missing remote item is only created for a non-zero count; an
    /// existing item is updated in place, down to exactly 0 when the count
    /// drops inside the free allocation. Items are zeroed rather than
    /// deleted, preserving the item identifier for re-activation.
    pub async fn update_team_device_count(&self, team: &Team) -> BillingResult<()> {
        let subscription = self.team_subscription(team).await?;
        let plan = self.team_plan(team).await?;
        let total = self.store.device_count(team.id).await?;
        let desired = billable_device_count(total, plan.device_free_allocation as i64);

        // Missing device pricing only matters once the device class is
        // actually in use
        let pricing = match self.config.device_pricing(&plan.name) {
            Ok(pricing) => pricing,
            Err(_) if desired == 0 => return Ok(()),
            Err(err) => return Err(err),
        };

        let items = self
            .gateway
            .subscription_items(&subscription.stripe_subscription_id)
            .await?;

        match items.iter().find(|item| item.product == pricing.product) {
            None if desired == 0 => {
                // Never create a zero-quantity item
            }
            None => {
                self.gateway
                    .add_subscription_item(
                        &subscription.stripe_subscription_id,
                        &pricing.price,
                        desired,
                    )
                    .await?;
                tracing::info!(
                    team_id = %team.id,
                    quantity = desired,
                    "Added device line item to subscription"
                );
            }
            Some(item) if item.quantity == desired => {
                tracing::debug!(
                    team_id = %team.id,
                    quantity = desired,
                    "Device line item already correct"
                );
            }
            Some(item) => {
                self.gateway
                    .update_item_quantity(
                        &subscription.stripe_subscription_id,
                        &item.id,
                        desired,
                        ProrationBehavior::AlwaysInvoice,
                    )
                    .await?;
                tracing::info!(
                    team_id = %team.id,
                    item_id = %item.id,
                    from = item.quantity,
                    to = desired,
                    "Updated device line item quantity"
                );
            }
        }
        Ok(())
    }

    /// Register a newly billed project against the team's subscription and
    /// fold its footprint into the member/device quantities.
    ///
    /// The project id is recorded as a subscription metadata key before the
    /// counts are reconciled.
    pub async fn add_project(&self, team: &Team, project: &Project) -> BillingResult<()> {
        let subscription = self.team_subscription(team).await?;
        self.gateway
            .tag_subscription(
                &subscription.stripe_subscription_id,
                &project.id.to_string(),
                "true",
            )
            .await?;
        tracing::info!(
            team_id = %team.id,
            project_id = %project.id,
            "Registered project against subscription"
        );

        self.update_team_member_count(team).await?;
        self.update_team_device_count(team).await?;
        Ok(())
    }
}
