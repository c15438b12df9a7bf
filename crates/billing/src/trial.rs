//! Trial lifecycle housekeeping
//!
//! Teams created under trial mode carry a `trial_ends_at` timestamp. Once
//! that window closes, each of the team's trial projects is either suspended
//! (no billing configured) or migrated onto the subscription (billing
//! configured since). The housekeeper runs on a fixed schedule from the
//! worker binary.

use time::OffsetDateTime;

use fleethub_shared::{BillingState, ProjectState, Team, TrialSettings};

use crate::error::BillingResult;
use crate::gateway::SubscriptionGateway;
use crate::reconcile::BillingService;
use crate::store::PlatformStore;

/// Periodic task that resolves expired team trials
pub struct TrialHousekeeper<S, G> {
    billing: BillingService<S, G>,
}

impl<S: PlatformStore, G: SubscriptionGateway> TrialHousekeeper<S, G> {
    pub fn new(billing: BillingService<S, G>) -> Self {
        Self { billing }
    }

    pub fn billing(&self) -> &BillingService<S, G> {
        &self.billing
    }

    /// Run one sweep at the current time
    pub async fn run(&self) -> BillingResult<()> {
        self.run_at(OffsetDateTime::now_utc()).await
    }

    /// Run one sweep against the given clock.
    ///
    /// Trial settings are re-read from the store on every sweep so that
    /// toggling trial mode takes effect immediately.
    pub async fn run_at(&self, now: OffsetDateTime) -> BillingResult<()> {
        let settings = self.billing.store().trial_settings().await?;
        if !settings.enabled {
            tracing::debug!("Trial mode disabled; skipping sweep");
            return Ok(());
        }

        let teams = self.billing.store().teams_with_expired_trial(now).await?;
        if teams.is_empty() {
            return Ok(());
        }
        tracing::info!(teams = teams.len(), "Processing expired team trials");

        for team in teams {
            // One team's failure must not block the rest. The trial marker
            // is only cleared on success, so the team is retried next sweep.
            if let Err(err) = self.process_team(&team).await {
                tracing::error!(
                    team_id = %team.id,
                    error = %err,
                    "Failed to process expired trial"
                );
            }
        }
        Ok(())
    }

    async fn process_team(&self, team: &Team) -> BillingResult<()> {
        let store = self.billing.store();
        let projects = store
            .projects_in_billing_state(team.id, BillingState::Trial)
            .await?;

        match store.subscription_for_team(team.id).await? {
            None => {
                for project in &projects {
                    store
                        .set_project_state(project.id, ProjectState::Suspended)
                        .await?;
                    store
                        .set_project_billing_state(project.id, BillingState::NotBilled)
                        .await?;
                    tracing::info!(
                        team_id = %team.id,
                        project_id = %project.id,
                        "Suspended trial project; no billing configured"
                    );
                }
            }
            Some(subscription) => {
                for project in &projects {
                    // Remote registration first: the billing state commits
                    // only once the provider write has succeeded
                    self.billing
                        .gateway()
                        .tag_subscription(
                            &subscription.stripe_subscription_id,
                            &project.id.to_string(),
                            "true",
                        )
                        .await?;
                    store
                        .set_project_billing_state(project.id, BillingState::Billed)
                        .await?;
                    tracing::info!(
                        team_id = %team.id,
                        project_id = %project.id,
                        "Moved trial project onto subscription"
                    );
                }
                if !projects.is_empty() {
                    // Batched: one reconciliation pass per team, not one per
                    // project
                    self.billing.update_team_member_count(team).await?;
                    self.billing.update_team_device_count(team).await?;
                }
            }
        }

        store.clear_trial(team.id).await?;
        Ok(())
    }
}

/// Billing state for a newly created project.
///
/// Trial placement requires all of: trial mode enabled, the project's type
/// permitted for trials, no billing subscription on the team, and the team
/// still inside its trial window. Otherwise the project is billed when a
/// subscription exists and unbilled when not.
pub fn billing_state_for_new_project(
    settings: &TrialSettings,
    team: &Team,
    project_type: &str,
    has_subscription: bool,
    now: OffsetDateTime,
) -> BillingState {
    if settings.enabled
        && !has_subscription
        && settings.permits(project_type)
        && team.in_trial_window(now)
    {
        BillingState::Trial
    } else if has_subscription {
        BillingState::Billed
    } else {
        BillingState::NotBilled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{epoch, plan, team, trial_project, TestPlatform, SUB_ID};
    use fleethub_shared::TeamRole;
    use time::Duration;
    use uuid::Uuid;

    fn trial_settings() -> TrialSettings {
        TrialSettings {
            enabled: true,
            duration_days: 5,
            project_type: Some("edge".to_string()),
        }
    }

    fn now() -> OffsetDateTime {
        epoch() + Duration::days(100)
    }

    fn expire_trial(platform: &TestPlatform) -> Team {
        let mut team = platform.team.clone();
        team.trial_ends_at = Some(now() - Duration::seconds(1));
        platform.store.insert_team(team.clone());
        team
    }

    #[tokio::test]
    async fn suspends_projects_when_trial_ends_without_billing() {
        let platform = TestPlatform::without_subscription();
        platform.store.set_trial_settings(trial_settings());
        let team = expire_trial(&platform);

        let project = trial_project(team.id, "edge");
        platform.store.insert_project(project.clone());

        let housekeeper = TrialHousekeeper::new(platform.into_service());
        housekeeper.run_at(now()).await.unwrap();

        let store = housekeeper.billing().store();
        let after = store.project(project.id);
        assert_eq!(after.state, ProjectState::Suspended);
        assert_eq!(after.billing_state, BillingState::NotBilled);
        assert!(store.team(team.id).trial_ends_at.is_none());
        // No provider calls on the suspend path
        assert!(housekeeper.billing().gateway().calls().is_empty());
    }

    #[tokio::test]
    async fn migrates_projects_to_billing_when_subscription_exists() {
        let platform = TestPlatform::with_subscription();
        platform.store.set_trial_settings(trial_settings());
        platform
            .gateway
            .add_item(SUB_ID, "si_team", "prod_team_default", 0);
        let team = expire_trial(&platform);

        // Two members so the batched member reconciliation has something to do
        platform
            .store
            .add_member(team.id, Uuid::new_v4(), TeamRole::Owner);
        platform
            .store
            .add_member(team.id, Uuid::new_v4(), TeamRole::Member);

        let first = trial_project(team.id, "edge");
        let second = trial_project(team.id, "edge");
        platform.store.insert_project(first.clone());
        platform.store.insert_project(second.clone());

        let housekeeper = TrialHousekeeper::new(platform.into_service());
        housekeeper.run_at(now()).await.unwrap();

        let billing = housekeeper.billing();
        let store = billing.store();
        for project in [&first, &second] {
            let after = store.project(project.id);
            assert_eq!(after.billing_state, BillingState::Billed);
            assert_eq!(after.state, ProjectState::Running);
            assert_eq!(
                billing.gateway().metadata(SUB_ID).get(&project.id.to_string()),
                Some(&"true".to_string())
            );
        }
        // Batched reconciliation: member item converged once, to the
        // membership count
        assert_eq!(
            billing.gateway().item_quantity(SUB_ID, "prod_team_default"),
            Some(2)
        );
        assert_eq!(billing.gateway().item_writes(), 1);
        assert!(store.team(team.id).trial_ends_at.is_none());
    }

    #[tokio::test]
    async fn disabled_trial_mode_is_a_noop() {
        let platform = TestPlatform::without_subscription();
        platform.store.set_trial_settings(TrialSettings {
            enabled: false,
            ..trial_settings()
        });
        let team = expire_trial(&platform);

        let project = trial_project(team.id, "edge");
        platform.store.insert_project(project.clone());

        let housekeeper = TrialHousekeeper::new(platform.into_service());
        housekeeper.run_at(now()).await.unwrap();

        let store = housekeeper.billing().store();
        assert_eq!(store.project(project.id).billing_state, BillingState::Trial);
        assert!(store.team(team.id).trial_ends_at.is_some());
    }

    #[tokio::test]
    async fn unexpired_teams_are_left_alone() {
        let platform = TestPlatform::without_subscription();
        platform.store.set_trial_settings(trial_settings());
        let mut team = platform.team.clone();
        team.trial_ends_at = Some(now() + Duration::days(1));
        platform.store.insert_team(team.clone());

        let project = trial_project(team.id, "edge");
        platform.store.insert_project(project.clone());

        let housekeeper = TrialHousekeeper::new(platform.into_service());
        housekeeper.run_at(now()).await.unwrap();

        let store = housekeeper.billing().store();
        assert_eq!(store.project(project.id).billing_state, BillingState::Trial);
        assert!(store.team(team.id).trial_ends_at.is_some());
    }

    #[tokio::test]
    async fn one_failing_team_does_not_block_the_rest() {
        let platform = TestPlatform::without_subscription();
        platform.store.set_trial_settings(trial_settings());

        let poisoned = expire_trial(&platform);
        platform.store.poison_team(poisoned.id);
        let poisoned_project = trial_project(poisoned.id, "edge");
        platform.store.insert_project(poisoned_project.clone());

        let mut healthy = team(platform.plan.id, "healthy");
        healthy.trial_ends_at = Some(now() - Duration::seconds(1));
        platform.store.insert_team(healthy.clone());
        let healthy_project = trial_project(healthy.id, "edge");
        platform.store.insert_project(healthy_project.clone());

        let housekeeper = TrialHousekeeper::new(platform.into_service());
        housekeeper.run_at(now()).await.unwrap();

        let store = housekeeper.billing().store();
        // The healthy team was fully processed
        assert_eq!(
            store.project(healthy_project.id).billing_state,
            BillingState::NotBilled
        );
        assert!(store.team(healthy.id).trial_ends_at.is_none());
        // The failed team keeps its marker (and untouched projects) for the
        // next sweep
        assert_eq!(
            store.project(poisoned_project.id).billing_state,
            BillingState::Trial
        );
        assert!(store.team(poisoned.id).trial_ends_at.is_some());
    }

    #[test]
    fn new_project_billing_state_truth_table() {
        let settings = trial_settings();
        let plan = plan("default", 0);
        let mut trial_team = team(plan.id, "trial-team");
        trial_team.trial_ends_at = Some(now() + Duration::days(2));

        // Trial mode + permitted type + no subscription + open window
        assert_eq!(
            billing_state_for_new_project(&settings, &trial_team, "edge", false, now()),
            BillingState::Trial
        );
        // Wrong project type falls out of trial
        assert_eq!(
            billing_state_for_new_project(&settings, &trial_team, "cloud", false, now()),
            BillingState::NotBilled
        );
        // Subscription wins over trial placement
        assert_eq!(
            billing_state_for_new_project(&settings, &trial_team, "edge", true, now()),
            BillingState::Billed
        );
        // Window already closed
        let mut expired = trial_team.clone();
        expired.trial_ends_at = Some(now() - Duration::days(1));
        assert_eq!(
            billing_state_for_new_project(&settings, &expired, "edge", false, now()),
            BillingState::NotBilled
        );
        // Trial mode off
        let disabled = TrialSettings {
            enabled: false,
            ..settings
        };
        assert_eq!(
            billing_state_for_new_project(&disabled, &trial_team, "edge", false, now()),
            BillingState::NotBilled
        );
    }
}
