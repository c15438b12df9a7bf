//! Persistence boundary for the billing engine.
//!
//! The engine reads and writes only the narrow slice of platform state
//! defined here; the full schema belongs to the surrounding CRUD flows. The
//! production implementation lives in [`crate::pg_store`]; an in-memory
//! implementation for tests lives in the [`test`] module.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use fleethub_shared::{
    BillingState, Project, ProjectState, Subscription, Team, TeamPlan, TrialSettings,
};

use crate::error::BillingResult;

/// Narrow persistence contract for the billing engine
#[async_trait]
pub trait PlatformStore: Send + Sync {
    /// Plan backing a team
    async fn plan(&self, plan_id: Uuid) -> BillingResult<Option<TeamPlan>>;

    /// Count of team memberships, recomputed from persisted state
    async fn member_count(&self, team_id: Uuid) -> BillingResult<i64>;

    /// Raw device count for a team, regardless of device state
    async fn device_count(&self, team_id: Uuid) -> BillingResult<i64>;

    async fn subscription_for_team(&self, team_id: Uuid) -> BillingResult<Option<Subscription>>;

    /// Record the team's subscription link (1:1)
    async fn create_subscription(
        &self,
        team_id: Uuid,
        customer_id: &str,
        subscription_id: &str,
    ) -> BillingResult<Subscription>;

    /// Whether the user has ever held a subscription as a team owner;
    /// first-time customers qualify for the free-trial credit
    async fn user_has_held_subscription(&self, user_id: Uuid) -> BillingResult<bool>;

    /// Global trial configuration, re-read on every call so toggling trial
    /// mode takes effect without a restart
    async fn trial_settings(&self) -> BillingResult<TrialSettings>;

    /// Teams whose trial window has closed and not yet been processed
    async fn teams_with_expired_trial(&self, now: OffsetDateTime) -> BillingResult<Vec<Team>>;

    async fn projects_in_billing_state(
        &self,
        team_id: Uuid,
        state: BillingState,
    ) -> BillingResult<Vec<Project>>;

    async fn set_project_billing_state(
        &self,
        project_id: Uuid,
        state: BillingState,
    ) -> BillingResult<()>;

    async fn set_project_state(&self, project_id: Uuid, state: ProjectState) -> BillingResult<()>;

    /// Clear the trial marker; called only after a team has been fully
    /// processed so that failed teams are retried on the next sweep
    async fn clear_trial(&self, team_id: Uuid) -> BillingResult<()>;
}

/// In-memory platform store for tests.
#[cfg(any(test, feature = "test-billing"))]
#[allow(clippy::unwrap_used)]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use fleethub_shared::TeamRole;
    use std::collections::HashMap;
    use std::sync::RwLock;

    #[derive(Default)]
    struct State {
        plans: HashMap<Uuid, TeamPlan>,
        teams: HashMap<Uuid, Team>,
        members: Vec<(Uuid, Uuid, TeamRole)>,
        device_counts: HashMap<Uuid, i64>,
        projects: HashMap<Uuid, Project>,
        subscriptions: HashMap<Uuid, Subscription>,
        settings: TrialSettings,
        /// Teams whose subscription lookup should fail, for error-isolation
        /// tests
        poisoned_teams: Vec<Uuid>,
    }

    /// In-memory [`PlatformStore`] with helpers to seed and inspect state
    #[derive(Default)]
    pub struct InMemoryPlatformStore {
        state: RwLock<State>,
    }

    impl InMemoryPlatformStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert_plan(&self, plan: TeamPlan) {
            self.state.write().unwrap().plans.insert(plan.id, plan);
        }

        pub fn insert_team(&self, team: Team) {
            self.state.write().unwrap().teams.insert(team.id, team);
        }

        pub fn team(&self, team_id: Uuid) -> Team {
            self.state.read().unwrap().teams.get(&team_id).unwrap().clone()
        }

        pub fn add_member(&self, team_id: Uuid, user_id: Uuid, role: TeamRole) {
            self.state
                .write()
                .unwrap()
                .members
                .push((team_id, user_id, role));
        }

        pub fn set_device_count(&self, team_id: Uuid, count: i64) {
            self.state
                .write()
                .unwrap()
                .device_counts
                .insert(team_id, count);
        }

        pub fn insert_project(&self, project: Project) {
            self.state
                .write()
                .unwrap()
                .projects
                .insert(project.id, project);
        }

        pub fn project(&self, project_id: Uuid) -> Project {
            self.state
                .read()
                .unwrap()
                .projects
                .get(&project_id)
                .unwrap()
                .clone()
        }

        pub fn set_trial_settings(&self, settings: TrialSettings) {
            self.state.write().unwrap().settings = settings;
        }

        /// Seed a subscription link without going through the async trait
        pub fn put_subscription(&self, team_id: Uuid, customer_id: &str, subscription_id: &str) {
            let subscription = Subscription {
                id: Uuid::new_v4(),
                team_id,
                stripe_customer_id: customer_id.to_string(),
                stripe_subscription_id: subscription_id.to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            self.state
                .write()
                .unwrap()
                .subscriptions
                .insert(team_id, subscription);
        }

        /// Make `subscription_for_team` fail for this team
        pub fn poison_team(&self, team_id: Uuid) {
            self.state.write().unwrap().poisoned_teams.push(team_id);
        }
    }

    #[async_trait]
    impl PlatformStore for InMemoryPlatformStore {
        async fn plan(&self, plan_id: Uuid) -> BillingResult<Option<TeamPlan>> {
            Ok(self.state.read().unwrap().plans.get(&plan_id).cloned())
        }

        async fn member_count(&self, team_id: Uuid) -> BillingResult<i64> {
            Ok(self
                .state
                .read()
                .unwrap()
                .members
                .iter()
                .filter(|(team, _, _)| *team == team_id)
                .count() as i64)
        }

        async fn device_count(&self, team_id: Uuid) -> BillingResult<i64> {
            Ok(self
                .state
                .read()
                .unwrap()
                .device_counts
                .get(&team_id)
                .copied()
                .unwrap_or(0))
        }

        async fn subscription_for_team(
            &self,
            team_id: Uuid,
        ) -> BillingResult<Option<Subscription>> {
            let state = self.state.read().unwrap();
            if state.poisoned_teams.contains(&team_id) {
                return Err(BillingError::Database("connection reset".to_string()));
            }
            Ok(state.subscriptions.get(&team_id).cloned())
        }

        async fn create_subscription(
            &self,
            team_id: Uuid,
            customer_id: &str,
            subscription_id: &str,
        ) -> BillingResult<Subscription> {
            let subscription = Subscription {
                id: Uuid::new_v4(),
                team_id,
                stripe_customer_id: customer_id.to_string(),
                stripe_subscription_id: subscription_id.to_string(),
                created_at: OffsetDateTime::UNIX_EPOCH,
            };
            self.state
                .write()
                .unwrap()
                .subscriptions
                .insert(team_id, subscription.clone());
            Ok(subscription)
        }

        async fn user_has_held_subscription(&self, user_id: Uuid) -> BillingResult<bool> {
            let state = self.state.read().unwrap();
            Ok(state.members.iter().any(|(team, user, role)| {
                *user == user_id
                    && *role == TeamRole::Owner
                    && state.subscriptions.contains_key(team)
            }))
        }

        async fn trial_settings(&self) -> BillingResult<TrialSettings> {
            Ok(self.state.read().unwrap().settings.clone())
        }

        async fn teams_with_expired_trial(
            &self,
            now: OffsetDateTime,
        ) -> BillingResult<Vec<Team>> {
            Ok(self
                .state
                .read()
                .unwrap()
                .teams
                .values()
                .filter(|team| team.trial_ends_at.map(|ends| ends < now).unwrap_or(false))
                .cloned()
                .collect())
        }

        async fn projects_in_billing_state(
            &self,
            team_id: Uuid,
            billing_state: BillingState,
        ) -> BillingResult<Vec<Project>> {
            Ok(self
                .state
                .read()
                .unwrap()
                .projects
                .values()
                .filter(|p| p.team_id == team_id && p.billing_state == billing_state)
                .cloned()
                .collect())
        }

        async fn set_project_billing_state(
            &self,
            project_id: Uuid,
            billing_state: BillingState,
        ) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| BillingError::NotFound(format!("Project {}", project_id)))?;
            project.billing_state = billing_state;
            Ok(())
        }

        async fn set_project_state(
            &self,
            project_id: Uuid,
            project_state: ProjectState,
        ) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            let project = state
                .projects
                .get_mut(&project_id)
                .ok_or_else(|| BillingError::NotFound(format!("Project {}", project_id)))?;
            project.state = project_state;
            Ok(())
        }

        async fn clear_trial(&self, team_id: Uuid) -> BillingResult<()> {
            let mut state = self.state.write().unwrap();
            let team = state
                .teams
                .get_mut(&team_id)
                .ok_or_else(|| BillingError::NotFound(format!("Team {}", team_id)))?;
            team.trial_ends_at = None;
            Ok(())
        }
    }
}
