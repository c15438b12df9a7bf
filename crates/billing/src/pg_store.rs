//! Postgres-backed platform store

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use fleethub_shared::{
    settings_keys, BillingState, Project, ProjectState, Subscription, Team, TeamPlan,
    TrialSettings,
};

use crate::error::{BillingError, BillingResult};
use crate::store::PlatformStore;

/// [`PlatformStore`] backed by the platform's Postgres database
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PlatformStore for PostgresStore {
    async fn plan(&self, plan_id: Uuid) -> BillingResult<Option<TeamPlan>> {
        let plan = sqlx::query_as::<_, TeamPlan>(
            "SELECT id, name, device_free_allocation, created_at
             FROM team_plans
             WHERE id = $1",
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }

    async fn member_count(&self, team_id: Uuid) -> BillingResult<i64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM team_members WHERE team_id = $1")
                .bind(team_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(result.0)
    }

    async fn device_count(&self, team_id: Uuid) -> BillingResult<i64> {
        let result: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices WHERE team_id = $1")
            .bind(team_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0)
    }

    async fn subscription_for_team(&self, team_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT id, team_id, stripe_customer_id, stripe_subscription_id, created_at
             FROM subscriptions
             WHERE team_id = $1",
        )
        .bind(team_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn create_subscription(
        &self,
        team_id: Uuid,
        customer_id: &str,
        subscription_id: &str,
    ) -> BillingResult<Subscription> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "INSERT INTO subscriptions (team_id, stripe_customer_id, stripe_subscription_id)
             VALUES ($1, $2, $3)
             RETURNING id, team_id, stripe_customer_id, stripe_subscription_id, created_at",
        )
        .bind(team_id)
        .bind(customer_id)
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn user_has_held_subscription(&self, user_id: Uuid) -> BillingResult<bool> {
        let result: (bool,) = sqlx::query_as(
            "SELECT EXISTS (
                 SELECT 1
                 FROM subscriptions s
                 JOIN team_members tm ON tm.team_id = s.team_id
                 WHERE tm.user_id = $1 AND tm.role = 'owner'
             )",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.0)
    }

    async fn trial_settings(&self) -> BillingResult<TrialSettings> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM platform_settings WHERE key = ANY($1)",
        )
        .bind(vec![
            settings_keys::TRIAL_MODE.to_string(),
            settings_keys::TRIAL_DURATION.to_string(),
            settings_keys::TRIAL_PROJECT_TYPE.to_string(),
        ])
        .fetch_all(&self.pool)
        .await?;

        let mut settings = TrialSettings::default();
        for (key, value) in rows {
            match key.as_str() {
                settings_keys::TRIAL_MODE => settings.enabled = value == "true",
                settings_keys::TRIAL_DURATION => {
                    settings.duration_days = value.parse().unwrap_or(0)
                }
                settings_keys::TRIAL_PROJECT_TYPE => settings.project_type = Some(value),
                _ => {}
            }
        }
        Ok(settings)
    }

    async fn teams_with_expired_trial(&self, now: OffsetDateTime) -> BillingResult<Vec<Team>> {
        let teams = sqlx::query_as::<_, Team>(
            "SELECT id, name, slug, plan_id, trial_ends_at, created_at, updated_at
             FROM teams
             WHERE trial_ends_at IS NOT NULL AND trial_ends_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(teams)
    }

    async fn projects_in_billing_state(
        &self,
        team_id: Uuid,
        state: BillingState,
    ) -> BillingResult<Vec<Project>> {
        let projects = sqlx::query_as::<_, Project>(
            "SELECT id, team_id, name, project_type, state, billing_state, created_at, updated_at
             FROM projects
             WHERE team_id = $1 AND billing_state = $2",
        )
        .bind(team_id)
        .bind(state)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    async fn set_project_billing_state(
        &self,
        project_id: Uuid,
        state: BillingState,
    ) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE projects SET billing_state = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(state)
        .bind(project_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Project {}", project_id)));
        }
        Ok(())
    }

    async fn set_project_state(
        &self,
        project_id: Uuid,
        state: ProjectState,
    ) -> BillingResult<()> {
        let result =
            sqlx::query("UPDATE projects SET state = $1, updated_at = NOW() WHERE id = $2")
                .bind(state)
                .bind(project_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Project {}", project_id)));
        }
        Ok(())
    }

    async fn clear_trial(&self, team_id: Uuid) -> BillingResult<()> {
        let result = sqlx::query(
            "UPDATE teams SET trial_ends_at = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(team_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BillingError::NotFound(format!("Team {}", team_id)));
        }
        Ok(())
    }
}
