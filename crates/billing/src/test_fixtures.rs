//! Shared fixtures for engine tests

use std::collections::HashMap;

use time::OffsetDateTime;
use uuid::Uuid;

use fleethub_shared::{BillingState, Project, ProjectState, Team, TeamPlan};

use crate::client::{PlanPricingOverride, StripeConfig};
use crate::gateway::test::RecordingGateway;
use crate::reconcile::BillingService;
use crate::store::test::InMemoryPlatformStore;

pub const SUB_ID: &str = "sub_1234567890";
pub const CUS_ID: &str = "cus_1234567890";

/// Config with platform defaults plus a per-plan override for "starter"
pub fn test_config() -> StripeConfig {
    let mut plan_pricing = HashMap::new();
    plan_pricing.insert(
        "starter".to_string(),
        PlanPricingOverride {
            team_product: Some("prod_team_starter".to_string()),
            team_price: Some("price_team_starter".to_string()),
            ..Default::default()
        },
    );

    StripeConfig {
        secret_key: "sk_test_123".to_string(),
        app_base_url: "http://localhost:3000".to_string(),
        team_product: Some("prod_team_default".to_string()),
        team_price: Some("price_team_default".to_string()),
        device_product: Some("prod_device_default".to_string()),
        device_price: Some("price_device_default".to_string()),
        plan_pricing,
        new_customer_free_credit: None,
    }
}

pub fn epoch() -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH
}

pub fn plan(name: &str, device_free_allocation: i32) -> TeamPlan {
    TeamPlan {
        id: Uuid::new_v4(),
        name: name.to_string(),
        device_free_allocation,
        created_at: epoch(),
    }
}

pub fn team(plan_id: Uuid, slug: &str) -> Team {
    Team {
        id: Uuid::new_v4(),
        name: slug.to_string(),
        slug: slug.to_string(),
        plan_id,
        trial_ends_at: None,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn trial_project(team_id: Uuid, project_type: &str) -> Project {
    Project {
        id: Uuid::new_v4(),
        team_id,
        name: "trial-project".to_string(),
        project_type: project_type.to_string(),
        state: ProjectState::Running,
        billing_state: BillingState::Trial,
        created_at: epoch(),
        updated_at: epoch(),
    }
}

pub fn billed_project(team_id: Uuid) -> Project {
    Project {
        billing_state: BillingState::Billed,
        ..trial_project(team_id, "edge")
    }
}

/// A seeded in-memory platform: one plan ("default", free allocation 0) and
/// one team, with or without a Stripe subscription.
pub struct TestPlatform {
    pub store: InMemoryPlatformStore,
    pub gateway: RecordingGateway,
    pub team: Team,
    pub plan: TeamPlan,
}

impl TestPlatform {
    fn new() -> Self {
        let store = InMemoryPlatformStore::new();
        let gateway = RecordingGateway::new();

        let plan = plan("default", 0);
        let team = team(plan.id, "ateam");
        store.insert_plan(plan.clone());
        store.insert_team(team.clone());

        gateway.map_price("price_device_default", "prod_device_default");
        gateway.map_price("price_team_default", "prod_team_default");

        Self {
            store,
            gateway,
            team,
            plan,
        }
    }

    pub fn with_subscription() -> Self {
        let platform = Self::new();
        platform
            .store
            .put_subscription(platform.team.id, CUS_ID, SUB_ID);
        platform.gateway.add_subscription(SUB_ID);
        platform
    }

    pub fn without_subscription() -> Self {
        Self::new()
    }

    pub fn into_service(self) -> BillingService<InMemoryPlatformStore, RecordingGateway> {
        BillingService::new(self.store, self.gateway, test_config())
    }
}
