//! Edge-case tests for the reconciliation engine
//!
//! Exercises the convergence and idempotence guarantees end to end against
//! the in-memory store and recording gateway.

use fleethub_shared::TeamRole;
use uuid::Uuid;

use crate::test_fixtures::{TestPlatform, SUB_ID};

#[tokio::test]
async fn member_reconciliation_is_idempotent() {
    let platform = TestPlatform::with_subscription();
    platform
        .gateway
        .add_item(SUB_ID, "si_team", "prod_team_default", 27);
    platform
        .store
        .add_member(platform.team.id, Uuid::new_v4(), TeamRole::Owner);

    let team = platform.team.clone();
    let service = platform.into_service();

    // Two passes with no intervening state change: exactly one remote write
    service.update_team_member_count(&team).await.unwrap();
    service.update_team_member_count(&team).await.unwrap();

    assert_eq!(service.gateway().item_writes(), 1);
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_team_default"),
        Some(1)
    );
}

#[tokio::test]
async fn device_reconciliation_is_idempotent() {
    let platform = TestPlatform::with_subscription();
    platform.store.set_device_count(platform.team.id, 3);

    let team = platform.team.clone();
    let service = platform.into_service();

    // First pass appends the item, second pass sees it converged
    service.update_team_device_count(&team).await.unwrap();
    service.update_team_device_count(&team).await.unwrap();

    assert_eq!(service.gateway().item_writes(), 1);
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_device_default"),
        Some(3)
    );
}

#[tokio::test]
async fn free_allocation_walk_matches_billable_counts() {
    // Plan grants two free devices; remote starts at quantity 27
    let platform = TestPlatform::with_subscription();
    let mut plan = platform.plan.clone();
    plan.device_free_allocation = 2;
    platform.store.insert_plan(plan);
    platform
        .gateway
        .add_item(SUB_ID, "si_device", "prod_device_default", 27);

    let team = platform.team.clone();
    let service = platform.into_service();

    // One device: inside the allocation, remote corrected down to 0
    service.store().set_device_count(team.id, 1);
    service.update_team_device_count(&team).await.unwrap();
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_device_default"),
        Some(0)
    );
    assert_eq!(service.gateway().item_writes(), 1);

    // Two devices: still inside the allocation, no further write
    service.store().set_device_count(team.id, 2);
    service.update_team_device_count(&team).await.unwrap();
    assert_eq!(service.gateway().item_writes(), 1);

    // Three devices: one beyond the allocation
    service.store().set_device_count(team.id, 3);
    service.update_team_device_count(&team).await.unwrap();
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_device_default"),
        Some(1)
    );
    assert_eq!(service.gateway().item_writes(), 2);
}

#[tokio::test]
async fn device_shrink_and_regrow_reuses_the_zeroed_item() {
    let platform = TestPlatform::with_subscription();
    platform
        .gateway
        .add_item(SUB_ID, "si_device", "prod_device_default", 2);

    let team = platform.team.clone();
    let service = platform.into_service();

    // All devices removed: item zeroed in place
    service.update_team_device_count(&team).await.unwrap();
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_device_default"),
        Some(0)
    );

    // Devices return: the same item is updated, no second item appended
    service.store().set_device_count(team.id, 4);
    service.update_team_device_count(&team).await.unwrap();
    assert_eq!(
        service.gateway().item_quantity(SUB_ID, "prod_device_default"),
        Some(4)
    );
    assert!(service
        .gateway()
        .calls()
        .iter()
        .all(|call| !matches!(call, crate::gateway::test::GatewayCall::ItemAdded { .. })));
}
