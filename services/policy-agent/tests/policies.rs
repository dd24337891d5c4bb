//! End-to-end tests for the built-in policies running as actors.

mod common;

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use nsp_access::Caller;
use nsp_events::{CoreEvent, RmEvent, RmEventType};
use nsp_policy_agent::actors::Promoter;
use nsp_policy_agent::inventory::DeployingNode;
use nsp_policy_agent::policies::time_slot::TIME_FORMAT;
use nsp_policy_agent::{InventoryCall, LifecycleState, PolicyError, PolicyParam};

use common::{
    acquire_all, params, promote_unconfigured, remove_all, start_policy, wait_terminated, wait_until,
};

// =============================================================================
// StaticPolicy
// =============================================================================

#[tokio::test]
async fn test_static_policy_acquires_everything_once() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "StaticPolicy", params(&["ALL", "ME"])).await;

    policy.activate().await.unwrap();
    assert_eq!(inventory.calls(), vec![InventoryCall::AcquireAllNodes]);

    let status = policy.status().await.unwrap();
    assert_eq!(status.state, LifecycleState::Active);
    assert_eq!(status.user_access.as_deref(), Some("ALL"));
    assert_eq!(status.provider_access.as_deref(), Some("ME"));
    assert!(status.triggers.is_empty());

    policy.shutdown(Caller::new("admin")).await.unwrap();
    wait_terminated(&policy).await;

    assert_eq!(
        &inventory.calls()[1..],
        &[
            InventoryCall::FinishShutdown {
                initiator: "admin".to_string()
            },
            InventoryCall::Disconnect {
                identity: policy.actor_id().to_string()
            },
        ]
    );

    // A second shutdown is a no-op; other calls see the stopped actor.
    policy.shutdown(Caller::new("admin")).await.unwrap();
    assert!(matches!(policy.status().await, Err(PolicyError::Actor(_))));
}

#[tokio::test]
async fn test_lifecycle_violations_are_rejected() {
    let mut promoter = Promoter::new();
    let policy = promote_unconfigured(&mut promoter, "StaticPolicy");

    let err = policy.activate().await.unwrap_err();
    assert!(matches!(
        err,
        PolicyError::InvalidState {
            state: LifecycleState::Unconfigured,
            ..
        }
    ));

    policy.configure(params(&["ME", "ME"])).await.unwrap();
    assert!(matches!(
        policy.reconfigure(params(&["ALL", "ME"])).await.unwrap_err(),
        PolicyError::InvalidState { .. }
    ));

    // Configured but never attached to a node source.
    assert!(policy.activate().await.unwrap_err().is_configuration());
    assert_eq!(policy.status().await.unwrap().state, LifecycleState::Configured);
}

#[tokio::test]
async fn test_bad_access_spec_leaves_policy_unconfigured() {
    let mut promoter = Promoter::new();
    let policy = promote_unconfigured(&mut promoter, "StaticPolicy");

    let err = policy.configure(params(&["ALL", "users=a;users=b"])).await.unwrap_err();
    assert!(matches!(err, PolicyError::Access { field: "provider", .. }));

    let status = policy.status().await.unwrap();
    assert_eq!(status.state, LifecycleState::Unconfigured);
    assert!(status.user_access.is_none());
}

// =============================================================================
// TimeSlotPolicy
// =============================================================================

fn slot_time(offset: TimeDelta) -> String {
    (Utc::now() + offset).format(TIME_FORMAT).to_string()
}

#[tokio::test(start_paused = true)]
async fn test_time_slot_fires_each_trigger_once() {
    let mut promoter = Promoter::new();
    let acquire = slot_time(TimeDelta::minutes(5));
    let release = slot_time(TimeDelta::minutes(65));
    let (policy, inventory) = start_policy(
        &mut promoter,
        "TimeSlotPolicy",
        vec![
            "ALL".into(),
            "ME".into(),
            acquire.into(),
            release.into(),
            "".into(),
            true.into(),
        ],
    )
    .await;

    policy.activate().await.unwrap();
    assert_eq!(policy.status().await.unwrap().triggers.len(), 2);
    assert!(inventory.calls().is_empty());

    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert_eq!(inventory.count(acquire_all), 1);
    assert_eq!(inventory.count(remove_all), 0);

    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(
        inventory.calls(),
        vec![
            InventoryCall::AcquireAllNodes,
            InventoryCall::RemoveAllNodes {
                node_source: "test-source".to_string(),
                preemptive: true
            },
        ]
    );

    tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
    assert_eq!(inventory.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_time_slot_repeats_every_period() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(
        &mut promoter,
        "TimeSlotPolicy",
        vec![
            "ALL".into(),
            "ME".into(),
            slot_time(TimeDelta::minutes(-30)).into(),
            slot_time(TimeDelta::minutes(-10)).into(),
            PolicyParam::Int(60 * 60 * 1000),
            false.into(),
        ],
    )
    .await;

    policy.activate().await.unwrap();
    let triggers = policy.status().await.unwrap().triggers;
    assert!(triggers.iter().all(|t| t.repeat_ms == Some(3_600_000)));
    assert!(triggers.iter().all(|t| t.next_fire.is_some_and(|at| at > Utc::now())));

    tokio::time::sleep(Duration::from_secs(3 * 60 * 60 + 60)).await;
    assert_eq!(inventory.count(acquire_all), 3);
    assert_eq!(inventory.count(remove_all), 3);
}

#[tokio::test]
async fn test_time_slot_rejects_unparsable_time() {
    let mut promoter = Promoter::new();
    let policy = promote_unconfigured(&mut promoter, "TimeSlotPolicy");

    let err = policy
        .configure(params(&["ALL", "ME", "tomorrow", "2030-01-01 00:00:00 +0000", "", "false"]))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("acquire time"));
}

#[tokio::test]
async fn test_time_slot_rejects_period_beyond_calendar() {
    let mut promoter = Promoter::new();
    let policy = promote_unconfigured(&mut promoter, "TimeSlotPolicy");

    for period in ["10000000000000000", "18446744073709551615"] {
        let err = policy
            .configure(vec![
                "ALL".into(),
                "ME".into(),
                slot_time(TimeDelta::hours(-2)).into(),
                slot_time(TimeDelta::hours(-1)).into(),
                period.into(),
                false.into(),
            ])
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("period"));
    }

    assert_eq!(policy.status().await.unwrap().state, LifecycleState::Unconfigured);
}

// =============================================================================
// CronPolicy
// =============================================================================

const EVERY_SECOND: &str = "* * * * * *";
const NEVER_SOON: &str = "0 0 0 1 1 * 2099";

#[tokio::test(start_paused = true)]
async fn test_cron_reconfigure_stops_previous_schedule() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(
        &mut promoter,
        "CronPolicy",
        params(&["ALL", "ME", EVERY_SECOND, NEVER_SOON, "false", "false"]),
    )
    .await;

    policy.activate().await.unwrap();
    wait_until(&inventory, |calls| calls.iter().filter(|c| acquire_all(c)).count() >= 2).await;

    // Invalid parameters leave the running schedule untouched.
    let err = policy
        .reconfigure(params(&["ALL", "ME", "bogus", NEVER_SOON, "false", "false"]))
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    let before = inventory.count(acquire_all);
    wait_until(&inventory, |calls| calls.iter().filter(|c| acquire_all(c)).count() > before).await;

    policy
        .reconfigure(params(&["ALL", "ME", NEVER_SOON, NEVER_SOON, "true", "false"]))
        .await
        .unwrap();
    let after = inventory.count(acquire_all);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(inventory.count(acquire_all), after);

    let status = policy.status().await.unwrap();
    assert_eq!(status.state, LifecycleState::Active);
    assert!(status.triggers.iter().all(|t| t.cron.as_deref() == Some(NEVER_SOON)));
}

#[tokio::test(start_paused = true)]
async fn test_cron_force_deployment_and_release() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(
        &mut promoter,
        "CronPolicy",
        params(&["ALL", "ME", NEVER_SOON, EVERY_SECOND, "true", "true"]),
    )
    .await;

    policy.activate().await.unwrap();
    assert_eq!(inventory.calls(), vec![InventoryCall::AcquireAllNodes]);

    wait_until(&inventory, |calls| calls.iter().any(remove_all)).await;
    assert!(inventory.calls().contains(&InventoryCall::RemoveAllNodes {
        node_source: "test-source".to_string(),
        preemptive: true
    }));

    policy.shutdown(Caller::new("admin")).await.unwrap();
    let removals = inventory.count(remove_all);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(inventory.count(remove_all), removals);
}

// =============================================================================
// RestartDownNodesPolicy
// =============================================================================

fn lost(url: &str, lost: bool) -> DeployingNode {
    DeployingNode {
        url: url.to_string(),
        lost,
    }
}

fn restart_params() -> Vec<PolicyParam> {
    vec!["ALL".into(), "ME".into(), PolicyParam::Int(1000)]
}

#[tokio::test(start_paused = true)]
async fn test_restart_down_nodes_replaces_removed_nodes() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "RestartDownNodesPolicy", restart_params()).await;
    inventory.set_down_nodes(["pnp://d1", "pnp://d2"]);
    inventory.set_deploying_nodes(vec![lost("pnp://l1", true), lost("pnp://deploying", false)]);

    policy.activate().await.unwrap();
    assert_eq!(inventory.listener_count(), 1);
    assert_eq!(inventory.count(acquire_all), 1);

    wait_until(&inventory, |calls| {
        calls.iter().any(|c| matches!(c, InventoryCall::AcquireNodes { .. }))
    })
    .await;

    let removed: Vec<InventoryCall> = inventory
        .calls()
        .into_iter()
        .filter(|c| matches!(c, InventoryCall::RemoveNode { .. }))
        .collect();
    assert_eq!(
        removed,
        ["pnp://d1", "pnp://d2", "pnp://l1"]
            .iter()
            .map(|url| InventoryCall::RemoveNode {
                url: url.to_string(),
                preemptive: true
            })
            .collect::<Vec<_>>()
    );
    assert_eq!(
        inventory.count(|c| matches!(c, InventoryCall::AcquireNodes { count: 3, config } if config.is_empty())),
        1
    );

    // Everything healthy now: later checks do nothing.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::RemoveNode { .. })), 3);
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::AcquireNodes { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_down_nodes_only_replaces_confirmed_removals() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "RestartDownNodesPolicy", restart_params()).await;
    inventory.set_down_nodes(["pnp://a", "pnp://b"]);
    inventory.refuse_removal("pnp://b");

    policy.activate().await.unwrap();
    wait_until(&inventory, |calls| {
        calls.iter().any(|c| matches!(c, InventoryCall::AcquireNodes { .. }))
    })
    .await;
    assert!(inventory
        .calls()
        .contains(&InventoryCall::AcquireNodes { count: 1, config: Default::default() }));

    // The refused node is retried, but nothing more is acquired for it.
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(inventory.count(|c| matches!(c, InventoryCall::RemoveNode { url, .. } if url == "pnp://b")) >= 2);
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::AcquireNodes { .. })), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_down_nodes_stands_down_when_rm_shuts_down() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "RestartDownNodesPolicy", restart_params()).await;
    policy.activate().await.unwrap();

    inventory.emit(RmEvent::Core(CoreEvent::new(RmEventType::ShuttingDown).unwrap()));
    // Round trip through the mailbox so the event is handled.
    policy.status().await.unwrap();

    inventory.set_down_nodes(["pnp://d1"]);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::RemoveNode { .. })), 0);

    policy.shutdown(Caller::new("rm")).await.unwrap();
    wait_terminated(&policy).await;

    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::Unsubscribe { .. })), 0);
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::FinishShutdown { .. })), 1);
    assert_eq!(inventory.count(|c| matches!(c, InventoryCall::Disconnect { .. })), 1);
}

#[tokio::test]
async fn test_unsubscribe_failure_does_not_abort_shutdown() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "RestartDownNodesPolicy", restart_params()).await;
    policy.activate().await.unwrap();
    inventory.fail_unsubscribe(true);

    policy.shutdown(Caller::new("admin")).await.unwrap();
    wait_terminated(&policy).await;

    let calls = inventory.calls();
    let tail: Vec<&InventoryCall> = calls.iter().rev().take(3).rev().collect();
    assert!(matches!(tail[0], InventoryCall::Unsubscribe { listener_id } if listener_id.ends_with("-events")));
    assert!(matches!(tail[1], InventoryCall::FinishShutdown { .. }));
    assert!(matches!(tail[2], InventoryCall::Disconnect { .. }));
}

#[tokio::test]
async fn test_restart_down_nodes_requires_positive_period() {
    let mut promoter = Promoter::new();
    let policy = promote_unconfigured(&mut promoter, "RestartDownNodesPolicy");

    for bad in [PolicyParam::Int(0), PolicyParam::Int(-5), PolicyParam::from("soon")] {
        let err = policy
            .configure(vec!["ALL".into(), "ME".into(), bad])
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}

#[tokio::test]
async fn test_restart_down_nodes_rejects_unschedulable_period() {
    let mut promoter = Promoter::new();
    let (policy, inventory) = start_policy(&mut promoter, "RestartDownNodesPolicy", restart_params()).await;

    let err = policy
        .configure(vec!["ALL".into(), "ME".into(), PolicyParam::Int(9_000_000_000_000_000)])
        .await
        .unwrap_err();
    assert!(err.is_configuration());

    // The previous period still applies and the policy activates normally.
    policy.activate().await.unwrap();
    let status = policy.status().await.unwrap();
    assert_eq!(status.state, LifecycleState::Active);
    assert_eq!(status.triggers[0].repeat_ms, Some(1000));
    assert_eq!(inventory.listener_count(), 1);

    let err = policy
        .reconfigure(vec!["ALL".into(), "ME".into(), PolicyParam::Int(9_000_000_000_000_000)])
        .await
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(!policy.is_terminated());
    assert_eq!(policy.status().await.unwrap().triggers[0].repeat_ms, Some(1000));
}
