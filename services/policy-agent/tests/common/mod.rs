//! Shared helpers for policy integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nsp_policy_agent::actors::Promoter;
use nsp_policy_agent::factory::PolicyRegistry;
use nsp_policy_agent::{InventoryCall, MockInventory, PolicyHandle, PolicyParam};

/// Promote a built-in policy without configuring it.
pub fn promote_unconfigured(promoter: &mut Promoter, name: &str) -> PolicyHandle {
    let policy = PolicyRegistry::builtin().instantiate(name).unwrap();
    PolicyHandle::promote(promoter, policy, 16)
}

/// Promote a built-in policy, attach a fresh mock node source and configure it.
pub async fn start_policy(
    promoter: &mut Promoter,
    name: &str,
    params: Vec<PolicyParam>,
) -> (PolicyHandle, MockInventory) {
    let policy = PolicyRegistry::builtin().instantiate(name).unwrap();
    let handle = PolicyHandle::promote(promoter, policy, 64);
    let inventory = MockInventory::new("test-source");

    handle.set_inventory(Arc::new(inventory.clone())).await.unwrap();
    handle.configure(params).await.unwrap();
    (handle, inventory)
}

/// Parameter vector from text values.
pub fn params(values: &[&str]) -> Vec<PolicyParam> {
    values.iter().map(|v| PolicyParam::from(*v)).collect()
}

/// Wait until the recorded calls satisfy `check`.
pub async fn wait_until(inventory: &MockInventory, check: impl Fn(&[InventoryCall]) -> bool) {
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            if check(&inventory.calls()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// Wait until the policy actor has stopped.
pub async fn wait_terminated(handle: &PolicyHandle) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !handle.is_terminated() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("policy did not stop");
}

pub fn acquire_all(call: &InventoryCall) -> bool {
    matches!(call, InventoryCall::AcquireAllNodes)
}

pub fn remove_all(call: &InventoryCall) -> bool {
    matches!(call, InventoryCall::RemoveAllNodes { .. })
}
