//! Shared harness: one engine per in-memory hub node.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use orgmesh_core::engine::{EngineConfig, KnowledgeEngine};
use orgmesh_core::overlay::{
    LocalIdentity, MemoryHub, MemoryTransport, OverlayConfig, OverlayNetwork,
};
use orgmesh_core::roles::StaticRoleResolver;
use orgmesh_core::storage::Storage;
use orgmesh_core::types::MemberId;

pub struct TestNode {
    pub engine: KnowledgeEngine,
    pub overlay: Arc<OverlayNetwork>,
    pub transport: MemoryTransport,
    pub roles: Arc<StaticRoleResolver>,
    pub member: MemberId,
    _temp: TempDir,
}

pub fn fast_overlay_config() -> OverlayConfig {
    OverlayConfig {
        heartbeat_interval: Duration::from_millis(50),
        discovery_interval: Duration::from_millis(50),
        // Generous TTL so nodes are not reaped mid-test.
        presence_ttl: Duration::from_secs(30),
        event_capacity: 256,
    }
}

pub fn spawn_node(hub: &MemoryHub, name: &str, did: &str) -> TestNode {
    build_node(hub.transport(name), did)
}

pub fn spawn_node_without_pubsub(hub: &MemoryHub, name: &str, did: &str) -> TestNode {
    build_node(hub.transport_without_pubsub(name), did)
}

fn build_node(transport: MemoryTransport, did: &str) -> TestNode {
    let member = MemberId::from(did);
    let overlay = Arc::new(OverlayNetwork::with_config(
        Arc::new(transport.clone()),
        LocalIdentity::new(did, did),
        fast_overlay_config(),
    ));
    let temp = TempDir::new().unwrap();
    let storage = Storage::new(temp.path().join("mesh.redb")).unwrap();
    let roles = Arc::new(StaticRoleResolver::new(did));
    let engine = KnowledgeEngine::with_config(
        overlay.clone(),
        storage,
        roles.clone(),
        EngineConfig {
            drain_interval: Duration::from_millis(100),
            event_capacity: 256,
        },
    );
    TestNode {
        engine,
        overlay,
        transport,
        roles,
        member,
        _temp: temp,
    }
}

/// Poll until `cond` holds or two seconds pass.
pub async fn wait_until<F>(mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
