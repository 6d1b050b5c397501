//! Two-node scenarios over the in-memory hub: create propagation, the
//! permission gate, out-of-order updates, anti-entropy catch-up, and the
//! offline outbox drain.

mod common;

use common::{spawn_node, wait_until};

use orgmesh_core::engine::ShareOptions;
use orgmesh_core::error::MeshError;
use orgmesh_core::overlay::{org_topic, Envelope, MemoryHub, Payload, Transport};
use orgmesh_core::types::{
    KnowledgeContent, KnowledgeUpdates, MemberId, OrgId, PermissionMap, Role,
};

fn inline(data: &str) -> KnowledgeContent {
    KnowledgeContent::Inline {
        data: data.to_string(),
    }
}

#[tokio::test]
async fn test_share_propagates_to_peer() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "a", "did:example:alice");
    let bob = spawn_node(&hub, "b", "did:example:bob");
    let org = OrgId::new();

    alice.engine.initialize(&org).await.unwrap();
    bob.engine.initialize(&org).await.unwrap();

    let item = alice
        .engine
        .create_knowledge("runbook", inline("steps"))
        .unwrap();
    alice
        .engine
        .share_knowledge(&org, &item.id, ShareOptions::default())
        .await
        .unwrap();

    let engine = bob.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            engine.list_knowledge(&o).map(|k| k.len() == 1).unwrap_or(false)
        })
        .await
    );

    let (got, record) = bob.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(got.title, "runbook");
    assert_eq!(record.created_by, alice.member);

    // The remote apply logged the create.
    let log = bob.engine.get_activity_log(&org, Some(&item.id), 10).unwrap();
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn test_permission_gate_blocks_member_edit() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "a", "did:example:alice");
    let bob = spawn_node(&hub, "b", "did:example:bob");
    let org = OrgId::new();

    alice.roles.set_role(&org, "did:example:alice", Role::Owner);
    bob.roles.set_role(&org, "did:example:bob", Role::Member);

    alice.engine.initialize(&org).await.unwrap();
    bob.engine.initialize(&org).await.unwrap();

    // Edits restricted to owner and admin.
    let restricted = PermissionMap {
        view: vec![Role::Owner, Role::Admin, Role::Member, Role::Viewer],
        edit: vec![Role::Owner, Role::Admin],
        delete: vec![Role::Owner, Role::Admin],
    };
    let item = alice.engine.create_knowledge("k1", inline("v0")).unwrap();
    alice
        .engine
        .share_knowledge(
            &org,
            &item.id,
            ShareOptions {
                folder_id: None,
                permissions: Some(restricted),
            },
        )
        .await
        .unwrap();

    let engine = bob.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            engine.list_knowledge(&o).map(|k| k.len() == 1).unwrap_or(false)
        })
        .await
    );

    let err = bob
        .engine
        .update_knowledge(
            &org,
            &item.id,
            KnowledgeUpdates {
                title: Some("x".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::PermissionDenied));

    // No local write, nothing broadcast, nothing queued.
    let (unchanged, _) = bob.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(unchanged.title, "k1");
    assert_eq!(bob.engine.storage().outbox_len(&org).unwrap(), 0);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (alice_copy, _) = alice.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(alice_copy.title, "k1");
}

#[tokio::test]
async fn test_stale_update_loses_to_newer_local_state() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "a", "did:example:alice");
    let bob = spawn_node(&hub, "b", "did:example:bob");
    let raw = hub.transport("raw");
    let org = OrgId::new();

    alice.engine.initialize(&org).await.unwrap();
    bob.engine.initialize(&org).await.unwrap();

    let item = alice.engine.create_knowledge("k1", inline("v0")).unwrap();
    alice
        .engine
        .share_knowledge(&org, &item.id, ShareOptions::default())
        .await
        .unwrap();

    let engine = bob.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            engine.list_knowledge(&o).map(|k| k.len() == 1).unwrap_or(false)
        })
        .await
    );

    // Alice publishes the authoritative update.
    alice
        .engine
        .update_knowledge(
            &org,
            &item.id,
            KnowledgeUpdates {
                title: Some("v1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let engine = bob.engine.clone();
    let o = org.clone();
    let id = item.id.clone();
    assert!(
        wait_until(move || {
            engine
                .get_knowledge(&o, &id)
                .map(|(item, _)| item.title == "v1")
                .unwrap_or(false)
        })
        .await
    );

    // A straggler with an older timestamp arrives afterwards; it must lose.
    let (_, record) = bob.engine.get_knowledge(&org, &item.id).unwrap();
    let stale = Envelope::new(
        Payload::KnowledgeUpdate {
            knowledge_id: item.id.clone(),
            updates: KnowledgeUpdates {
                title: Some("v2-stale".to_string()),
                ..Default::default()
            },
            author: MemberId::from("did:example:mallory"),
            timestamp: record.updated_at - 50,
        },
        org.clone(),
        MemberId::from("did:example:mallory"),
    );
    raw.publish(&org_topic(&org), stale.encode().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let (final_item, _) = bob.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(final_item.title, "v1");
}

#[tokio::test]
async fn test_fresh_joiner_catches_up_via_sync() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "a", "did:example:alice");
    let org = OrgId::new();
    alice.engine.initialize(&org).await.unwrap();

    for i in 0..3 {
        let item = alice
            .engine
            .create_knowledge(format!("note-{i}"), inline("body"))
            .unwrap();
        alice
            .engine
            .share_knowledge(&org, &item.id, ShareOptions::default())
            .await
            .unwrap();
    }

    // Carol joins after the fact; her initialize broadcasts a sync request
    // and alice answers directly.
    let carol = spawn_node(&hub, "c", "did:example:carol");
    carol.engine.initialize(&org).await.unwrap();

    let engine = carol.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            engine.list_knowledge(&o).map(|k| k.len() == 3).unwrap_or(false)
        })
        .await
    );

    let mut ours: Vec<_> = alice
        .engine
        .list_knowledge(&org)
        .unwrap()
        .into_iter()
        .map(|(item, _)| item.title)
        .collect();
    let mut theirs: Vec<_> = carol
        .engine
        .list_knowledge(&org)
        .unwrap()
        .into_iter()
        .map(|(item, _)| item.title)
        .collect();
    ours.sort();
    theirs.sort();
    assert_eq!(ours, theirs);

    // The cursor moved forward so the next request is incremental.
    assert!(carol.engine.storage().load_cursor(&org).unwrap().last_sync_time > 0);
}

#[tokio::test]
async fn test_offline_mutations_queue_and_drain() {
    let hub = MemoryHub::new();
    let alice = spawn_node(&hub, "a", "did:example:alice");
    let bob = spawn_node(&hub, "b", "did:example:bob");
    let org = OrgId::new();

    alice.engine.initialize(&org).await.unwrap();
    bob.engine.initialize(&org).await.unwrap();

    let item = alice.engine.create_knowledge("k1", inline("v0")).unwrap();
    alice
        .engine
        .share_knowledge(&org, &item.id, ShareOptions::default())
        .await
        .unwrap();

    let engine = bob.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            engine.list_knowledge(&o).map(|k| k.len() == 1).unwrap_or(false)
        })
        .await
    );

    // Alice goes offline; her edits still land locally and queue durably.
    alice.transport.set_connected(false);
    alice
        .engine
        .update_knowledge(
            &org,
            &item.id,
            KnowledgeUpdates {
                title: Some("offline-edit".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let (local, _) = alice.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(local.title, "offline-edit");
    assert_eq!(alice.engine.storage().outbox_len(&org).unwrap(), 1);

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (bob_copy, _) = bob.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(bob_copy.title, "k1");

    // Reconnect; the drain task replays the queued envelope in order.
    alice.transport.set_connected(true);

    let engine = bob.engine.clone();
    let o = org.clone();
    let id = item.id.clone();
    assert!(
        wait_until(move || {
            engine
                .get_knowledge(&o, &id)
                .map(|(item, _)| item.title == "offline-edit")
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(alice.engine.storage().outbox_len(&org).unwrap(), 0);
}
