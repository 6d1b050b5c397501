//! Convergence properties: idempotent creates and deletes, last-writer-wins
//! regardless of arrival order, and ordering invariants of the sync cursor
//! and outbox.
//!
//! Remote operations are injected through a raw hub node so delivery order
//! and timestamps are fully controlled.

mod common;

use common::{spawn_node, wait_until};

use orgmesh_core::overlay::{org_topic, Envelope, MemoryHub, Payload, Transport};
use orgmesh_core::storage::Storage;
use orgmesh_core::types::{
    now_ms, KnowledgeContent, KnowledgeId, KnowledgeItem, KnowledgeUpdates, MemberId, OrgId,
    OrgKnowledgeRecord, PermissionMap,
};

use proptest::prelude::*;

fn remote_create(org: &OrgId, author: &str, title: &str, timestamp: i64) -> (KnowledgeItem, Envelope) {
    let author = MemberId::from(author);
    let mut item = KnowledgeItem::new(
        title,
        KnowledgeContent::Inline {
            data: "body".to_string(),
        },
        author.as_str(),
    );
    item.created_at = timestamp;
    item.updated_at = timestamp;
    let record = OrgKnowledgeRecord {
        knowledge_id: item.id.clone(),
        org_id: org.clone(),
        folder_id: None,
        permissions: PermissionMap::default(),
        created_by: author.clone(),
        last_edited_by: author.clone(),
        created_at: timestamp,
        updated_at: timestamp,
    };
    let envelope = Envelope::new(
        Payload::KnowledgeCreate {
            knowledge: item.clone(),
            org_knowledge_record: record,
            author: author.clone(),
        },
        org.clone(),
        author,
    );
    (item, envelope)
}

fn remote_update(org: &OrgId, id: &KnowledgeId, title: &str, timestamp: i64) -> Envelope {
    let author = MemberId::from("did:example:mallory");
    Envelope::new(
        Payload::KnowledgeUpdate {
            knowledge_id: id.clone(),
            updates: KnowledgeUpdates {
                title: Some(title.to_string()),
                ..Default::default()
            },
            author: author.clone(),
            timestamp,
        },
        org.clone(),
        author,
    )
}

#[tokio::test]
async fn test_duplicate_create_yields_one_record() {
    let hub = MemoryHub::new();
    let node = spawn_node(&hub, "a", "did:example:alice");
    let raw = hub.transport("raw");
    let org = OrgId::new();
    node.engine.initialize(&org).await.unwrap();

    let (item, envelope) = remote_create(&org, "did:example:mallory", "dup", now_ms());
    let bytes = envelope.encode().unwrap();
    raw.publish(&org_topic(&org), bytes.clone()).await.unwrap();
    raw.publish(&org_topic(&org), bytes).await.unwrap();

    let engine = node.engine.clone();
    let org2 = org.clone();
    assert!(
        wait_until(move || {
            engine
                .list_knowledge(&org2)
                .map(|k| !k.is_empty())
                .unwrap_or(false)
        })
        .await
    );
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let knowledge = node.engine.list_knowledge(&org).unwrap();
    assert_eq!(knowledge.len(), 1);
    assert_eq!(knowledge[0].0.id, item.id);
}

#[tokio::test]
async fn test_delete_of_absent_record_is_a_noop() {
    let hub = MemoryHub::new();
    let node = spawn_node(&hub, "a", "did:example:alice");
    let raw = hub.transport("raw");
    let org = OrgId::new();
    node.engine.initialize(&org).await.unwrap();

    let envelope = Envelope::new(
        Payload::KnowledgeDelete {
            knowledge_id: KnowledgeId::new(),
            deleted_by: MemberId::from("did:example:mallory"),
            timestamp: now_ms(),
        },
        org.clone(),
        MemberId::from("did:example:mallory"),
    );
    raw.publish(&org_topic(&org), envelope.encode().unwrap())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    assert!(node.engine.list_knowledge(&org).unwrap().is_empty());
    assert!(node.engine.get_activity_log(&org, None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_lww_converges_in_either_arrival_order() {
    let hub = MemoryHub::new();
    let first = spawn_node(&hub, "a", "did:example:alice");
    let second = spawn_node(&hub, "b", "did:example:bob");
    let raw = hub.transport("raw");
    let org = OrgId::new();
    first.engine.initialize(&org).await.unwrap();
    second.engine.initialize(&org).await.unwrap();

    let base = now_ms();
    let (item, create) = remote_create(&org, "did:example:mallory", "v0", base - 1000);
    let create_bytes = create.encode().unwrap();
    let old = remote_update(&org, &item.id, "old", base + 100).encode().unwrap();
    let new = remote_update(&org, &item.id, "new", base + 200).encode().unwrap();

    raw.publish(&org_topic(&org), create_bytes).await.unwrap();
    let e1 = first.engine.clone();
    let e2 = second.engine.clone();
    let o = org.clone();
    assert!(
        wait_until(move || {
            let seeded = |e: &orgmesh_core::engine::KnowledgeEngine| {
                e.list_knowledge(&o).map(|k| k.len() == 1).unwrap_or(false)
            };
            seeded(&e1) && seeded(&e2)
        })
        .await
    );

    // Deliver new-then-old to one replica, old-then-new to the other.
    raw.send_direct(&orgmesh_core::PeerHandle::from("a"), new.clone())
        .await
        .unwrap();
    raw.send_direct(&orgmesh_core::PeerHandle::from("a"), old.clone())
        .await
        .unwrap();
    raw.send_direct(&orgmesh_core::PeerHandle::from("b"), old).await.unwrap();
    raw.send_direct(&orgmesh_core::PeerHandle::from("b"), new).await.unwrap();

    let e1 = first.engine.clone();
    let e2 = second.engine.clone();
    let o = org.clone();
    let id = item.id.clone();
    assert!(
        wait_until(move || {
            let settled = |e: &orgmesh_core::engine::KnowledgeEngine| {
                e.get_knowledge(&o, &id)
                    .map(|(item, _)| item.title == "new")
                    .unwrap_or(false)
            };
            settled(&e1) && settled(&e2)
        })
        .await
    );

    let (item_a, record_a) = first.engine.get_knowledge(&org, &item.id).unwrap();
    let (item_b, record_b) = second.engine.get_knowledge(&org, &item.id).unwrap();
    assert_eq!(item_a.title, "new");
    assert_eq!(item_b.title, "new");
    assert_eq!(record_a.updated_at, record_b.updated_at);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The sync cursor never moves backwards, whatever order candidate
    /// watermarks arrive in.
    #[test]
    fn prop_cursor_is_monotone(candidates in prop::collection::vec(0i64..1_000_000, 1..40)) {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(temp.path().join("m.redb")).unwrap();
        let org = OrgId::new();

        let mut high = 0i64;
        for candidate in candidates {
            let cursor = storage.advance_cursor(&org, candidate).unwrap();
            high = high.max(candidate);
            prop_assert_eq!(cursor.last_sync_time, high);
        }
    }

    /// The outbox preserves enqueue order for any batch size.
    #[test]
    fn prop_outbox_is_fifo(names in prop::collection::vec("[a-z]{1,8}", 1..20)) {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(temp.path().join("m.redb")).unwrap();
        let org = OrgId::new();

        for name in &names {
            let envelope = Envelope::new(
                Payload::Heartbeat {
                    member_id: MemberId::from(name.as_str()),
                    display_name: name.clone(),
                    avatar: None,
                    status: "online".to_string(),
                },
                org.clone(),
                MemberId::from(name.as_str()),
            );
            storage.enqueue_outbox(&org, &envelope).unwrap();
        }

        let drained: Vec<String> = storage
            .outbox(&org)
            .unwrap()
            .into_iter()
            .map(|(_, env)| match env.payload {
                Payload::Heartbeat { display_name, .. } => display_name,
                _ => unreachable!(),
            })
            .collect();
        prop_assert_eq!(drained, names);
    }
}
