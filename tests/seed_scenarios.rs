//! Integration tests exercising the `Engine` facade end to end, one
//! test per scenario against a fresh in-memory store.

use serde_json::json;
use vgraph_core::acl::AclEntry;
use vgraph_core::acl::Permission;
use vgraph_core::audit::TracingAuditSink;
use vgraph_core::types::TypeCategory;
use vgraph_core::{CallerIdentity, CoreError, Engine, EngineConfig};
use vgraph_core::store::{run_migrations, StorePool};
use std::sync::Arc;

async fn test_engine() -> Engine {
    let store = StorePool::connect("sqlite::memory:", 1).await.unwrap();
    run_migrations(&store).await.unwrap();
    Engine::from_store(store, EngineConfig::default(), Arc::new(TracingAuditSink))
}

async fn make_entity_type(engine: &Engine, creator: &CallerIdentity) -> uuid::Uuid {
    engine
        .types
        .create("doc", TypeCategory::Entity, None, None, creator)
        .await
        .unwrap()
        .id
}

async fn make_link_type(engine: &Engine, creator: &CallerIdentity) -> uuid::Uuid {
    engine
        .types
        .create("edge", TypeCategory::Link, None, None, creator)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn creator_write_inheritance() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let v = CallerIdentity::user(uuid::Uuid::new_v4());
    let type_id = make_entity_type(&engine, &u).await;

    let e = engine.entities.create(type_id, json!({}), None, &u).await.unwrap();

    let acl = engine.acl.get_entity_acl(e.id, &u).await.unwrap();
    assert_eq!(acl.len(), 1);
    assert_eq!(acl[0].principal_id, u.user_id.unwrap());
    assert_eq!(acl[0].permission, Permission::Write);

    let err = engine.entities.update(e.id, json!({"x": 1}), &v).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    let err = engine.entities.get_latest(e.id, &v).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));

    engine
        .entities
        .set_acl(e.id, Some(vec![AclEntry::user(v.user_id.unwrap(), Permission::Write)]), &u)
        .await
        .unwrap();
    let after = engine.entities.get_latest(e.id, &v).await.unwrap();
    assert_eq!(after.id, e.id);
}

#[tokio::test]
async fn public_resource_is_readable_anonymously_but_not_writable() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let type_id = make_entity_type(&engine, &u).await;

    let e = engine
        .entities
        .create(type_id, json!({"n": 1}), Some(Vec::new()), &u)
        .await
        .unwrap();

    let anon = CallerIdentity::anonymous();
    let fetched = engine.entities.get_latest(e.id, &anon).await.unwrap();
    assert_eq!(fetched.id, e.id);

    let err = engine.entities.update(e.id, json!({"n": 2}), &anon).await.unwrap_err();
    assert!(matches!(err, CoreError::Unauthenticated(_)));
}

#[tokio::test]
async fn version_chain_and_diff() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let type_id = make_entity_type(&engine, &u).await;

    let r1 = engine.entities.create(type_id, json!({"a": 1}), None, &u).await.unwrap();
    let r2 = engine.entities.update(r1.id, json!({"a": 2, "b": 3}), &u).await.unwrap();
    let r3 = engine.entities.soft_delete(r2.id, &u).await.unwrap();
    let r4 = engine.entities.restore(r3.id, &u).await.unwrap();

    let versions = engine.entities.list_versions(r1.id, &u).await.unwrap();
    assert_eq!(versions.iter().map(|v| v.id).collect::<Vec<_>>(), vec![r1.id, r2.id, r3.id, r4.id]);
    assert_eq!(versions.iter().map(|v| v.version).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
    assert_eq!(versions.iter().filter(|v| v.is_latest).count(), 1);
    assert!(versions.last().unwrap().is_latest);
    assert!(!versions.last().unwrap().is_deleted);

    let history = engine.entities.history_with_diffs(r2.id, &u).await.unwrap();
    let diff = history[1].diff.as_ref().unwrap();
    assert_eq!(diff.added.get("b").unwrap(), &json!(3));
    assert!(diff.removed.is_empty());
    let changed_a = diff.changed.get("a").unwrap();
    assert_eq!(changed_a.old, json!(1));
    assert_eq!(changed_a.new, json!(2));
}

#[tokio::test]
async fn acl_interning_is_order_independent() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let v_id = uuid::Uuid::new_v4();
    let type_id = make_entity_type(&engine, &u).await;

    let e1 = engine.entities.create(type_id, json!({}), None, &u).await.unwrap();
    let e2 = engine.entities.create(type_id, json!({}), None, &u).await.unwrap();

    let a = engine
        .entities
        .set_acl(
            e1.id,
            Some(vec![
                AclEntry::user(u.user_id.unwrap(), Permission::Read),
                AclEntry::user(v_id, Permission::Write),
            ]),
            &u,
        )
        .await
        .unwrap();
    let b = engine
        .entities
        .set_acl(
            e2.id,
            Some(vec![
                AclEntry::user(v_id, Permission::Write),
                AclEntry::user(u.user_id.unwrap(), Permission::Read),
            ]),
            &u,
        )
        .await
        .unwrap();

    assert_eq!(a.acl_id, b.acl_id);
}

#[tokio::test]
async fn shortest_path_reroutes_after_soft_delete() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let entity_type = make_entity_type(&engine, &u).await;
    let link_type = make_link_type(&engine, &u).await;

    let a = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();
    let b = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();
    let c = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();
    let d = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();

    engine.links.create(link_type, a.id, b.id, json!({}), None, &u).await.unwrap();
    engine.links.create(link_type, b.id, c.id, json!({}), None, &u).await.unwrap();
    engine.links.create(link_type, c.id, d.id, json!({}), None, &u).await.unwrap();
    let shortcut = engine.links.create(link_type, a.id, d.id, json!({}), None, &u).await.unwrap();

    let path = engine.graph.shortest_path(a.id, d.id, None, false, 10, &u).await.unwrap();
    assert_eq!(path.hops.len(), 2);

    engine.links.soft_delete(shortcut.id, &u).await.unwrap();

    let path = engine.graph.shortest_path(a.id, d.id, None, false, 10, &u).await.unwrap();
    assert_eq!(path.hops.len(), 4);
}

#[tokio::test]
async fn shortest_path_zero_depth_boundary() {
    let engine = test_engine().await;
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let entity_type = make_entity_type(&engine, &u).await;
    let link_type = make_link_type(&engine, &u).await;

    let a = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();
    let b = engine.entities.create(entity_type, json!({}), None, &u).await.unwrap();
    engine.links.create(link_type, a.id, b.id, json!({}), None, &u).await.unwrap();

    // from == to: zero-length path even at max_depth = 0.
    let same = engine.graph.shortest_path(a.id, a.id, None, false, 0, &u).await.unwrap();
    assert_eq!(same.hops.len(), 1);

    // from != to: max_depth = 0 forbids any edge, even though a direct
    // link exists, so this must be NoPathFound rather than a 1-hop path.
    let err = engine.graph.shortest_path(a.id, b.id, None, false, 0, &u).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn group_transitivity_and_cache_invalidation() {
    let engine = test_engine().await;
    let owner = CallerIdentity::user(uuid::Uuid::new_v4());
    let u = CallerIdentity::user(uuid::Uuid::new_v4());
    let type_id = make_entity_type(&engine, &owner).await;

    let g1 = engine.groups.create("g1", None, &owner).await.unwrap();
    let g2 = engine.groups.create("g2", None, &owner).await.unwrap();
    engine
        .groups
        .add_member(g1.id, vgraph_core::groups::MemberType::Group, g2.id)
        .await
        .unwrap();
    engine
        .groups
        .add_member(g2.id, vgraph_core::groups::MemberType::User, u.user_id.unwrap())
        .await
        .unwrap();

    let e = engine
        .entities
        .create(type_id, json!({}), Some(vec![AclEntry::group(g1.id, Permission::Read)]), &owner)
        .await
        .unwrap();

    let fetched = engine.entities.get_latest(e.id, &u).await.unwrap();
    assert_eq!(fetched.id, e.id);

    engine
        .groups
        .remove_member(g1.id, vgraph_core::groups::MemberType::Group, g2.id)
        .await
        .unwrap();

    let err = engine.entities.get_latest(e.id, &u).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn search_filters_by_property_and_acl() {
    let engine = test_engine().await;
    let owner = CallerIdentity::user(uuid::Uuid::new_v4());
    let other = CallerIdentity::user(uuid::Uuid::new_v4());
    let type_id = make_entity_type(&engine, &owner).await;

    engine.entities.create(type_id, json!({"tag": "a"}), None, &owner).await.unwrap();
    let public_match = engine
        .entities
        .create(type_id, json!({"tag": "a"}), Some(Vec::new()), &owner)
        .await
        .unwrap();
    engine.entities.create(type_id, json!({"tag": "b"}), Some(Vec::new()), &owner).await.unwrap();

    let filter = vgraph_core::filter::FilterExpr::Leaf(vgraph_core::filter::PropFilter::new(
        "tag",
        "eq",
        Some(json!("a")),
    ));

    let results = engine.entities.search(Some(&filter), false, &other).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, public_match.id);
}
