use std::sync::Arc;

use reptree::{RepTree, Value};
use reptree::storage::{Storage, StorageConfig};

#[tokio::test]
async fn paged_child_enumeration_falls_back_to_the_store() {
    let store = Arc::new(Storage::new(StorageConfig::Memory).await.unwrap());

    let mut a = RepTree::new("p1", None).unwrap().with_store(store.clone(), Some(4));
    let root = a.create_root().unwrap();
    for i in 0..500 {
        let child = a.new_named_vertex(&root, &format!("child-{i}")).unwrap();
        a.persist_vertex(&child).await.unwrap();
    }
    a.persist_vertex(&root).await.unwrap();
    a.persist_and_evict().await.unwrap();

    let mut b = RepTree::new("p2", None).unwrap().with_store(store, None);
    assert!(b.get_children_ids(&root).is_empty());

    // Children were persisted in creation order, so their stored `idx`
    // runs 0..500 and doubles as the page cursor here.
    let mut seen = std::collections::HashSet::new();
    let mut cursor = None;
    loop {
        let page = b.get_children_ids_async(&root, cursor, 64).await.unwrap();
        if page.is_empty() {
            break;
        }
        cursor = Some(cursor.unwrap_or(-1) + page.len() as i64);
        seen.extend(page);
        if seen.len() >= 500 {
            break;
        }
    }
    assert_eq!(seen.len(), 500);
}

#[tokio::test]
async fn evicted_ops_are_still_served_to_a_sync_peer() {
    let store = Arc::new(Storage::new(StorageConfig::Memory).await.unwrap());
    let mut a = RepTree::new("p1", None).unwrap().with_store(store, Some(2));
    let root = a.create_root().unwrap();
    let v = a.new_named_vertex(&root, "note").unwrap();
    a.set_property(&v, "body", Value::from("hello")).unwrap();
    a.persist_vertex(&root).await.unwrap();
    a.persist_vertex(&v).await.unwrap();
    a.persist_and_evict().await.unwrap();

    let mut b = RepTree::new("p2", None).unwrap();
    let missing = a.get_missing_ops_async(&b.get_state_vector()).await.unwrap();
    assert!(!missing.is_empty());
    b.merge(missing).unwrap();
    assert!(b.compare_structure(&a));
}

#[tokio::test]
async fn vertices_persist_across_separate_store_instances() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reptree.db").to_string_lossy().to_string();

    let root = {
        let store = Arc::new(Storage::new(StorageConfig::Sqlite { path: db_path.clone() }).await.unwrap());
        let mut a = RepTree::new("p1", None).unwrap().with_store(store, None);
        let root = a.create_root().unwrap();
        let child = a.new_named_vertex(&root, "persisted").unwrap();
        a.persist_vertex(&root).await.unwrap();
        a.persist_vertex(&child).await.unwrap();
        root
    };

    let reopened = Arc::new(Storage::new(StorageConfig::Sqlite { path: db_path }).await.unwrap());
    let fresh = RepTree::new("p2", None).unwrap().with_store(reopened, None);
    let children = fresh.get_children_ids_async(&root, None, 10).await.unwrap();
    assert_eq!(children.len(), 1);
}
