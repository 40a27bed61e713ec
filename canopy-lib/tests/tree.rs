//! Integration tests for reconciliation and pagination against an
//! in-memory backend.

use std::sync::Arc;

use canopy_lib::Error;
use canopy_lib::Tree;
use canopy_lib::adapter::AdapterOp;
use canopy_lib::adapter::RecordingAdapter;
use canopy_lib::adapter::TreeAdapter;
use canopy_lib::config::TreeConfig;
use canopy_lib::error::AdapterError;
use canopy_lib::fetch::MemoryFetcher;
use canopy_lib::fetch::Page;
use canopy_lib::model::NodeData;
use canopy_lib::model::NodeId;

fn archive() -> NodeId {
    NodeId::archive("a")
}

fn record(i: usize) -> NodeId {
    NodeId::record(format!("{i:02}"))
}

/// One archive with `count` records below it.
fn backend(count: usize) -> Arc<MemoryFetcher> {
    let backend = Arc::new(MemoryFetcher::new());
    backend.insert(&NodeId::Root, NodeData::archive("a", "Archive A"));
    for i in 1..=count {
        backend.insert(
            &archive(),
            NodeData::record(format!("{i:02}"), format!("Record {i}")),
        );
    }
    backend
}

fn tree(backend: &Arc<MemoryFetcher>) -> (Tree, Arc<RecordingAdapter>) {
    let adapter = Arc::new(RecordingAdapter::new());
    let tree = Tree::with_config(
        backend.clone(),
        adapter.clone(),
        TreeConfig::default().with_page_size(10),
    );
    (tree, adapter)
}

fn assert_sentinel_invariant(tree: &Tree, owner: &NodeId) {
    let cursor = tree.cursor(owner).expect("owner is materialized");
    let children = tree.children(owner);
    let data = children.iter().filter(|c| !c.is_placeholder()).count();
    let sentinels = children
        .iter()
        .filter(|c| matches!(c, NodeId::SeeMore(_)))
        .count();

    assert_eq!(cursor.materialized, data);
    assert_eq!(sentinels, usize::from(cursor.has_more()));
    if cursor.has_more() {
        assert_eq!(children.last(), Some(&NodeId::see_more(owner)));
    }
}

fn assert_adapter_mirrors(tree: &Tree, adapter: &RecordingAdapter, owner: &NodeId) {
    assert_eq!(adapter.children_of(owner), tree.children(owner));
}

// =============================================================================
// Pagination
// =============================================================================

#[tokio::test]
async fn test_paging_scenario() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    let children = tree.children(&archive());
    assert_eq!(children.len(), 11);
    assert_eq!(children[..10], (1..=10).map(record).collect::<Vec<_>>()[..]);
    assert_sentinel_invariant(&tree, &archive());

    let sentinel = NodeId::see_more(&archive());
    assert_eq!(tree.activate(&sentinel).await.unwrap(), 10);
    assert_eq!(tree.children(&archive()).len(), 21);
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());

    assert_eq!(tree.activate(&sentinel).await.unwrap(), 5);
    let children = tree.children(&archive());
    assert_eq!(children, (1..=25).map(record).collect::<Vec<_>>());
    assert_sentinel_invariant(&tree, &archive());
    assert!(!tree.contains(&sentinel));
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_paging_keeps_flags_of_loaded_children() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.select(&record(3)).unwrap();
    tree.set_checked(&record(4), true);

    tree.load_more(&archive()).await.unwrap();
    assert!(tree.get(&record(3)).unwrap().flags().selected);
    assert!(tree.get(&record(4)).unwrap().flags().checked);
    assert_eq!(tree.selected(), Some(record(3)));
}

#[tokio::test]
async fn test_out_of_range_page_is_clamped() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.load_more(&archive()).await.unwrap();

    // Five loaded records vanish, so page 3 no longer exists.
    for i in 16..=20 {
        backend.remove(&record(i));
    }
    let appended = tree.load_more(&archive()).await.unwrap();
    assert_eq!(appended, 5);

    let children = tree.children(&archive());
    let mut unique = children.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), children.len());
    assert!(children.contains(&record(25)));
    assert_sentinel_invariant(&tree, &archive());

    tree.refresh().await.unwrap();
    let expected: Vec<NodeId> = (1..=15).chain(21..=25).map(record).collect();
    assert_eq!(tree.children(&archive()), expected);
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_repeated_activation_while_in_flight() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    backend.hold(&archive());
    let first = tokio::spawn({
        let tree = tree.clone();
        async move { tree.load_more(&archive()).await }
    });
    tokio::task::yield_now().await;
    backend.release(&archive());

    let second = tree.load_more(&archive()).await.unwrap();
    let first = first.await.unwrap().unwrap();

    // Whichever request lost the race is dropped; page 2 lands once.
    assert_eq!(first + second, 10);
    assert_eq!(tree.children(&archive()).len(), 21);
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_refresh_supersedes_page_load() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    backend.hold_page(&archive(), 2);
    let pending = tokio::spawn({
        let tree = tree.clone();
        async move { tree.load_more(&archive()).await }
    });
    tokio::task::yield_now().await;
    assert!(!tree.children(&archive()).contains(&NodeId::see_more(&archive())));

    tree.refresh_node(&archive()).await.unwrap();
    backend.release(&archive());
    assert_eq!(pending.await.unwrap().unwrap(), 0);

    assert_eq!(tree.children(&archive()).len(), 11);
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());
    assert_eq!(tree.len(), 12);

    assert_eq!(tree.load_more(&archive()).await.unwrap(), 10);
    assert_sentinel_invariant(&tree, &archive());
}

#[tokio::test]
async fn test_failed_refresh_restores_parked_sentinel() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    backend.hold_page(&archive(), 2);
    let pending = tokio::spawn({
        let tree = tree.clone();
        async move { tree.load_more(&archive()).await }
    });
    tokio::task::yield_now().await;

    backend.fail_next(1);
    assert!(matches!(
        tree.refresh_node(&archive()).await,
        Err(Error::Fetch(_))
    ));
    backend.release(&archive());
    assert_eq!(pending.await.unwrap().unwrap(), 0);

    // Back to the state before the page load started.
    let children = tree.children(&archive());
    assert_eq!(children.len(), 11);
    assert_eq!(children.last(), Some(&NodeId::see_more(&archive())));
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());
    assert_eq!(tree.len(), 12);

    assert_eq!(
        tree.activate(&NodeId::see_more(&archive())).await.unwrap(),
        10
    );
    assert_sentinel_invariant(&tree, &archive());
}

#[tokio::test]
async fn test_reconcile_during_page_load_drops_retained_node() {
    let backend = backend(15);
    let (tree, adapter) = tree(&backend);
    tree.reveal(backend.get(&record(15)).unwrap()).await.unwrap();
    assert_eq!(tree.cursor(&archive()).unwrap().retained, Some(record(15)));

    backend.hold_page(&archive(), 2);
    let pending = tokio::spawn({
        let tree = tree.clone();
        async move { tree.load_more(&archive()).await }
    });
    tokio::task::yield_now().await;

    // The level shrank to its first page; the parked record 15 is gone.
    let snapshot: Vec<NodeData> = (1..=10).map(|i| backend.get(&record(i)).unwrap()).collect();
    tree.reconcile(&archive(), Page::new(snapshot, 10)).unwrap();
    backend.release(&archive());
    assert_eq!(pending.await.unwrap().unwrap(), 0);

    assert!(tree.get(&record(15)).is_none());
    assert!(!adapter.contains(&record(15)));
    assert_eq!(tree.children(&archive()), (1..=10).map(record).collect::<Vec<_>>());
    assert_eq!(tree.cursor(&archive()).unwrap().retained, None);
    assert_eq!(tree.len(), 11);
    assert_eq!(tree.selected(), None);
    assert_sentinel_invariant(&tree, &archive());
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let backend = backend(25);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.load_more(&archive()).await.unwrap();
    tree.select(&record(12)).unwrap();

    let before: Vec<_> = tree
        .visible()
        .into_iter()
        .map(|(id, _)| (id.clone(), tree.get(&id).unwrap().flags()))
        .collect();
    adapter.clear_ops();

    tree.refresh().await.unwrap();

    let after: Vec<_> = tree
        .visible()
        .into_iter()
        .map(|(id, _)| (id.clone(), tree.get(&id).unwrap().flags()))
        .collect();
    assert_eq!(before, after);
    assert!(adapter.ops().is_empty());
}

#[tokio::test]
async fn test_reconcile_truncates() {
    let backend = backend(5);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    assert_eq!(tree.children(&archive()).len(), 5);

    let snapshot: Vec<NodeData> = (1..=2)
        .map(|i| backend.get(&record(i)).unwrap())
        .collect();
    let report = tree.reconcile(&archive(), Page::new(snapshot, 2)).unwrap();

    assert_eq!(report.removed, 3);
    assert_eq!(tree.children(&archive()), vec![record(1), record(2)]);
    assert!(!tree.contains(&record(5)));
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_refresh_preserves_flags_and_patches_labels() {
    let backend = backend(3);
    backend.insert(&record(2), NodeData::record("02-1", "Nested"));
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.expand(&record(2)).await.unwrap();
    tree.select(&record(2)).unwrap();
    tree.set_checked(&record(3), true);

    backend.update(NodeData::record("02", "Renamed"));
    tree.refresh().await.unwrap();

    let node = tree.get(&record(2)).unwrap();
    assert_eq!(node.label(), "Renamed");
    assert!(node.flags().expanded);
    assert!(node.flags().selected);
    assert_eq!(node.children(), &[NodeId::record("02-1")]);
    assert!(tree.get(&record(3)).unwrap().flags().checked);
    assert!(adapter.is_selected(&record(2)));
    assert_eq!(adapter.get_node(&record(2)).unwrap().label(), "Renamed");
}

#[tokio::test]
async fn test_refresh_picks_up_backend_changes() {
    let backend = backend(3);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    backend.remove(&record(1));
    backend.insert(&archive(), NodeData::record("09", "Late"));
    tree.refresh().await.unwrap();

    assert_eq!(
        tree.children(&archive()),
        vec![record(2), record(3), record(9)]
    );
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_stale_fetch_is_dropped() {
    let backend = backend(3);
    backend.insert(&record(3), NodeData::record("03-1", "Child of c"));
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.expand(&record(3)).await.unwrap();

    backend.hold(&record(3));
    let pending = tokio::spawn({
        let tree = tree.clone();
        async move { tree.refresh_node(&record(3)).await }
    });
    tokio::task::yield_now().await;

    let snapshot = vec![backend.get(&record(1)).unwrap()];
    tree.reconcile(&archive(), Page::new(snapshot, 1)).unwrap();
    assert!(!tree.contains(&record(3)));

    backend.release(&record(3));
    pending.await.unwrap().unwrap();

    assert!(!tree.contains(&record(3)));
    assert!(!tree.contains(&NodeId::record("03-1")));
    assert_eq!(tree.children(&archive()), vec![record(1)]);
    assert!(!adapter.contains(&record(3)));
}

#[tokio::test]
async fn test_moved_node_is_recreated() {
    let backend = backend(2);
    backend.insert(&NodeId::Root, NodeData::archive("b", "Archive B"));
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    tree.expand(&NodeId::archive("b")).await.unwrap();

    let moved = backend.get(&record(2)).unwrap();
    backend.remove(&record(2));
    backend.insert(&NodeId::archive("b"), moved);
    tree.refresh().await.unwrap();

    assert_eq!(tree.children(&archive()), vec![record(1)]);
    assert_eq!(tree.children(&NodeId::archive("b")), vec![record(2)]);
    assert_eq!(adapter.children_of(&NodeId::archive("b")), vec![record(2)]);
}

// =============================================================================
// Adapter and UI state
// =============================================================================

#[tokio::test]
async fn test_adapter_collision_rebuilds_level() {
    let backend = backend(3);
    let (tree, adapter) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    adapter.clear_ops();

    let mut snapshot: Vec<NodeData> = (1..=3)
        .map(|i| backend.get(&record(i)).unwrap())
        .collect();
    snapshot.push(NodeData::record("04", "Record 4").with_parent(archive()));
    adapter.fail_next_create(AdapterError::IdCollision(record(4)));
    tree.reconcile(&archive(), Page::new(snapshot, 4)).unwrap();

    assert_eq!(tree.children(&archive()).len(), 4);
    assert!(adapter.ops().contains(&AdapterOp::Delete(record(1))));
    assert_adapter_mirrors(&tree, &adapter, &archive());
}

#[tokio::test]
async fn test_expand_errors() {
    let backend = backend(1);
    backend.insert(&NodeId::Root, NodeData::agent("ag", "Agent"));
    let (tree, _) = tree(&backend);
    tree.load_roots().await.unwrap();

    assert!(matches!(
        tree.expand(&NodeId::agent("ag")).await,
        Err(Error::NotExpandable(_))
    ));
    assert!(matches!(
        tree.expand(&NodeId::record("missing")).await,
        Err(Error::NodeNotFound(_))
    ));
}

#[tokio::test]
async fn test_collapse_keeps_children() {
    let backend = backend(3);
    let (tree, _) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();
    let calls = backend.children_calls();

    assert!(!tree.toggle(&archive()).await.unwrap());
    assert_eq!(tree.visible().len(), 1);
    assert!(tree.toggle(&archive()).await.unwrap());
    assert_eq!(tree.visible().len(), 4);
    assert_eq!(backend.children_calls(), calls);
}

#[tokio::test]
async fn test_keyboard_navigation() {
    let backend = backend(2);
    backend.insert(&NodeId::Root, NodeData::archive("b", "Archive B"));
    let (tree, _) = tree(&backend);
    tree.load_roots().await.unwrap();
    tree.expand(&archive()).await.unwrap();

    let mut order = Vec::new();
    let mut current = tree.next_visible(None);
    while let Some(id) = current {
        current = tree.next_visible(Some(&id));
        order.push(id);
    }
    assert_eq!(
        order,
        vec![archive(), record(1), record(2), NodeId::archive("b")]
    );

    assert_eq!(tree.previous_visible(Some(&NodeId::archive("b"))), Some(record(2)));
    assert_eq!(tree.parent_visible(&record(2)), Some(archive()));
    assert_eq!(tree.first_child(&archive()), Some(record(1)));
    assert_eq!(tree.first_child(&NodeId::archive("b")), None);
}
