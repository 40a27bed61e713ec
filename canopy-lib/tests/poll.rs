//! Integration tests for polling a workflow tree.

use std::sync::Arc;
use std::time::Duration;

use canopy_lib::PollScheduler;
use canopy_lib::PollState;
use canopy_lib::Tree;
use canopy_lib::adapter::NullAdapter;
use canopy_lib::config::PollConfig;
use canopy_lib::fetch::MemoryFetcher;
use canopy_lib::model::NodeData;
use canopy_lib::model::NodeId;
use canopy_lib::model::Status;
use canopy_lib::poll::PollTarget;

/// A step with one running and one finished task.
fn backend() -> Arc<MemoryFetcher> {
    let backend = Arc::new(MemoryFetcher::new());
    backend.insert(&NodeId::Root, NodeData::step("s", "Ingest", Status::at(50)));
    backend.insert(
        &NodeId::step("s"),
        NodeData::task("t1", "Validate", Status::at(40)),
    );
    backend.insert(&NodeId::step("s"), NodeData::task("t2", "Store", Status::done()));
    backend
}

fn config() -> PollConfig {
    PollConfig::default()
        .with_active_interval(Duration::from_secs(1))
        .with_idle_interval(Duration::from_secs(5))
}

#[tokio::test]
async fn test_pending_work_follows_visibility() {
    let backend = backend();
    let tree = Tree::new(backend.clone(), Arc::new(NullAdapter));
    tree.load_roots().await.unwrap();

    // Collapsed step counts as leaf level.
    assert!(tree.has_pending_work());

    tree.expand(&NodeId::step("s")).await.unwrap();
    assert!(tree.has_pending_work());

    backend.set_status(&NodeId::task("t1"), Status::done());
    tree.refresh().await.unwrap();
    assert!(!tree.has_pending_work());

    backend.set_status(&NodeId::task("t1"), Status::failed_at(70));
    tree.refresh().await.unwrap();
    assert!(!tree.has_pending_work());
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_stops_after_work_completes() {
    let backend = backend();
    let tree = Tree::new(backend.clone(), Arc::new(NullAdapter));
    tree.load_roots().await.unwrap();
    tree.expand(&NodeId::step("s")).await.unwrap();

    let mut scheduler = PollScheduler::new(config());
    let mut state = scheduler.start(tree.clone());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(scheduler.state(), PollState::Active);

    backend.set_status(&NodeId::task("t1"), Status::done());
    let calls = backend.children_calls();
    state.wait_for(|s| *s == PollState::Idle).await.unwrap();
    assert_eq!(
        tree.get(&NodeId::task("t1")).unwrap().status(),
        Some(&Status::done())
    );

    // The confirmatory refresh is the only one after going idle.
    let idle_calls = backend.children_calls();
    assert!(idle_calls > calls);
    state.wait_for(|s| *s == PollState::Stopped).await.unwrap();
    assert_eq!(backend.children_calls(), idle_calls + 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_resumes_when_work_reappears() {
    let backend = backend();
    backend.set_status(&NodeId::task("t1"), Status::done());
    let tree = Tree::new(backend.clone(), Arc::new(NullAdapter));
    tree.load_roots().await.unwrap();
    tree.expand(&NodeId::step("s")).await.unwrap();

    let mut scheduler = PollScheduler::new(config());
    let mut state = scheduler.start(tree.clone());
    state.wait_for(|s| *s == PollState::Idle).await.unwrap();

    backend.set_status(&NodeId::task("t2"), Status::at(10));
    state.wait_for(|s| *s == PollState::Active).await.unwrap();
    assert_eq!(
        tree.get(&NodeId::task("t2")).unwrap().status(),
        Some(&Status::at(10))
    );
    scheduler.cancel();
}
