//! Reconciler: merges fetched snapshots into the materialized tree.
//!
//! One level is applied at a time. Scalar properties of matching nodes are
//! patched in place (only when they differ), unmatched nodes are created
//! and vanished ones destroyed. UI flags and children of reused nodes are
//! never touched. Materialized branch children are then refreshed
//! concurrently, each against its own ticket.

use std::collections::HashSet;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::join_all;
use log::debug;

use crate::error::Error;
use crate::error::FetchError;
use crate::fetch::Page;
use crate::fetch::SnapshotFetcher;
use crate::model::NodeData;
use crate::model::NodeId;
use crate::paging::restore_tail;
use crate::tree::RootSource;
use crate::tree::Tree;
use crate::tree::TreeState;

/// Summary of one level of reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Nodes created from scratch.
    pub created: usize,
    /// Reused nodes whose scalar properties changed.
    pub updated: usize,
    /// Nodes destroyed (with their subtrees).
    pub removed: usize,
    /// Materialized branch children whose own levels are now stale.
    pub pending: Vec<NodeId>,
}

/// Applies `incoming` as the complete materialized child list of `parent`.
///
/// `total` is the backend's child count. `splice` is a node that must end
/// up in the list even if `incoming` lacks it; it becomes the owner's
/// retained node. A previously retained node survives as long as it is
/// not part of `incoming` and more pages remain. Duplicate ids in
/// `incoming` keep their first occurrence.
///
/// Dropped silently if `parent` no longer exists.
pub(crate) fn reconcile_children(
    state: &mut TreeState,
    parent: &NodeId,
    incoming: Vec<NodeData>,
    total: usize,
    splice: Option<NodeData>,
) -> Result<Reconciled, Error> {
    let Some(node) = state.index().get(parent) else {
        debug!("dropping reconciliation for missing node {}", parent);
        return Ok(Reconciled::default());
    };
    let old: Vec<NodeId> = node.children().to_vec();
    let previous_retained = node.cursor().and_then(|c| c.retained.clone());
    let siblings: HashSet<NodeId> = old.iter().cloned().collect();

    // A pending "see more" fetch for this owner is superseded. Its parked
    // tail is either reattached below or dropped.
    let superseded = state.take_stash(parent);
    if superseded.is_some() {
        debug!("reconciliation of {} supersedes a pending page load", parent);
    }

    let mut report = Reconciled::default();
    let mut changed = HashSet::new();
    let mut desired: Vec<NodeId> = Vec::with_capacity(incoming.len() + 2);
    let mut seen: HashSet<NodeId> = HashSet::new();

    for data in incoming {
        if !seen.insert(data.id.clone()) {
            debug!("duplicate {} in snapshot of {}", data.id, parent);
            continue;
        }
        let existed = siblings.contains(&data.id) || state.index().is_detached(&data.id);
        if let Some(id) = state.adopt(parent, data, &siblings, &mut changed) {
            if !existed {
                report.created += 1;
            }
            desired.push(id);
        }
    }

    let mut retained = None;
    match splice {
        Some(data) if !seen.contains(&data.id) => {
            let existed = siblings.contains(&data.id) || state.index().is_detached(&data.id);
            if let Some(id) = state.adopt(parent, data, &siblings, &mut changed) {
                if !existed {
                    report.created += 1;
                }
                desired.push(id.clone());
                retained = Some(id);
            }
        }
        Some(_) => {}
        None => {
            if let Some(id) = previous_retained
                && !seen.contains(&id)
                && desired.len() < total
                && (siblings.contains(&id) || state.index().is_detached(&id))
            {
                state.index_mut().clear_detached(&id);
                desired.push(id.clone());
                retained = Some(id);
            }
        }
    }

    if let Some(id) = superseded.and_then(|stash| stash.retained)
        && !desired.contains(&id)
        && state.index().is_detached(&id)
    {
        state.discard_detached(&id);
        report.removed += 1;
    }

    let keep: HashSet<&NodeId> = desired.iter().collect();
    report.removed += old
        .iter()
        .filter(|id| !id.is_placeholder() && !keep.contains(id))
        .count();
    report.updated = changed.len();

    if desired.len() < total {
        desired.push(state.ensure_sentinel(parent));
    }

    state.apply_children(parent, desired, &changed)?;
    state.discard_sentinel(parent);
    state.set_cursor(parent, total, retained);

    report.pending = state
        .index()
        .children(parent)
        .iter()
        .filter(|id| {
            state
                .index()
                .get(id)
                .is_some_and(|n| !n.is_leaf() && n.is_materialized())
        })
        .cloned()
        .collect();
    Ok(report)
}

/// Fetches one page of `owner`'s children, honoring the top-level source.
pub(crate) async fn fetch_page(
    fetcher: &dyn SnapshotFetcher,
    owner: &NodeId,
    source: &RootSource,
    page: usize,
    page_size: usize,
) -> Result<Page, FetchError> {
    match (owner, source) {
        (NodeId::Root, RootSource::SiblingsOf(anchor)) => {
            fetcher.fetch_root_siblings(anchor, page, page_size).await
        }
        _ => fetcher.fetch_children(owner, page, page_size).await,
    }
}

/// Fetches pages `1..=pages` and concatenates them.
///
/// Stops early once the reported total is covered or a later page is out
/// of range (the level shrank since it was loaded).
pub(crate) async fn fetch_pages(
    fetcher: &dyn SnapshotFetcher,
    owner: &NodeId,
    source: &RootSource,
    pages: usize,
    page_size: usize,
) -> Result<(Vec<NodeData>, usize), FetchError> {
    let mut items = Vec::new();
    let mut total = 0;
    for page in 1..=pages.max(1) {
        match fetch_page(fetcher, owner, source, page, page_size).await {
            Ok(fetched) => {
                total = fetched.total_count();
                items.extend(fetched.into_items());
                if items.len() >= total {
                    break;
                }
            }
            Err(e) if page > 1 && e.is_out_of_range() => {
                debug!("{} shrank below page {}", owner, page);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok((items, total))
}

/// Re-fetches the loaded pages of `parent` and reconciles them, then
/// recurses into materialized children concurrently.
///
/// Unmaterialized or vanished nodes are skipped. A child failure does not
/// stop its siblings; the first error is returned once all have settled.
pub(crate) fn refresh_subtree(tree: Tree, parent: NodeId) -> BoxFuture<'static, Result<(), Error>> {
    async move {
        let page_size = tree.config().page_size;
        let prepared = tree.write(|s| {
            let pages = s
                .index()
                .get(&parent)?
                .cursor()?
                .loaded_pages(page_size);
            let source = s.root_source().clone();
            Some((s.issue(&parent), pages, source))
        });
        let Some((ticket, pages, source)) = prepared else {
            return Ok(());
        };

        let fetched = fetch_pages(tree.fetcher(), &parent, &source, pages, page_size).await;

        let pending = tree.write(|s| {
            if !s.is_current(&ticket) {
                debug!("dropping stale refresh of {}", parent);
                return Ok(None);
            }
            match fetched {
                Ok((items, total)) => {
                    reconcile_children(s, &parent, items, total, None).map(|r| Some(r.pending))
                }
                Err(e) => {
                    // The page load this refresh superseded parked a tail.
                    if s.stash(&parent).is_some() {
                        restore_tail(s, &parent)?;
                    }
                    Err(e.into())
                }
            }
        })?;
        let Some(pending) = pending else {
            return Ok(());
        };

        let results = join_all(
            pending
                .into_iter()
                .map(|child| refresh_subtree(tree.clone(), child)),
        )
        .await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }
    .boxed()
}
