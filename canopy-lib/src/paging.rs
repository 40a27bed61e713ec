//! Pagination: first materialization and "see more" activation.
//!
//! A node's children arrive one page at a time. While pages remain, the
//! last child is a "see more" sentinel. Activating it parks the tail
//! (sentinel and any retained node), fetches the next page and appends it,
//! substituting the retained node by identity so its flags and subtree
//! survive.

use std::collections::HashSet;

use log::debug;

use crate::error::Error;
use crate::error::FetchError;
use crate::fetch::Page;
use crate::fetch::number_of_pages;
use crate::model::NodeId;
use crate::reconcile::fetch_page;
use crate::reconcile::reconcile_children;
use crate::tree::RootSource;
use crate::tree::TailStash;
use crate::tree::Tree;
use crate::tree::TreeState;

/// Fetches the first page of `owner`'s children behind a loading
/// placeholder.
///
/// On failure the placeholder is removed and the node is left
/// unmaterialized, so the next expansion tries again.
pub(crate) async fn materialize(tree: &Tree, owner: &NodeId) -> Result<(), Error> {
    let page_size = tree.config().page_size;
    let (ticket, source) = tree.write(|s| {
        let node = s
            .index()
            .get(owner)
            .ok_or_else(|| Error::NodeNotFound(owner.clone()))?;
        if node.is_leaf() {
            return Err(Error::NotExpandable(owner.clone()));
        }
        s.begin_loading(owner)?;
        Ok((s.issue(owner), s.root_source().clone()))
    })?;

    let fetched = fetch_page(tree.fetcher(), owner, &source, 1, page_size).await;

    tree.write(|s| {
        if !s.is_current(&ticket) {
            debug!("dropping stale first page of {}", owner);
            return Ok(());
        }
        match fetched {
            Ok(page) => {
                let total = page.total_count();
                reconcile_children(s, owner, page.into_items(), total, None)?;
                Ok(())
            }
            Err(e) => {
                s.end_loading(owner);
                Err(e.into())
            }
        }
    })
}

/// Loads the next page of `owner`'s children. Returns the number of nodes
/// appended.
///
/// Does nothing when every child is already materialized. A repeated call
/// while a load is in flight supersedes it. If the requested page is out
/// of range, the page count is recomputed from a fresh first page and the
/// request is clamped and retried once.
pub(crate) async fn load_more(tree: &Tree, owner: &NodeId) -> Result<usize, Error> {
    let page_size = tree.config().page_size;
    let prepared = tree.write(|s| prepare(s, owner))?;
    let Some((ticket, page, source)) = prepared else {
        return Ok(0);
    };

    let fetched = match fetch_page(tree.fetcher(), owner, &source, page, page_size).await {
        Err(e) if e.is_out_of_range() => {
            clamp_and_retry(tree, owner, &source, page, page_size).await
        }
        other => other,
    };

    tree.write(|s| {
        if !s.is_current(&ticket) {
            debug!("dropping stale page {} of {}", page, owner);
            return Ok(0);
        }
        match fetched {
            Ok(fetched) => append(s, owner, fetched),
            Err(e) => {
                restore_tail(s, owner)?;
                Err(e.into())
            }
        }
    })
}

/// Resolves a sentinel to its owner and loads the owner's next page.
pub(crate) async fn activate(tree: &Tree, sentinel: &NodeId) -> Result<usize, Error> {
    match sentinel {
        NodeId::SeeMore(owner) => load_more(tree, owner).await,
        other => Err(Error::NotPageable(other.clone())),
    }
}

/// Parks the tail of `owner` and issues the page request.
fn prepare(
    s: &mut TreeState,
    owner: &NodeId,
) -> Result<Option<(crate::tree::Ticket, usize, RootSource)>, Error> {
    let node = s
        .index()
        .get(owner)
        .ok_or_else(|| Error::NodeNotFound(owner.clone()))?;
    let cursor = node
        .cursor()
        .cloned()
        .ok_or_else(|| Error::NotPageable(owner.clone()))?;
    if !cursor.has_more() {
        return Ok(None);
    }

    if s.stash(owner).is_none() {
        let sentinel_id = NodeId::see_more(owner);
        let children = node.children();
        let sentinel = children.last() == Some(&sentinel_id);
        let retained = cursor.retained.clone().filter(|r| children.contains(r));
        if sentinel {
            s.detach(&sentinel_id);
        }
        if let Some(id) = &retained {
            s.detach(id);
        }
        s.set_stash(owner, TailStash { sentinel, retained });
    }

    let page = cursor.next_page(s.page_size());
    Ok(Some((s.issue(owner), page, s.root_source().clone())))
}

async fn clamp_and_retry(
    tree: &Tree,
    owner: &NodeId,
    source: &RootSource,
    page: usize,
    page_size: usize,
) -> Result<Page, FetchError> {
    let probe = fetch_page(tree.fetcher(), owner, source, 1, page_size).await?;
    let last = number_of_pages(probe.total_count(), page_size);
    let clamped = page.min(last);
    debug!(
        "page {} of {} out of range, clamping to {} of {}",
        page, owner, clamped, last
    );
    if clamped == 1 {
        return Ok(probe);
    }
    fetch_page(tree.fetcher(), owner, source, clamped, page_size).await
}

/// Appends a fetched page behind the materialized children of `owner`.
fn append(s: &mut TreeState, owner: &NodeId, page: Page) -> Result<usize, Error> {
    let stash = s.take_stash(owner).unwrap_or_default();
    let mut desired: Vec<NodeId> = s
        .index()
        .children(owner)
        .iter()
        .filter(|id| !id.is_placeholder())
        .cloned()
        .collect();
    let present: HashSet<NodeId> = desired.iter().cloned().collect();
    let total = page.total_count();

    let mut changed = HashSet::new();
    let mut appended = 0;
    let mut retained_matched = false;
    for data in page.into_items() {
        if present.contains(&data.id) || desired.contains(&data.id) {
            continue;
        }
        let is_retained = stash.retained.as_ref() == Some(&data.id);
        if let Some(id) = s.adopt(owner, data, &present, &mut changed) {
            if is_retained {
                retained_matched = true;
            } else {
                appended += 1;
            }
            desired.push(id);
        }
    }

    let mut retained = None;
    if let Some(id) = stash.retained
        && !retained_matched
    {
        if desired.len() < total && s.index().is_detached(&id) {
            s.index_mut().clear_detached(&id);
            desired.push(id.clone());
            retained = Some(id);
        } else {
            s.discard_detached(&id);
        }
    }

    if desired.len() < total {
        desired.push(s.ensure_sentinel(owner));
    }
    s.apply_children(owner, desired, &changed)?;
    s.discard_sentinel(owner);
    s.set_cursor(owner, total, retained);
    Ok(appended)
}

/// Puts a parked tail back after a failed page load.
pub(crate) fn restore_tail(s: &mut TreeState, owner: &NodeId) -> Result<(), Error> {
    let Some(stash) = s.take_stash(owner) else {
        return Ok(());
    };
    let mut desired: Vec<NodeId> = s
        .index()
        .children(owner)
        .iter()
        .filter(|id| !id.is_placeholder())
        .cloned()
        .collect();
    if let Some(id) = &stash.retained
        && s.index().is_detached(id)
    {
        s.index_mut().clear_detached(id);
        desired.push(id.clone());
    }
    if stash.sentinel {
        desired.push(s.ensure_sentinel(owner));
    }
    s.apply_children(owner, desired, &HashSet::new())?;
    s.resync_cursor(owner)
}
