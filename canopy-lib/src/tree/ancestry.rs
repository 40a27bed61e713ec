//! Ancestor path builder.
//!
//! Starting from a node with no known ancestry, walks up through
//! `fetch_parent` until the top level, then rebuilds each level of the
//! path top-down. Nodes already in the tree (the start node with its
//! expanded subtree, or any ancestor) are spliced back by identity rather
//! than re-fetched.
//!
//! All fetches complete before the first mutation, so a failure anywhere
//! along the path leaves the tree untouched.

use std::collections::HashSet;

use log::debug;

use super::RootSource;
use super::Tree;
use crate::error::Error;
use crate::model::NodeData;
use crate::model::NodeId;
use crate::reconcile::fetch_pages;
use crate::reconcile::reconcile_children;

/// A fetched level of the path: its owner, children and total.
struct Level {
    owner: NodeId,
    items: Vec<NodeData>,
    total: usize,
}

/// Reveals `start`. Returns the path from the top level down to it.
pub(super) async fn reveal(tree: &Tree, start: NodeData) -> Result<Vec<NodeId>, Error> {
    let chain = walk_up(tree, start).await?;
    let levels = fetch_levels(tree, &chain).await?;

    tree.write(|s| {
        // Park path nodes that sit anywhere other than under their path
        // parent so the level rebuild reuses them instead of moving them.
        let mut expected = NodeId::Root;
        for data in &chain {
            let attached = s.index().contains(&data.id) && !s.index().is_detached(&data.id);
            if attached && s.index().container_of(&data.id).as_ref() != Some(&expected) {
                s.detach(&data.id);
            }
            expected = data.id.clone();
        }

        s.set_root_source(RootSource::SiblingsOf(chain[0].id.clone()));
        for (level, splice) in levels.into_iter().zip(chain.iter()) {
            s.issue(&level.owner);
            reconcile_children(s, &level.owner, level.items, level.total, Some(splice.clone()))?;
        }

        let path: Vec<NodeId> = chain.iter().map(|data| data.id.clone()).collect();
        for id in &path {
            s.discard_detached(id);
        }
        for id in &path[..path.len() - 1] {
            s.set_expanded(id, true);
        }
        Ok(path)
    })
}

/// Collects `start` and its ancestors, top level first.
///
/// Each element's parent reference is filled in from the walk.
async fn walk_up(tree: &Tree, start: NodeData) -> Result<Vec<NodeData>, Error> {
    let mut seen = HashSet::from([start.id.clone()]);
    let mut current = start.id.clone();
    let mut chain = vec![start];

    while let Some(parent) = tree.fetcher().fetch_parent(&current).await? {
        if !seen.insert(parent.id.clone()) {
            return Err(Error::InvalidSnapshot(format!(
                "parent chain of {} loops at {}",
                chain[0].id, parent.id
            )));
        }
        if let Some(child) = chain.last_mut() {
            child.parent = Some(parent.id.clone());
        }
        current = parent.id.clone();
        chain.push(parent);
    }
    if let Some(top) = chain.last_mut() {
        top.parent = None;
    }

    chain.reverse();
    debug!("{} sits {} level(s) below the top", chain[chain.len() - 1].id, chain.len() - 1);
    Ok(chain)
}

/// Fetches the top level and the children of every ancestor.
///
/// Levels already materialized keep their loaded page count. The start
/// node's own children are not fetched.
async fn fetch_levels(tree: &Tree, chain: &[NodeData]) -> Result<Vec<Level>, Error> {
    let page_size = tree.config().page_size;
    let top_source = RootSource::SiblingsOf(chain[0].id.clone());

    let owners = std::iter::once(NodeId::Root)
        .chain(chain[..chain.len() - 1].iter().map(|data| data.id.clone()));

    let mut levels = Vec::with_capacity(chain.len());
    for owner in owners {
        let pages = tree.read(|s| {
            s.index()
                .get(&owner)
                .and_then(|n| n.cursor())
                .map(|c| c.loaded_pages(page_size))
                .unwrap_or(1)
        });
        let (items, total) =
            fetch_pages(tree.fetcher(), &owner, &top_source, pages, page_size).await?;
        levels.push(Level {
            owner,
            items,
            total,
        });
    }
    Ok(levels)
}
