//! Snapshot fetching.
//!
//! A [`SnapshotFetcher`] is the only I/O boundary of the engine: it returns
//! one page of children for a node, or resolves a node's structural parent.

mod http;
mod memory;
mod retry;

pub use http::HttpConfig;
pub use http::HttpFetcher;
pub use memory::MemoryFetcher;
pub use retry::RetryConfig;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::NodeData;
use crate::model::NodeId;

/// Default number of children per page.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Number of pages needed for `total` items (at least one).
pub fn number_of_pages(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// One page of children with the total child count.
///
/// # Example
///
/// ```
/// use canopy_lib::fetch::Page;
/// use canopy_lib::model::NodeData;
///
/// let page = Page::new(vec![NodeData::record("1", "Letters")], 25);
/// assert!(page.has_more(1, 10));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    items: Vec<NodeData>,
    total_count: usize,
}

impl Page {
    /// Creates a new page.
    pub fn new(items: Vec<NodeData>, total_count: usize) -> Self {
        Self { items, total_count }
    }

    /// Returns the items in this page.
    pub fn items(&self) -> &[NodeData] {
        &self.items
    }

    /// Consumes the page and returns the items.
    pub fn into_items(self) -> Vec<NodeData> {
        self.items
    }

    /// Total children of the owner across all pages.
    pub fn total_count(&self) -> usize {
        self.total_count
    }

    /// Returns `true` if this page has no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items in this page.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if pages after the 1-based `page` exist.
    pub fn has_more(&self, page: usize, page_size: usize) -> bool {
        page * page_size < self.total_count
    }
}

/// Source of tree snapshots.
///
/// Pages are 1-based. Implementations perform I/O only; they never touch
/// the in-memory tree.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    /// Fetches one page of children of `parent`.
    ///
    /// `NodeId::Root` requests the top-level listing.
    async fn fetch_children(
        &self,
        parent: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError>;

    /// Resolves the structural parent of `node`.
    ///
    /// Returns `None` exactly when `node` is a top-level node.
    async fn fetch_parent(&self, node: &NodeId) -> Result<Option<NodeData>, FetchError>;

    /// Fetches one page of the top-level nodes that share `anchor`'s level.
    async fn fetch_root_siblings(
        &self,
        anchor: &NodeId,
        page: usize,
        page_size: usize,
    ) -> Result<Page, FetchError>;
}
