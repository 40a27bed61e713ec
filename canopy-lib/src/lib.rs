//! Tree reconciliation and incremental pagination engine
//!
//! Keeps a deep, partially loaded tree in sync with a paged backend while
//! preserving UI state (expansion, selection, checkboxes) across every
//! refresh, and pushes only incremental mutations to a rendering adapter.

pub mod adapter;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod navigate;
pub mod poll;
pub mod reconcile;
pub mod tree;

mod paging;

pub use error::Error;
pub use poll::PollScheduler;
pub use poll::PollState;
pub use tree::Tree;
