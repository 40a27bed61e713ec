//! Tree data model.

mod id;
mod node;
mod status;

pub use id::NodeId;
pub use node::Cursor;
pub use node::Node;
pub use node::NodeData;
pub use node::NodeKind;
pub use node::UiFlags;
pub use status::Status;
