/// Data model for the diskaudit file tree.
///
/// Re-exports the shared tree structure and supporting types.
pub mod file_node;
pub mod file_tree;
pub mod size;

pub use file_node::{FileNode, NodeState};
pub use file_tree::{FileTree, SortOrder};
