//! In-memory distributed file allocation table (DFAT).
//!
//! A [`TreeNode`] tree merges per-path file announcements arriving from every
//! peer into one namespace, tracking which node owns each file's bytes. There
//! is no write path here: the tree only ever grows via [`TreeNode::update`],
//! driven by a local scanner or by gossip reception.

mod owner;
mod tree;
mod update;

pub use owner::Owner;
pub use tree::{FileStat, ListingEntry, TreeNode, TreeNodeReadonly, WalkControl};
pub use update::FileAnnouncement;

/// Sentinel string used on the wire for a directory whose descendants have
/// more than one distinct owner.
pub const MULTIPLE_OWNERS: &str = "(multiple)";
