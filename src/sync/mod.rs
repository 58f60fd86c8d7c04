//! Deadlock-avoidance and deadlock-detection lock primitives.
//!
//! Two complementary strategies over plain blocking mutexes:
//!
//! - [`HierarchicalMutex`]: *avoidance*. Acquisitions must descend a
//!   declared level order; an out-of-order acquire is refused before it
//!   can block, so cycles cannot form.
//! - [`TrackedMutex`] + [`WaitGraph`]: *detection*. Every acquire,
//!   block, and release is mirrored into a wait-for graph, and
//!   [`WaitGraph::has_deadlock`] reports whether the current snapshot
//!   contains a cycle.
//!
//! Both hand out RAII guards; release is scoped and runs on every exit
//! path, panics included.

mod graph;
mod hierarchical;
mod tracked;

pub use graph::{LockId, WaitGraph};
pub use hierarchical::{HierarchicalGuard, HierarchicalMutex, HierarchyError};
pub use tracked::{TrackedGuard, TrackedMutex};
