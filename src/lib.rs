//! Interlock: blocking concurrency primitives for in-process
//! multi-threaded programs.
//!
//! # Overview
//!
//! Everything here is built from the platform's blocking mutex,
//! condition-variable, and reader-writer primitives; there is no async,
//! no lock-free machinery, and no cross-process coordination. What the
//! crate adds on top is discipline: lock acquisition orders that cannot
//! deadlock, instrumentation that catches the orders that can, and
//! structured lifecycles for queues and worker pools.
//!
//! # Components
//!
//! - [`sync::HierarchicalMutex`]: mutex that refuses acquisition
//!   violating a declared total order on levels — deadlock freedom by
//!   construction.
//! - [`sync::WaitGraph`] + [`sync::TrackedMutex`]: live wait-for graph
//!   with on-demand cycle detection — deadlock detection after the fact.
//! - [`queue::BoundedQueue`]: fixed-capacity FIFO with blocking produce
//!   and consume.
//! - [`cache::RwCache`]: shared-read / exclusive-write map with
//!   read-through population from an injected loader.
//! - [`pool::PriorityPool`]: fixed worker set drawing from a max-heap of
//!   tasks with deadlines, cancellation, one-shot result futures, and
//!   graceful shutdown.
//!
//! # Guard discipline
//!
//! Every lock in this crate hands out an RAII guard; release runs on
//! every exit path from the enclosing scope, panics included. Errors
//! that reflect caller misuse ([`sync::HierarchyError`],
//! [`pool::SubmitError`]) are reported synchronously; errors arising
//! inside a pool task are captured and delivered through the task's
//! [`pool::TaskHandle`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]

pub mod cache;
pub mod pool;
pub mod queue;
pub mod sync;
pub mod test_utils;

pub use cache::RwCache;
pub use pool::{PoolStats, PriorityPool, SubmitError, TaskError, TaskHandle};
pub use queue::BoundedQueue;
pub use sync::{
    HierarchicalGuard, HierarchicalMutex, HierarchyError, LockId, TrackedGuard, TrackedMutex,
    WaitGraph,
};
