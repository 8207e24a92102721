//! # Strata Core
//!
//! Portable concurrency runtime: atomic cells, mutexes, condition variables,
//! read-write locks, threads with thread-local keys, and the process-wide
//! lifecycle that binds them together.
//!
//! ## Layering
//!
//! | Layer | Module | Responsibility |
//! |---|---|---|
//! | L0 | [`mem`] | Allocator vtable used by every component below |
//! | L1 | [`atomic`] | Sequentially consistent word-sized cells |
//! | L1 | [`mutex`] | Binary exclusion over a kernel-owned handle |
//! | L2 | [`rwlock`] | Shared/exclusive locking |
//! | L2 | [`thread`] | Spawn, join, priorities, TLS keys |
//! | L3 | [`lifecycle`] | One-shot init/teardown ordering across L0-L2 |
//!
//! Higher layers call lower layers, never the reverse.
//!
//! ## Usage
//!
//! Call [`lifecycle::init`] once from the main thread before using anything
//! else, and [`lifecycle::shutdown`] once when done. Both are single-threaded
//! by contract.

pub mod atomic;
pub mod condvar;
pub mod error;
pub mod lifecycle;
pub mod mem;
pub mod mutex;
pub mod rwlock;
pub mod thread;

pub use condvar::Condvar;
pub use error::{Error, ErrorDomain, SysResult};
pub use mem::MemVTable;
pub use mutex::Mutex;
pub use rwlock::RwLock;
pub use thread::{Key, Priority, SlotDtor, Thread, ThreadId};
