//! A lock manager for named database resources.
//!
//! Transactions declare the resources they read and write up front and are
//! admitted through a bounded FIFO queue. Either set may be global, in which
//! case every resource is locked in that mode. Resource locks are always
//! taken in ascending name order, so transactions never wait on each other
//! in a cycle.
//!
//! ```
//! use db_locking::{LockManager, LockScope, TxId};
//!
//! let manager = LockManager::new(8);
//! let tx = TxId::next();
//! manager.acquire(tx, LockScope::names(["users"]), LockScope::names(["orders", "stock"]));
//! manager.downgrade(tx, LockScope::names(["orders"]));
//! manager.release(tx);
//! assert_eq!(manager.resources(), 0);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod admission;
mod balancer;
pub mod config;
mod error;
mod locking;
mod manager;
pub mod result;
mod rwlock;
mod scope;
mod table;

pub use config::LockConfig;
pub use error::{Error, Result};
pub use locking::{locking, Locking, ProcessLocking};
pub use manager::{Holds, LockManager, TransactionGuard};
pub use result::{LockResult, Operation};
pub use rwlock::ResourceLock;
pub use scope::{LockScope, ResourceName};

/// Caller-supplied handle identifying one transaction across all calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(u64);

impl TxId {
    /// Draws a fresh id from a process-wide counter.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TxId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<u64> for TxId {
    fn from(id: u64) -> Self {
        TxId(id)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
