use crate::admission::AdmissionQueue;
use crate::balancer::{Balancer, Role};
use crate::config::{LockConfig, DEFAULT_PARALLEL};
use crate::error::{Error, Result};
use crate::result::LockResult;
use crate::rwlock::ResourceLock;
use crate::scope::{merge_sorted, LockScope, ResourceName, Step};
use crate::table::LockTable;
use crate::TxId;
use dashmap::{DashMap, Entry};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// What a transaction currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holds {
    pub read: LockScope,
    pub write: LockScope,
}

#[derive(Clone)]
struct TxLocks {
    read: LockScope,
    write: LockScope,
    role: Role,
}

impl TxLocks {
    fn pending() -> Self {
        Self {
            read: LockScope::none(),
            write: LockScope::none(),
            role: Role::None,
        }
    }

    fn global_writer(&self) -> bool {
        self.write.is_all()
    }
}

/// Per-database lock manager.
///
/// A transaction passes, in this order: the admission queue, the global
/// lock (`write_all`), the balancer, and the resource locks of its read and
/// write sets in ascending name order. [`release`](Self::release) undoes the
/// same steps backwards. Each of the four stages guards its own state; no
/// stage is entered while another one's internal lock is held.
pub struct LockManager {
    table: LockTable,
    queue: AdmissionQueue,
    /// Exclusive for transactions writing everything, shared for all others.
    write_all: ResourceLock,
    balancer: Balancer,
    transactions: DashMap<TxId, TxLocks>,
    timeout: Option<Duration>,
}

impl LockManager {
    pub fn new(parallel: usize) -> Self {
        Self {
            table: LockTable::new(),
            queue: AdmissionQueue::new(parallel),
            write_all: ResourceLock::new(),
            balancer: Balancer::new(),
            transactions: DashMap::new(),
            timeout: None,
        }
    }

    pub fn with_config(config: &LockConfig) -> Result<Self> {
        config.validate()?;
        let mut manager = Self::new(config.parallel);
        manager.timeout = config.timeout();
        Ok(manager)
    }

    /// Blocks until `tx` is admitted and holds all requested locks.
    ///
    /// # Panics
    ///
    /// Panics if `tx` already holds locks.
    pub fn acquire(&self, tx: TxId, read: impl Into<LockScope>, write: impl Into<LockScope>) {
        if let Err(err) = self.lock(tx, read.into(), write.into(), None) {
            unreachable!("admission without a deadline failed: {err}");
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up if `tx` has not been
    /// admitted within `timeout`. Once admitted, the remaining waits are not
    /// limited. A transaction that timed out holds nothing.
    pub fn acquire_timeout(
        &self,
        tx: TxId,
        read: impl Into<LockScope>,
        write: impl Into<LockScope>,
        timeout: Duration,
    ) -> Result<()> {
        self.lock(tx, read.into(), write.into(), Some(Instant::now() + timeout))
    }

    /// Acquires the locks of `result` and returns a guard releasing them.
    /// The configured admission timeout, if any, applies.
    pub fn register(&self, tx: TxId, result: LockResult) -> Result<TransactionGuard<'_>> {
        let (read, write) = result.into_scopes();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        self.lock(tx, read, write, deadline)?;
        Ok(TransactionGuard { manager: self, tx })
    }

    fn lock(
        &self,
        tx: TxId,
        read: LockScope,
        write: LockScope,
        deadline: Option<Instant>,
    ) -> Result<()> {
        match self.transactions.entry(tx) {
            Entry::Occupied(_) => panic!("{}", Error::AlreadyRegistered(tx)),
            Entry::Vacant(vacant_entry) => {
                vacant_entry.insert(TxLocks::pending());
            }
        }
        let (read, write) = normalize(read, write);

        match deadline {
            Some(deadline) => {
                if let Err(err) = self.queue.admit_until(tx, deadline) {
                    tracing::warn!(tx = %tx, "admission timed out");
                    self.transactions.remove(&tx);
                    return Err(err);
                }
            }
            None => self.queue.admit(tx),
        }
        tracing::debug!(tx = %tx, read = %read, write = %write, "admitted");

        let global_writer = write.is_all();
        if global_writer {
            self.write_all.write();
        } else {
            self.write_all.read();
        }

        let role = if global_writer {
            Role::None
        } else if !write.is_empty() {
            Role::LocalWriter
        } else if read.is_all() {
            Role::GlobalReader
        } else {
            Role::None
        };
        self.balancer.enter(role);

        let empty = BTreeSet::new();
        let read_names = read.as_names().unwrap_or(&empty);
        let write_names = write.as_names().unwrap_or(&empty);
        for step in merge_sorted(read_names, write_names) {
            match step {
                Step::Write(name) => {
                    tracing::trace!(tx = %tx, resource = name, "write lock");
                    self.table.mark_used(name).write();
                }
                Step::Read(name) => {
                    let lock = self.table.mark_used(name);
                    // a global write already excludes every other transaction
                    if !global_writer {
                        tracing::trace!(tx = %tx, resource = name, "read lock");
                        lock.read();
                    }
                }
            }
        }

        self.transactions.insert(tx, TxLocks { read, write, role });
        tracing::trace!(tx = %tx, "locks acquired");
        Ok(())
    }

    /// Keeps write locks on `keep` only and turns all other write locks of
    /// `tx` into read locks.
    ///
    /// A global write lock is replaced by write locks on `keep` and read
    /// locks on the specific read set. If `tx` reads everything, an empty
    /// `keep` turns it into a global reader.
    ///
    /// A global write of a transaction that reads everything is **not**
    /// downgraded if `keep` is not empty: `tx` would be a global reader and
    /// a local writer at once, which the two cannot be. The call returns
    /// with the global write lock still held, and [`holds`](Self::holds)
    /// keeps reporting [`LockScope::All`] for writing.
    ///
    /// # Panics
    ///
    /// Panics if `tx` holds no locks, if `keep` is [`LockScope::All`], or if
    /// `keep` names a resource `tx` does not hold for writing.
    pub fn downgrade(&self, tx: TxId, keep: impl Into<LockScope>) {
        let keep = match keep.into() {
            LockScope::All => panic!("{}", Error::GlobalDowngrade(tx)),
            LockScope::Names(keep) => keep,
        };
        let mut locks = match self.transactions.get(&tx) {
            Some(locks) => locks.clone(),
            None => panic!("{}", Error::NotRegistered(tx)),
        };

        match locks.write {
            LockScope::Names(ref write) => {
                if let Some(missing) = keep.difference(write).next() {
                    panic!(
                        "{}",
                        Error::NotWriteLocked {
                            tx,
                            resource: missing.clone(),
                        }
                    );
                }
                let shed = write.difference(&keep).cloned().collect::<BTreeSet<_>>();
                for name in &shed {
                    tracing::trace!(tx = %tx, resource = %name, "downgrade");
                    self.table.get(name).downgrade();
                }
                if let LockScope::Names(read) = &mut locks.read {
                    read.extend(shed);
                }
                if keep.is_empty() && locks.role == Role::LocalWriter {
                    self.balancer.leave(Role::LocalWriter);
                    locks.role = Role::None;
                }
                locks.write = LockScope::Names(keep);
            }
            LockScope::All => match locks.read {
                LockScope::All if keep.is_empty() => {
                    self.balancer.enter_exclusive(Role::GlobalReader);
                    locks.role = Role::GlobalReader;
                    locks.write = LockScope::none();
                    self.write_all.downgrade();
                }
                LockScope::All => {
                    tracing::debug!(tx = %tx, "reads everything, keeping global write lock");
                    return;
                }
                LockScope::Names(ref read) => {
                    // nobody else holds a resource lock, none of these block
                    for step in merge_sorted(read, &keep) {
                        match step {
                            Step::Write(name) if read.contains(name) => {
                                self.table.get(name).write();
                            }
                            Step::Write(name) => self.table.mark_used(name).write(),
                            Step::Read(name) => self.table.get(name).read(),
                        }
                    }
                    if !keep.is_empty() {
                        self.balancer.enter_exclusive(Role::LocalWriter);
                        locks.role = Role::LocalWriter;
                    }
                    locks.read = LockScope::Names(read.difference(&keep).cloned().collect());
                    locks.write = LockScope::Names(keep);
                    self.write_all.downgrade();
                }
            },
        }

        tracing::debug!(tx = %tx, read = %locks.read, write = %locks.write, "downgraded");
        self.transactions.insert(tx, locks);
    }

    /// Releases all locks of `tx` and frees its admission slot.
    ///
    /// # Panics
    ///
    /// Panics if `tx` holds no locks.
    pub fn release(&self, tx: TxId) {
        let locks = match self.transactions.remove(&tx) {
            Some((_, locks)) => locks,
            None => panic!("{}", Error::NotRegistered(tx)),
        };

        if let LockScope::Names(write) = &locks.write {
            for name in write.iter().rev() {
                let lock = self.table.get(name);
                assert!(
                    lock.is_write_locked(),
                    "impossible: {name} is not write locked by {tx}!"
                );
                lock.unlock_write();
                self.table.release_if_unused(name);
            }
        }
        if let LockScope::Names(read) = &locks.read {
            for name in read.iter().rev() {
                if !locks.global_writer() {
                    self.table.get(name).unlock_read();
                }
                self.table.release_if_unused(name);
            }
        }

        self.balancer.leave(locks.role);
        if locks.global_writer() {
            self.write_all.unlock_write();
        } else {
            self.write_all.unlock_read();
        }
        self.queue.depart();
        tracing::debug!(tx = %tx, "released");
    }

    /// Changes the admission bound. Transactions already admitted keep
    /// running; queued ones re-check against the new bound.
    pub fn set_parallel(&self, parallel: usize) -> Result<()> {
        if parallel == 0 {
            return Err(Error::InvalidValue {
                key: "parallel".to_owned(),
                value: "0".to_owned(),
            });
        }
        self.queue.set_parallel(parallel);
        Ok(())
    }

    pub fn parallel(&self) -> usize {
        self.queue.parallel()
    }

    /// Snapshot of the locks held by `tx`, if it is registered.
    pub fn holds(&self, tx: TxId) -> Option<Holds> {
        self.transactions.get(&tx).map(|locks| Holds {
            read: locks.read.clone(),
            write: locks.write.clone(),
        })
    }

    /// Number of resources with a live lock.
    pub fn resources(&self) -> usize {
        self.table.len()
    }

    /// Number of users of `name`'s lock.
    pub fn usage(&self, name: &str) -> usize {
        self.table.usage(name)
    }

    pub fn running(&self) -> usize {
        self.queue.running()
    }

    pub fn queued(&self) -> usize {
        self.queue.queued()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL)
    }
}

/// Drops the written names from the read set, and turns a global read with
/// local writes into a global write: one transaction cannot be a global
/// reader and a local writer at the same time.
fn normalize(read: LockScope, write: LockScope) -> (LockScope, LockScope) {
    match (read, write) {
        (LockScope::All, LockScope::Names(write)) if !write.is_empty() => {
            (LockScope::none(), LockScope::All)
        }
        (LockScope::Names(read), LockScope::Names(write)) => {
            let read = read.difference(&write).cloned().collect::<BTreeSet<ResourceName>>();
            (LockScope::Names(read), LockScope::Names(write))
        }
        (read, write) => (read, write),
    }
}

/// Registered transaction, released when dropped.
pub struct TransactionGuard<'a> {
    manager: &'a LockManager,
    tx: TxId,
}

impl<'a> TransactionGuard<'a> {
    pub fn tx(&self) -> TxId {
        self.tx
    }

    pub fn downgrade(&self, keep: impl Into<LockScope>) {
        self.manager.downgrade(self.tx, keep);
    }

    pub fn holds(&self) -> Holds {
        match self.manager.holds(self.tx) {
            Some(holds) => holds,
            None => panic!("{}", Error::NotRegistered(self.tx)),
        }
    }
}

impl<'a> Drop for TransactionGuard<'a> {
    fn drop(&mut self) {
        self.manager.release(self.tx);
    }
}
