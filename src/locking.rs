use crate::admission::AdmissionQueue;
use crate::config::LockConfig;
use crate::error::{Error, Result};
use crate::manager::LockManager;
use crate::rwlock::ResourceLock;
use crate::scope::LockScope;
use crate::TxId;
use dashmap::{DashMap, Entry};
use std::time::{Duration, Instant};

/// Common interface of the lock managers.
pub trait Locking: Send + Sync {
    fn acquire(&self, tx: TxId, read: LockScope, write: LockScope);

    fn acquire_timeout(
        &self,
        tx: TxId,
        read: LockScope,
        write: LockScope,
        timeout: Duration,
    ) -> Result<()>;

    fn downgrade(&self, tx: TxId, keep: LockScope);

    fn release(&self, tx: TxId);
}

impl Locking for LockManager {
    fn acquire(&self, tx: TxId, read: LockScope, write: LockScope) {
        LockManager::acquire(self, tx, read, write)
    }

    fn acquire_timeout(
        &self,
        tx: TxId,
        read: LockScope,
        write: LockScope,
        timeout: Duration,
    ) -> Result<()> {
        LockManager::acquire_timeout(self, tx, read, write, timeout)
    }

    fn downgrade(&self, tx: TxId, keep: LockScope) {
        LockManager::downgrade(self, tx, keep)
    }

    fn release(&self, tx: TxId) {
        LockManager::release(self, tx)
    }
}

/// Builds the lock manager selected by `config`.
pub fn locking(config: &LockConfig) -> Result<Box<dyn Locking>> {
    config.validate()?;
    Ok(if config.global_lock {
        Box::new(ProcessLocking::new(config.parallel))
    } else {
        Box::new(LockManager::with_config(config)?)
    })
}

/// Coarse locking: transactions that write anything run alone, read-only
/// transactions run side by side. Resource names are ignored.
pub struct ProcessLocking {
    queue: AdmissionQueue,
    lock: ResourceLock,
    /// Registered transactions, `true` while holding the exclusive side.
    writers: DashMap<TxId, bool>,
}

impl ProcessLocking {
    pub fn new(parallel: usize) -> Self {
        Self {
            queue: AdmissionQueue::new(parallel),
            lock: ResourceLock::new(),
            writers: DashMap::new(),
        }
    }

    fn lock(&self, tx: TxId, write: &LockScope, deadline: Option<Instant>) -> Result<()> {
        let writer = !write.is_empty();
        match self.writers.entry(tx) {
            Entry::Occupied(_) => panic!("{}", Error::AlreadyRegistered(tx)),
            Entry::Vacant(vacant_entry) => {
                vacant_entry.insert(writer);
            }
        }
        match deadline {
            Some(deadline) => {
                if let Err(err) = self.queue.admit_until(tx, deadline) {
                    tracing::warn!(tx = %tx, "admission timed out");
                    self.writers.remove(&tx);
                    return Err(err);
                }
            }
            None => self.queue.admit(tx),
        }
        if writer {
            self.lock.write();
        } else {
            self.lock.read();
        }
        tracing::debug!(tx = %tx, writer, "process lock acquired");
        Ok(())
    }

    pub fn running(&self) -> usize {
        self.queue.running()
    }
}

impl Locking for ProcessLocking {
    fn acquire(&self, tx: TxId, _read: LockScope, write: LockScope) {
        if let Err(err) = self.lock(tx, &write, None) {
            unreachable!("admission without a deadline failed: {err}");
        }
    }

    fn acquire_timeout(
        &self,
        tx: TxId,
        _read: LockScope,
        write: LockScope,
        timeout: Duration,
    ) -> Result<()> {
        self.lock(tx, &write, Some(Instant::now() + timeout))
    }

    /// Becomes a reader once no writes are kept; otherwise the exclusive
    /// lock stays.
    fn downgrade(&self, tx: TxId, keep: LockScope) {
        if keep.is_all() {
            panic!("{}", Error::GlobalDowngrade(tx));
        }
        let mut writer = match self.writers.get_mut(&tx) {
            Some(writer) => writer,
            None => panic!("{}", Error::NotRegistered(tx)),
        };
        if let Some(name) = keep.as_names().and_then(|keep| keep.iter().next()) {
            if !*writer {
                panic!(
                    "{}",
                    Error::NotWriteLocked {
                        tx,
                        resource: name.clone(),
                    }
                );
            }
        } else if *writer {
            self.lock.downgrade();
            *writer = false;
            tracing::debug!(tx = %tx, "process lock downgraded");
        }
    }

    fn release(&self, tx: TxId) {
        let writer = match self.writers.remove(&tx) {
            Some((_, writer)) => writer,
            None => panic!("{}", Error::NotRegistered(tx)),
        };
        if writer {
            self.lock.unlock_write();
        } else {
            self.lock.unlock_read();
        }
        self.queue.depart();
        tracing::debug!(tx = %tx, "process lock released");
    }
}
