//! Lock requests as collected from operations, and reserved resource names.
//!
//! Reserved names start with [`PREFIX`], which never occurs in a database
//! name, so they cannot collide with user data.

use crate::scope::{LockScope, ResourceName};
use std::collections::BTreeSet;

pub const PREFIX: char = '%';
/// The database opened in the current context.
pub const CONTEXT: &str = "%context";
/// The documents of the currently opened database.
pub const COLLECTION: &str = "%collection";
pub const ADMIN: &str = "%admin";
pub const BACKUP: &str = "%backup";
pub const EVENT: &str = "%event";
pub const REPO: &str = "%repo";

/// A user-defined lock name, kept apart from database names.
pub fn user(name: &str) -> ResourceName {
    format!("{PREFIX}user:{name}")
}

/// Something that runs against locked resources and can tell which ones.
pub trait Operation {
    /// Adds the resources this operation reads and writes.
    fn add_locks(&self, locks: &mut LockResult);
}

/// Resources an operation needs, before they are handed to a lock manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockResult {
    pub read: BTreeSet<ResourceName>,
    pub write: BTreeSet<ResourceName>,
    /// Read everything; `read` is ignored.
    pub read_all: bool,
    /// Write everything; `write` is ignored.
    pub write_all: bool,
}

impl LockResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of<O: Operation + ?Sized>(op: &O) -> Self {
        let mut locks = Self::new();
        op.add_locks(&mut locks);
        locks
    }

    pub fn add_read(&mut self, name: impl Into<ResourceName>) -> &mut Self {
        self.read.insert(name.into());
        self
    }

    pub fn add_write(&mut self, name: impl Into<ResourceName>) -> &mut Self {
        self.write.insert(name.into());
        self
    }

    /// Adds the locks of another request, e.g. of a nested operation.
    pub fn merge(&mut self, other: &LockResult) -> &mut Self {
        self.read.extend(other.read.iter().cloned());
        self.write.extend(other.write.iter().cloned());
        self.read_all |= other.read_all;
        self.write_all |= other.write_all;
        self
    }

    /// Replaces the context names by the opened database, or drops them if
    /// no database is opened.
    pub fn resolve(&mut self, opened: Option<&str>) -> &mut Self {
        for set in [&mut self.read, &mut self.write] {
            let context = set.remove(CONTEXT) | set.remove(COLLECTION);
            if let (true, Some(db)) = (context, opened) {
                set.insert(db.to_owned());
            }
        }
        self
    }

    /// Splits into read and write scopes. A name requested for both is only
    /// kept for writing.
    pub fn into_scopes(self) -> (LockScope, LockScope) {
        let write = if self.write_all {
            LockScope::All
        } else {
            LockScope::Names(self.write)
        };
        let read = match (self.read_all, &write) {
            (true, _) => LockScope::All,
            (false, LockScope::All) => LockScope::Names(self.read),
            (false, LockScope::Names(write)) => {
                LockScope::Names(self.read.difference(write).cloned().collect())
            }
        };
        (read, write)
    }
}
