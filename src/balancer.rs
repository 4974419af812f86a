use parking_lot::{Condvar, Mutex};

/// The balancer role a transaction holds, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    None,
    LocalWriter,
    GlobalReader,
}

#[derive(Default)]
struct Counters {
    local_writers: usize,
    global_readers: usize,
}

/// Keeps global readers and local writers apart.
///
/// Both hold the shared side of the global lock, so nothing else prevents a
/// transaction reading everything from running next to one writing a single
/// resource. Invariant: `local_writers == 0 || global_readers == 0`.
pub struct Balancer {
    counters: Mutex<Counters>,
    cond: Condvar,
}

impl Balancer {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            cond: Condvar::new(),
        }
    }

    /// Blocks until no transaction holds the opposite role, then takes `role`.
    pub fn enter(&self, role: Role) {
        let mut counters = self.counters.lock();
        match role {
            Role::None => {}
            Role::LocalWriter => {
                while counters.global_readers > 0 {
                    self.cond.wait(&mut counters);
                }
                counters.local_writers += 1;
            }
            Role::GlobalReader => {
                while counters.local_writers > 0 {
                    self.cond.wait(&mut counters);
                }
                counters.global_readers += 1;
            }
        }
    }

    /// Registers `role` without waiting. Only legal while the caller holds the
    /// exclusive side of the global lock, which keeps both counters at zero.
    pub fn enter_exclusive(&self, role: Role) {
        let mut counters = self.counters.lock();
        assert!(
            counters.local_writers == 0 && counters.global_readers == 0,
            "impossible: balancer roles active under a global write lock!"
        );
        match role {
            Role::None => {}
            Role::LocalWriter => counters.local_writers += 1,
            Role::GlobalReader => counters.global_readers += 1,
        }
    }

    pub fn leave(&self, role: Role) {
        let mut counters = self.counters.lock();
        match role {
            Role::None => return,
            Role::LocalWriter => {
                assert!(counters.local_writers > 0, "impossible: no local writer left!");
                counters.local_writers -= 1;
            }
            Role::GlobalReader => {
                assert!(counters.global_readers > 0, "impossible: no global reader left!");
                counters.global_readers -= 1;
            }
        }
        self.cond.notify_all();
    }

    #[cfg(test)]
    pub fn counts(&self) -> (usize, usize) {
        let counters = self.counters.lock();
        (counters.local_writers, counters.global_readers)
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new()
    }
}
