use atomic_wait::{wait, wake_all, wake_one};
use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

const WRITE_LOCKED: u32 = u32::MAX;

/// A reader/writer lock without guards.
///
/// Lock and unlock are separate calls, so a hold may outlive the stack frame
/// (and the thread) that took it. Waiting writers block new readers.
pub struct ResourceLock {
    /// Twice the number of readers, plus one if a writer is waiting.
    /// `u32::MAX` while write locked.
    state: AtomicU32,
    /// Incremented to wake up waiting writers.
    writer_wake_counter: AtomicU32,
}

impl ResourceLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            writer_wake_counter: AtomicU32::new(0),
        }
    }

    pub fn read(&self) {
        let mut s = self.state.load(Relaxed);
        loop {
            if s % 2 == 0 {
                assert!(s < WRITE_LOCKED - 2, "too many readers");
                match self.state.compare_exchange_weak(s, s + 2, Acquire, Relaxed) {
                    Ok(_) => return,
                    Err(e) => s = e,
                }
            }
            if s % 2 == 1 {
                wait(&self.state, s);
                s = self.state.load(Relaxed);
            }
        }
    }

    pub fn try_read(&self) -> bool {
        let mut s = self.state.load(Relaxed);
        while s % 2 == 0 && s < WRITE_LOCKED - 2 {
            match self.state.compare_exchange_weak(s, s + 2, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(e) => s = e,
            }
        }
        false
    }

    pub fn write(&self) {
        let mut s = self.state.load(Relaxed);
        loop {
            if s <= 1 {
                match self.state.compare_exchange(s, WRITE_LOCKED, Acquire, Relaxed) {
                    Ok(_) => return,
                    Err(e) => {
                        s = e;
                        continue;
                    }
                }
            }
            // announce ourselves so that no new readers get in
            if s % 2 == 0 {
                if let Err(e) = self.state.compare_exchange(s, s + 1, Relaxed, Relaxed) {
                    s = e;
                    continue;
                }
            }
            let w = self.writer_wake_counter.load(Acquire);
            s = self.state.load(Relaxed);
            if s >= 2 {
                wait(&self.writer_wake_counter, w);
                s = self.state.load(Relaxed);
            }
        }
    }

    pub fn try_write(&self) -> bool {
        let mut s = self.state.load(Relaxed);
        while s <= 1 {
            match self.state.compare_exchange(s, WRITE_LOCKED, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(e) => s = e,
            }
        }
        false
    }

    pub fn unlock_read(&self) {
        let s = self.state.load(Relaxed);
        assert!(s >= 2 && s != WRITE_LOCKED, "impossible: unlock an unread lock!");
        if self.state.fetch_sub(2, Release) == 3 {
            self.wake_writer();
        }
    }

    pub fn unlock_write(&self) {
        assert!(self.is_write_locked(), "impossible: unlock an unwritten lock!");
        self.state.store(0, Release);
        self.wake_writer();
        wake_all(&self.state);
    }

    /// Turns the write hold into a read hold without letting a writer in.
    pub fn downgrade(&self) {
        assert!(self.is_write_locked(), "impossible: downgrade an unwritten lock!");
        self.state.store(2, Release);
        // the waiting-writer bit is gone, writers have to announce again
        self.wake_writer();
        wake_all(&self.state);
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Relaxed) == WRITE_LOCKED
    }

    pub fn readers(&self) -> u32 {
        match self.state.load(Relaxed) {
            WRITE_LOCKED => 0,
            s => s / 2,
        }
    }

    fn wake_writer(&self) {
        self.writer_wake_counter.fetch_add(1, Release);
        wake_one(&self.writer_wake_counter);
    }
}

impl Default for ResourceLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Arc};

    #[test]
    fn test_readers_share() {
        let lock = ResourceLock::new();
        lock.read();
        assert!(lock.try_read());
        assert_eq!(lock.readers(), 2);
        assert!(!lock.try_write());
        lock.unlock_read();
        lock.unlock_read();
        assert!(lock.try_write());
        assert!(lock.is_write_locked());
        assert!(!lock.try_read());
        lock.unlock_write();
        assert_eq!(lock.readers(), 0);
    }

    #[test]
    fn test_downgrade_admits_readers_only() {
        let lock = ResourceLock::new();
        lock.write();
        lock.downgrade();
        assert!(!lock.is_write_locked());
        assert_eq!(lock.readers(), 1);
        assert!(lock.try_read());
        assert!(!lock.try_write());
        lock.unlock_read();
        lock.unlock_read();
        assert!(lock.try_write());
    }

    #[test]
    fn test_writer_after_downgrade_is_woken() {
        let lock = Arc::new(ResourceLock::new());
        lock.write();
        let writer = {
            let lock = lock.clone();
            std::thread::spawn(move || {
                lock.write();
                lock.unlock_write();
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        lock.downgrade();
        std::thread::sleep(std::time::Duration::from_millis(50));
        lock.unlock_read();
        writer.join().unwrap();
        assert_eq!(lock.readers(), 0);
        assert!(!lock.is_write_locked());
    }

    #[test]
    fn test_unlock_across_threads() {
        let lock = Arc::new(ResourceLock::new());
        lock.write();
        let other = lock.clone();
        std::thread::spawn(move || other.unlock_write())
            .join()
            .unwrap();
        assert!(lock.try_read());
    }

    #[test]
    fn test_exclusive_writers() {
        let lock = Arc::new(ResourceLock::new());
        let current = Arc::new(AtomicU32::default());
        let total = Arc::new(AtomicUsize::default());
        const N: usize = 1 << 12;
        const M: usize = 8;

        let threads = (0..M)
            .map(|i| {
                let lock = lock.clone();
                let current = current.clone();
                let total = total.clone();
                std::thread::spawn(move || {
                    for j in 0..N {
                        if (i + j) % 3 == 0 {
                            lock.write();
                            let now = current.fetch_add(1, Acquire);
                            assert_eq!(now, 0);
                            total.fetch_add(1, Relaxed);
                            current.fetch_sub(1, Release);
                            lock.unlock_write();
                        } else {
                            lock.read();
                            assert!(!lock.is_write_locked());
                            total.fetch_add(1, Relaxed);
                            lock.unlock_read();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        threads.into_iter().for_each(|t| t.join().unwrap());
        assert_eq!(total.load(Acquire), N * M);
    }

    #[test]
    #[should_panic(expected = "impossible: unlock an unwritten lock!")]
    fn test_invalid_unlock_write() {
        ResourceLock::default().unlock_write();
    }

    #[test]
    #[should_panic(expected = "impossible: unlock an unread lock!")]
    fn test_invalid_unlock_read() {
        ResourceLock::default().unlock_read();
    }

    #[test]
    #[should_panic(expected = "impossible: unlock an unread lock!")]
    fn test_unlock_read_while_written() {
        let lock = ResourceLock::new();
        lock.write();
        lock.unlock_read();
    }
}
