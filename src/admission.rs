use crate::error::{Error, Result};
use crate::TxId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Default)]
struct State {
    queue: VecDeque<TxId>,
    running: usize,
}

/// FIFO gate bounding the number of concurrently admitted transactions.
///
/// A transaction is admitted only once it is at the head of the queue and a
/// slot is free, even if a later arrival could already run.
pub struct AdmissionQueue {
    state: Mutex<State>,
    cond: Condvar,
    parallel: AtomicUsize,
}

impl AdmissionQueue {
    pub fn new(parallel: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
            parallel: AtomicUsize::new(parallel.max(1)),
        }
    }

    pub fn admit(&self, tx: TxId) {
        let mut state = self.state.lock();
        state.queue.push_back(tx);
        while !self.admissible(&state, tx) {
            tracing::trace!(tx = %tx, "waiting for admission");
            self.cond.wait(&mut state);
        }
        self.enter(&mut state);
    }

    /// Like [`admit`](Self::admit), but gives up at `deadline`. A transaction
    /// that gives up leaves the queue and holds no slot.
    pub fn admit_until(&self, tx: TxId, deadline: Instant) -> Result<()> {
        let mut state = self.state.lock();
        state.queue.push_back(tx);
        while !self.admissible(&state, tx) {
            if self.cond.wait_until(&mut state, deadline).timed_out()
                && !self.admissible(&state, tx)
            {
                state.queue.retain(|queued| *queued != tx);
                // the head may have changed
                self.cond.notify_all();
                return Err(Error::Timeout(tx));
            }
        }
        self.enter(&mut state);
        Ok(())
    }

    pub fn depart(&self) {
        let mut state = self.state.lock();
        assert!(state.running > 0, "impossible: depart without admission!");
        state.running -= 1;
        self.cond.notify_all();
    }

    /// Changes the admission bound; queued transactions re-check at once.
    pub fn set_parallel(&self, parallel: usize) {
        let _state = self.state.lock();
        self.parallel.store(parallel.max(1), Ordering::Release);
        self.cond.notify_all();
    }

    pub fn parallel(&self) -> usize {
        self.parallel.load(Ordering::Acquire)
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn admissible(&self, state: &State, tx: TxId) -> bool {
        state.running < self.parallel() && state.queue.front() == Some(&tx)
    }

    fn enter(&self, state: &mut State) {
        state.queue.pop_front();
        state.running += 1;
        // the next in line may fit into a free slot as well
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::time::Duration;

    #[test]
    fn test_bound() {
        let queue = AdmissionQueue::new(2);
        queue.admit(TxId::from(1));
        queue.admit(TxId::from(2));
        assert_eq!(queue.running(), 2);
        let err = queue
            .admit_until(TxId::from(3), Instant::now() + Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(tx) if tx == TxId::from(3)));
        assert_eq!(queue.queued(), 0);
        queue.depart();
        queue
            .admit_until(TxId::from(3), Instant::now() + Duration::from_millis(20))
            .unwrap();
        assert_eq!(queue.running(), 2);
    }

    #[test]
    fn test_fifo_order() {
        let queue = Arc::new(AdmissionQueue::new(1));
        queue.admit(TxId::from(0));

        let (sender, receiver) = mpsc::channel();
        let threads = (1..=3u64)
            .map(|i| {
                let thread_queue = queue.clone();
                let sender = sender.clone();
                let thread = std::thread::spawn(move || {
                    thread_queue.admit(TxId::from(i));
                    sender.send(i).unwrap();
                    std::thread::sleep(Duration::from_millis(10));
                    thread_queue.depart();
                });
                // make the arrival order deterministic
                while queue.queued() < i as usize {
                    std::thread::yield_now();
                }
                thread
            })
            .collect::<Vec<_>>();

        queue.depart();
        threads.into_iter().for_each(|t| t.join().unwrap());
        let order = receiver.try_iter().collect::<Vec<_>>();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_raise_parallel_wakes_waiters() {
        let queue = Arc::new(AdmissionQueue::new(1));
        queue.admit(TxId::from(1));
        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.admit(TxId::from(2)))
        };
        while queue.queued() == 0 {
            std::thread::yield_now();
        }
        queue.set_parallel(2);
        waiter.join().unwrap();
        assert_eq!(queue.running(), 2);
        assert_eq!(queue.parallel(), 2);
    }
}
