use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("Process group aborted by rank {rank}")]
    GroupAborted { rank: usize },
    #[error("Expected {expected} send buffers (one per process), got {got}")]
    InvalidSendCount { expected: usize, got: usize },
}

/// Counters of the point-to-point traffic a process has sent since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Number of non-empty messages sent to other processes.
    pub messages: usize,
    /// Number of values carried by those messages.
    pub values: usize,
}

impl Traffic {
    fn record(&mut self, send: &[Vec<f64>], own_rank: usize) {
        for (dest, buffer) in send.iter().enumerate() {
            if dest != own_rank && !buffer.is_empty() {
                self.messages += 1;
                self.values += buffer.len();
            }
        }
    }
}

/// Collective communication among a fixed group of cooperating processes.
///
/// Every collective method must be called by all processes of the group in the
/// same order. Once any process aborts the group, every pending and future
/// collective call returns [`CommError::GroupAborted`].
pub trait Communicator {
    /// This process's index within the group, in `0..size()`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Whether this process is the master (rank 0).
    fn is_master(&self) -> bool {
        self.rank() == 0
    }

    /// Blocks until every process of the group has entered the barrier.
    fn barrier(&self) -> Result<(), CommError>;

    /// Gathers one value from every process, returned in rank order on every process.
    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, CommError>;

    /// Sends `send[dest]` to every process `dest` and returns the buffers received,
    /// indexed by source rank.
    fn alltoallv_f64(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, CommError>;

    /// Aborts the whole group. Never blocks.
    fn abort(&self);

    /// The traffic sent by this process since the last [`Communicator::reset_buffers`].
    fn traffic(&self) -> Traffic;

    /// Releases communication scratch state accumulated by earlier exchanges.
    fn reset_buffers(&self);
}

/// The trivial group of a single process.
#[derive(Debug, Default)]
pub struct SerialComm {
    traffic: Cell<Traffic>,
}

impl SerialComm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), CommError> {
        Ok(())
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        Ok(vec![value])
    }

    fn alltoallv_f64(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, CommError> {
        if send.len() != 1 {
            return Err(CommError::InvalidSendCount {
                expected: 1,
                got: send.len(),
            });
        }
        Ok(send)
    }

    fn abort(&self) {}

    fn traffic(&self) -> Traffic {
        self.traffic.get()
    }

    fn reset_buffers(&self) {
        self.traffic.set(Traffic::default());
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: Option<usize>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<BarrierState>,
    wakeup: Condvar,
    gather: Mutex<Vec<u64>>,
    /// Indexed `[dest][src]`.
    mailbox: Mutex<Vec<Vec<Vec<f64>>>>,
}

/// One member of an in-process group whose processes are threads.
///
/// Created by [`ProcessGroup::run`]; each thread receives its own handle.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
    traffic: Cell<Traffic>,
}

impl ThreadComm {
    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, CommError> {
        mutex.lock().map_err(|_| self.aborted_by_panic())
    }

    fn aborted_by_panic(&self) -> CommError {
        let rank = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .aborted
            .unwrap_or(self.rank);
        CommError::GroupAborted { rank }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        let mut state = self.lock(&self.shared.state)?;
        if let Some(rank) = state.aborted {
            return Err(CommError::GroupAborted { rank });
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.shared.size {
            state.arrived = 0;
            state.generation += 1;
            self.shared.wakeup.notify_all();
            return Ok(());
        }
        while state.generation == generation {
            if let Some(rank) = state.aborted {
                return Err(CommError::GroupAborted { rank });
            }
            state = self
                .shared
                .wakeup
                .wait(state)
                .map_err(|_| CommError::GroupAborted { rank: self.rank })?;
        }
        Ok(())
    }

    fn allgather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        self.lock(&self.shared.gather)?[self.rank] = value;
        self.barrier()?;
        let values = self.lock(&self.shared.gather)?.clone();
        // Nobody may overwrite its slot before every process has read.
        self.barrier()?;
        Ok(values)
    }

    fn alltoallv_f64(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>, CommError> {
        if send.len() != self.shared.size {
            return Err(CommError::InvalidSendCount {
                expected: self.shared.size,
                got: send.len(),
            });
        }
        let mut traffic = self.traffic.get();
        traffic.record(&send, self.rank);
        self.traffic.set(traffic);

        {
            let mut mailbox = self.lock(&self.shared.mailbox)?;
            for (dest, buffer) in send.into_iter().enumerate() {
                mailbox[dest][self.rank] = buffer;
            }
        }
        self.barrier()?;
        let received = {
            let mut mailbox = self.lock(&self.shared.mailbox)?;
            mailbox[self.rank].iter_mut().map(std::mem::take).collect()
        };
        self.barrier()?;
        Ok(received)
    }

    fn abort(&self) {
        let mut state = self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.aborted.is_none() {
            error!(rank = self.rank, "Aborting process group");
            state.aborted = Some(self.rank);
        }
        self.shared.wakeup.notify_all();
    }

    fn traffic(&self) -> Traffic {
        self.traffic.get()
    }

    fn reset_buffers(&self) {
        self.traffic.set(Traffic::default());
    }
}

/// Runs a closure on a fixed-size group of threads acting as cooperating processes.
pub struct ProcessGroup;

impl ProcessGroup {
    /// Runs `task` once per rank, each on its own thread with its own [`ThreadComm`].
    ///
    /// If any rank returns an error or panics, the group is aborted so that the
    /// remaining ranks fail out of their collective calls instead of deadlocking.
    ///
    /// # Arguments
    ///
    /// * `size` - The number of processes in the group.
    /// * `task` - The work every process performs.
    ///
    /// # Return
    ///
    /// The result of every rank, in rank order.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic of any rank after all threads have finished.
    pub fn run<T, E, F>(size: usize, task: F) -> Vec<Result<T, E>>
    where
        T: Send,
        E: Send,
        F: Fn(&ThreadComm) -> Result<T, E> + Sync,
    {
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(BarrierState::default()),
            wakeup: Condvar::new(),
            gather: Mutex::new(vec![0; size]),
            mailbox: Mutex::new(vec![vec![Vec::new(); size]; size]),
        });
        debug!(size, "Starting process group");

        let outcomes: Vec<thread::Result<Result<T, E>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = ThreadComm {
                        rank,
                        shared: Arc::clone(&shared),
                        traffic: Cell::new(Traffic::default()),
                    };
                    let task = &task;
                    scope.spawn(move || {
                        match panic::catch_unwind(AssertUnwindSafe(|| task(&comm))) {
                            Ok(result) => {
                                if result.is_err() {
                                    comm.abort();
                                }
                                result
                            }
                            Err(payload) => {
                                comm.abort();
                                panic::resume_unwind(payload)
                            }
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join()).collect()
        });

        let mut results = Vec::with_capacity(size);
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(payload) => panic::resume_unwind(payload),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_comm_is_a_group_of_one() {
        let comm = SerialComm::new();
        assert!(comm.is_master());
        assert_eq!(comm.allgather_u64(7).unwrap(), vec![7]);
        assert_eq!(comm.alltoallv_f64(vec![vec![1.0]]).unwrap(), vec![vec![1.0]]);
        assert_eq!(comm.traffic(), Traffic::default());
    }

    #[test]
    fn allgather_returns_values_in_rank_order() {
        let results = ProcessGroup::run(4, |comm| comm.allgather_u64(10 * comm.rank() as u64));
        for result in results {
            assert_eq!(result.unwrap(), vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn alltoallv_delivers_by_source_and_counts_traffic() {
        let results = ProcessGroup::run(3, |comm| {
            let send = (0..comm.size())
                .map(|dest| vec![(comm.rank() * 10 + dest) as f64; dest + 1])
                .collect();
            let received = comm.alltoallv_f64(send)?;
            let traffic = comm.traffic();
            comm.reset_buffers();
            Ok::<_, CommError>((received, traffic, comm.traffic()))
        });
        for (rank, result) in results.into_iter().enumerate() {
            let (received, traffic, after_reset) = result.unwrap();
            for (src, buffer) in received.iter().enumerate() {
                assert_eq!(buffer, &vec![(src * 10 + rank) as f64; rank + 1]);
            }
            assert_eq!(traffic.messages, 2);
            assert_eq!(traffic.values, (1 + 2 + 3) - (rank + 1));
            assert_eq!(after_reset, Traffic::default());
        }
    }

    #[test]
    fn repeated_barriers_do_not_deadlock() {
        let results = ProcessGroup::run(5, |comm| {
            for _ in 0..50 {
                comm.barrier()?;
            }
            Ok::<_, CommError>(())
        });
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn an_error_on_one_rank_aborts_the_others() {
        let results = ProcessGroup::run(3, |comm| {
            if comm.rank() == 1 {
                return Err(CommError::InvalidSendCount {
                    expected: 0,
                    got: 0,
                });
            }
            comm.barrier()
        });
        assert!(matches!(results[1], Err(CommError::InvalidSendCount { .. })));
        assert_eq!(results[0], Err(CommError::GroupAborted { rank: 1 }));
        assert_eq!(results[2], Err(CommError::GroupAborted { rank: 1 }));
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn a_panic_on_one_rank_is_re_raised_after_aborting() {
        let _ = ProcessGroup::run(2, |comm| {
            if comm.rank() == 0 {
                panic!("boom");
            }
            comm.barrier()
        });
    }
}
