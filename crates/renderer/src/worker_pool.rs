//! Persistent worker threads driven one pass at a time.
//!
//! # Overview
//!
//! [`WorkerPool`] owns `T` named OS threads (`cadence-worker-{i}`). Each one
//! blocks on its private event channel and wakes for one of two events:
//!
//! - [`WorkerEvent::Run`] runs the shared [`PhaseJob`] for the given pass
//!   with the worker's own index, then arrives at that pass's barrier
//! - [`WorkerEvent::Destroy`] ends the thread
//!
//! The orchestrator drives passes strictly in sequence:
//!
//! ```text
//! dispatch(P) ──► T workers run P in parallel ──► last arrival fires ──► wait_for_completion(P) returns
//! ```
//!
//! # Failure
//!
//! A job that returns an error still arrives; the first error of the pass
//! is handed back from [`wait_for_completion`](WorkerPool::wait_for_completion).
//! A job that panics arrives poisoned through an unwinding guard, and the
//! wait panics naming the pass instead of hanging.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace};

use crate::barrier::PhaseBarrier;
use crate::error::{RenderError, RenderResult};
use crate::pass::RenderPass;

/// Work order for one pass of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTicket {
    pub pass: RenderPass,
    /// Frame slot whose lanes the workers record into.
    pub frame_index: usize,
}

/// Work every worker runs for a pass, distinguished by worker index.
pub trait PhaseJob: Send + Sync + 'static {
    fn run(&self, worker: usize, ticket: PhaseTicket) -> RenderResult<()>;
}

/// Message on a worker's private channel.
#[derive(Clone, Copy, Debug)]
pub enum WorkerEvent {
    Run(PhaseTicket),
    Destroy,
}

struct PoolShared {
    barriers: [PhaseBarrier; RenderPass::COUNT],
    first_error: Mutex<Option<RenderError>>,
}

impl PoolShared {
    fn record_error(&self, worker: usize, pass: RenderPass, err: RenderError) {
        error!("Worker {} failed during the {} pass: {}", worker, pass, err);
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(RenderError::Worker {
                worker,
                pass,
                source: Box::new(err),
            });
        }
    }
}

/// Arrives at a barrier when dropped, poisoned if unwinding.
struct Arrival<'a>(&'a PhaseBarrier);

impl Drop for Arrival<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.arrive_poisoned();
        } else {
            self.0.arrive();
        }
    }
}

/// Fixed pool of worker threads.
pub struct WorkerPool {
    senders: Vec<Sender<WorkerEvent>>,
    handles: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Spawns `thread_count` workers running `job`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::InvalidConfig`] for zero threads and
    /// [`RenderError::ThreadSpawn`] if the OS refuses a thread.
    pub fn new(thread_count: usize, job: Arc<dyn PhaseJob>) -> RenderResult<Self> {
        if thread_count == 0 {
            return Err(RenderError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }

        let shared = Arc::new(PoolShared {
            barriers: std::array::from_fn(|_| PhaseBarrier::new()),
            first_error: Mutex::new(None),
        });

        let mut pool = Self {
            senders: Vec::with_capacity(thread_count),
            handles: Vec::with_capacity(thread_count),
            shared,
        };

        for index in 0..thread_count {
            let (sender, receiver) = crossbeam_channel::unbounded();
            let shared = pool.shared.clone();
            let job = job.clone();
            // On failure `pool` drops here and joins the workers spawned so far.
            let handle = std::thread::Builder::new()
                .name(format!("cadence-worker-{}", index))
                .spawn(move || worker_main(index, receiver, shared, job))?;
            pool.senders.push(sender);
            pool.handles.push(handle);
        }

        info!("Worker pool started with {} thread(s)", thread_count);
        Ok(pool)
    }

    #[inline]
    pub fn thread_count(&self) -> usize {
        self.senders.len()
    }

    /// Arms the pass barrier and wakes every worker.
    pub fn dispatch(&self, ticket: PhaseTicket) {
        let barrier = &self.shared.barriers[ticket.pass.index()];
        barrier.reset(self.senders.len());
        trace!(
            "Dispatching {} pass for frame slot {}",
            ticket.pass, ticket.frame_index
        );
        for (index, sender) in self.senders.iter().enumerate() {
            if sender.send(WorkerEvent::Run(ticket)).is_err() {
                error!("Worker {} is gone; arriving on its behalf", index);
                barrier.arrive_poisoned();
            }
        }
    }

    /// Blocks until every worker finished `pass`.
    ///
    /// # Panics
    ///
    /// Panics if a worker panicked during the pass.
    ///
    /// # Errors
    ///
    /// Returns the first error a worker reported during the pass.
    pub fn wait_for_completion(&self, pass: RenderPass) -> RenderResult<()> {
        if self.shared.barriers[pass.index()].wait().is_err() {
            panic!("a worker thread panicked during the {} pass", pass);
        }
        match self.shared.first_error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// [`dispatch`](Self::dispatch) followed by
    /// [`wait_for_completion`](Self::wait_for_completion).
    pub fn execute(&self, ticket: PhaseTicket) -> RenderResult<()> {
        self.dispatch(ticket);
        self.wait_for_completion(ticket.pass)
    }

    /// Arrivals still outstanding for a pass.
    pub fn outstanding(&self, pass: RenderPass) -> usize {
        self.shared.barriers[pass.index()].remaining()
    }
}

fn worker_main(
    index: usize,
    receiver: Receiver<WorkerEvent>,
    shared: Arc<PoolShared>,
    job: Arc<dyn PhaseJob>,
) {
    debug!("Worker {} started", index);
    for event in receiver.iter() {
        match event {
            WorkerEvent::Run(ticket) => {
                let _arrival = Arrival(&shared.barriers[ticket.pass.index()]);
                if let Err(err) = job.run(index, ticket) {
                    shared.record_error(index, ticket.pass, err);
                }
            }
            WorkerEvent::Destroy => break,
        }
    }
    debug!("Worker {} exiting", index);
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for sender in &self.senders {
            let _ = sender.send(WorkerEvent::Destroy);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("A worker thread panicked before shutdown");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records which workers ran which pass, with an optional failure.
    #[derive(Default)]
    struct RecordingJob {
        runs: Mutex<Vec<(usize, RenderPass)>>,
        in_flight: AtomicUsize,
        fail_worker: Option<usize>,
        panic_worker: Option<usize>,
    }

    impl PhaseJob for RecordingJob {
        fn run(&self, worker: usize, ticket: PhaseTicket) -> RenderResult<()> {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2 * worker as u64));
            self.runs.lock().push((worker, ticket.pass));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.panic_worker == Some(worker) {
                panic!("job panic");
            }
            if self.fail_worker == Some(worker) {
                return Err(RenderError::UnknownObject(42));
            }
            Ok(())
        }
    }

    fn ticket(pass: RenderPass) -> PhaseTicket {
        PhaseTicket {
            pass,
            frame_index: 0,
        }
    }

    #[test]
    fn test_every_worker_runs_each_pass_before_the_next() {
        let job = Arc::new(RecordingJob::default());
        let pool = WorkerPool::new(4, job.clone()).unwrap();

        for pass in RenderPass::ALL {
            pool.execute(ticket(pass)).unwrap();
            assert_eq!(job.in_flight.load(Ordering::SeqCst), 0);
            assert_eq!(pool.outstanding(pass), 0);
        }

        let runs = job.runs.lock();
        assert_eq!(runs.len(), 4 * RenderPass::COUNT);
        // Passes never interleave.
        for window in runs.windows(2) {
            assert!(window[0].1 <= window[1].1);
        }
        for pass in RenderPass::ALL {
            let mut workers: Vec<_> = runs
                .iter()
                .filter(|(_, p)| *p == pass)
                .map(|(w, _)| *w)
                .collect();
            workers.sort_unstable();
            assert_eq!(workers, vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn test_first_error_is_returned_once() {
        let job = Arc::new(RecordingJob {
            fail_worker: Some(1),
            ..RecordingJob::default()
        });
        let pool = WorkerPool::new(3, job).unwrap();

        let err = pool.execute(ticket(RenderPass::Object)).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Worker {
                worker: 1,
                pass: RenderPass::Object,
                ..
            }
        ));
        // The pool stays usable and the error is not reported twice.
        let err = pool.execute(ticket(RenderPass::Shadow)).unwrap_err();
        assert!(matches!(err, RenderError::Worker { worker: 1, .. }));
    }

    #[test]
    #[should_panic(expected = "panicked during the shadow pass")]
    fn test_worker_panic_surfaces_instead_of_hanging() {
        let job = Arc::new(RecordingJob {
            panic_worker: Some(0),
            ..RecordingJob::default()
        });
        let pool = WorkerPool::new(2, job).unwrap();
        let _ = pool.execute(ticket(RenderPass::Shadow));
    }

    #[test]
    fn test_workers_are_named() {
        struct Names(Mutex<Vec<String>>);
        impl PhaseJob for Names {
            fn run(&self, _: usize, _: PhaseTicket) -> RenderResult<()> {
                let name = std::thread::current().name().unwrap_or_default().to_owned();
                self.0.lock().push(name);
                Ok(())
            }
        }

        let names = Arc::new(Names(Mutex::new(Vec::new())));
        let pool = WorkerPool::new(2, names.clone()).unwrap();
        pool.execute(ticket(RenderPass::PostProcess)).unwrap();
        drop(pool);

        let mut names = names.0.lock().clone();
        names.sort();
        assert_eq!(names, vec!["cadence-worker-0", "cadence-worker-1"]);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let job: Arc<dyn PhaseJob> = Arc::new(RecordingJob::default());
        assert!(WorkerPool::new(0, job).is_err());
    }
}
