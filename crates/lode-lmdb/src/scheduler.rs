//! Background transaction scheduler
//!
//! Writable work runs on one dedicated worker, in submission order, each item
//! holding the writable lane from the start of its transaction until its
//! completion returns. Readonly work is spread over a pool of reader workers
//! and runs concurrently with everything else.

use crossbeam::channel::{unbounded, Receiver, Sender};
use lode_core::{observe, LodeError, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::store::Store;
use crate::txn::Transaction;

// `None` when the scheduler can no longer run the job
type Job = Box<dyn FnOnce(Option<&Store>) + Send + 'static>;

/// Count of submitted work items whose completion has not returned yet
struct ActiveWork {
    count: AtomicUsize,
    lock: Mutex<()>,
    idle: Condvar,
}

impl ActiveWork {
    fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    fn wait_idle(&self) {
        let mut guard = self.lock.lock();
        while self.get() > 0 {
            self.idle.wait(&mut guard);
        }
    }
}

/// Keeps a work item counted as active until dropped
struct Pending(Arc<ActiveWork>);

impl Pending {
    fn new(active: Arc<ActiveWork>) -> Self {
        let now = active.count.fetch_add(1, Ordering::SeqCst) + 1;
        observe::set_active_work(now);
        Self(active)
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        let now = self.0.count.fetch_sub(1, Ordering::SeqCst) - 1;
        observe::set_active_work(now);
        if now == 0 {
            let _guard = self.0.lock.lock();
            self.0.idle.notify_all();
        }
    }
}

pub(crate) struct Scheduler {
    writer: Option<Sender<Job>>,
    readers: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    active: Arc<ActiveWork>,
}

impl Scheduler {
    pub(crate) fn start(store: Arc<Store>, reader_threads: usize) -> Result<Self> {
        let (writer_tx, writer_rx) = unbounded();
        let (readers_tx, readers_rx) = unbounded();

        let mut workers = Vec::with_capacity(reader_threads + 1);
        workers.push(spawn_worker(
            "lode-writer".to_string(),
            store.clone(),
            writer_rx,
        )?);
        for i in 0..reader_threads {
            workers.push(spawn_worker(
                format!("lode-reader-{i}"),
                store.clone(),
                readers_rx.clone(),
            )?);
        }

        tracing::debug!(reader_threads, "scheduler started");
        Ok(Self {
            writer: Some(writer_tx),
            readers: Some(readers_tx),
            workers,
            active: Arc::new(ActiveWork::new()),
        })
    }

    /// Queue `work` to run in its own outermost transaction
    ///
    /// The transaction commits when `work` returns `Ok` and no rollback was
    /// requested; otherwise it aborts. `completion` always runs exactly once,
    /// on the worker, with the outcome. Readonly items share the fixed reader
    /// pool and queue behind it when every reader is busy.
    pub(crate) fn submit<W, C>(&self, readonly: bool, work: W, completion: C)
    where
        W: FnOnce(&mut Transaction<'_>) -> Result<()> + Send + 'static,
        C: FnOnce(Result<()>) + Send + 'static,
    {
        let pending = Pending::new(self.active.clone());
        let job: Job = Box::new(move |store: Option<&Store>| {
            let _pending = pending;
            let Some(store) = store else {
                completion(Err(LodeError::EnvironmentClosed));
                return;
            };

            if readonly {
                let result = run(Transaction::begin(store, true), work);
                observe::record_work_item(true, result.is_ok());
                completion(result);
            } else {
                let _lane = store.lane();
                let result = run(Transaction::begin_in_lane(store), work);
                observe::record_work_item(false, result.is_ok());
                completion(result);
            }
        });

        let queue = if readonly { &self.readers } else { &self.writer };
        let rejected = match queue {
            Some(tx) => tx.send(job).err().map(|e| e.into_inner()),
            None => Some(job),
        };
        if let Some(job) = rejected {
            tracing::warn!(readonly, "scheduler is stopped; rejecting work");
            job(None);
        }
    }

    pub(crate) fn active_count(&self) -> usize {
        self.active.get()
    }

    /// Block until every submitted work item has completed
    ///
    /// Must not be called from inside a work item or completion.
    pub(crate) fn wait_idle(&self) {
        self.active.wait_idle();
    }

    /// Run everything already queued, then stop the workers
    pub(crate) fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Workers exit once their queue is drained and disconnected
        self.writer.take();
        self.readers.take();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().map(str::to_string);
            if worker.join().is_err() {
                tracing::error!(worker = ?name, "scheduler worker terminated abnormally");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_worker(name: String, store: Arc<Store>, jobs: Receiver<Job>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new().name(name).spawn(move || {
        for job in jobs.iter() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(Some(&*store)))) {
                tracing::error!(
                    panic_message = %panic_message(payload.as_ref()),
                    "completion handler panicked"
                );
            }
        }
    })?;
    Ok(handle)
}

fn run<W>(txn: Result<Transaction<'_>>, work: W) -> Result<()>
where
    W: FnOnce(&mut Transaction<'_>) -> Result<()>,
{
    let mut txn = txn?;
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&mut txn))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic_message = %message, "work item panicked; aborting its transaction");
            Err(LodeError::Unknown(format!("work item panicked: {message}")))
        }
    };
    txn.settle(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
