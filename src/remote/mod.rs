//! The remote interface: collective and point-to-point operations
//! over a cluster of worker threads.
//!
//! Follows a typed-dispatch bootstrap shape (a request enum per worker
//! rather than a symbolic namespace) for the framing layer, and
//! `SimPEG`'s `RemoteInterface` for the exact semantics of every
//! collective.

pub mod transport;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::{Condvar, Mutex};

pub use transport::{Transport, MPI_BELLWETHERS};

use crate::endpoint::{Endpoint, Problem};
use crate::error::RemoteError;
use crate::field::{FieldContainer, MergedField};
use crate::tag::{Rank, SourceIndex, SubConfig, SubIndex, SystemConfig, Tag};
use crate::worker::{ClearFn, FunctionRegistry, SolveFn, WorkerHandle, WorkerRequest};

/// An elementwise binary operator usable with
/// [`RemoteInterface::remote_op_gather_first`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOp {
    Add,
    Sub,
    Mul,
}

impl GatherOp {
    fn apply<F: FieldContainer>(self, a: &F, b: &F) -> F {
        match self {
            GatherOp::Add => a.add(b),
            GatherOp::Sub => a.sub(b),
            GatherOp::Mul => a.mul(b),
        }
    }
}

struct JobInner {
    done: Mutex<Option<bool>>,
    condvar: Condvar,
}

/// A handle to an asynchronously-running unit of work, cloneable and
/// pollable without consuming it — the Rust analogue of an
/// `ipyparallel` `AsyncResult`.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl JobHandle {
    fn pair() -> (JobHandle, JobCompleter) {
        let inner = Arc::new(JobInner {
            done: Mutex::new(None),
            condvar: Condvar::new(),
        });
        (
            JobHandle {
                inner: inner.clone(),
            },
            JobCompleter { inner },
        )
    }

    /// A handle that is already resolved — used for graph nodes that
    /// never actually dispatch work (e.g. `Begin`).
    pub fn resolved(ok: bool) -> Self {
        let (handle, completer) = Self::pair();
        completer.complete(ok);
        handle
    }

    /// `None` while pending, `Some(true)`/`Some(false)` once settled.
    pub fn poll(&self) -> Option<bool> {
        *self.inner.done.lock()
    }

    /// Block until the job completes, returning whether it succeeded.
    pub fn wait(&self) -> bool {
        let mut guard = self.inner.done.lock();
        while guard.is_none() {
            self.inner.condvar.wait(&mut guard);
        }
        guard.unwrap()
    }

    /// Spawn a dependent job: waits for every handle in `deps` to
    /// settle, fails immediately without running `task` if any
    /// dependency failed, otherwise runs `task` and adopts its
    /// result. This is the happens-after relation an ensemble clear
    /// needs against compute jobs that may live on other workers.
    pub fn after(deps: Vec<JobHandle>, task: impl FnOnce() -> JobHandle + Send + 'static) -> JobHandle {
        let (handle, completer) = Self::pair();
        std::thread::spawn(move || {
            let all_ok = deps.iter().all(|d| d.wait());
            if !all_ok {
                completer.complete(false);
                return;
            }
            let inner = task();
            completer.complete(inner.wait());
        });
        handle
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle").field("status", &self.poll()).finish()
    }
}

struct JobCompleter {
    inner: Arc<JobInner>,
}

impl JobCompleter {
    fn complete(self, ok: bool) {
        *self.inner.done.lock() = Some(ok);
        self.inner.condvar.notify_all();
    }
}

/// The cluster-wide remote interface: bootstraps a worker per rank,
/// picks a transport, and exposes the collective operations for
/// combining per-rank field buffers into a global result.
pub struct RemoteInterface<P, S, F> {
    workers: Vec<WorkerHandle<P, S, F>>,
    transport: Transport,
    functions: Arc<FunctionRegistry<P, S, F>>,
    endpoint_name: String,
}

impl<P, S, F> RemoteInterface<P, S, F>
where
    P: Problem<Survey = S> + 'static,
    S: Send + 'static,
    F: FieldContainer,
{
    /// Spawn one worker per endpoint and select a transport by probing
    /// every worker for an MPI bellwether environment variable.
    pub fn bootstrap(
        endpoints: Vec<Endpoint<P, S, F>>,
        mpi_requested: bool,
        n_threads: usize,
        functions: FunctionRegistry<P, S, F>,
        endpoint_name: impl Into<String>,
    ) -> Self {
        let workers: Vec<_> = endpoints
            .into_iter()
            .enumerate()
            .map(|(rank, ep)| WorkerHandle::spawn(rank as Rank, ep))
            .collect();

        let bellwethers = Self::probe_bellwethers(&workers);
        let transport = transport::select_transport(mpi_requested, &bellwethers);
        info!(
            "bootstrapped {} worker(s) using {:?} transport",
            workers.len(),
            transport
        );

        let iface = Self {
            workers,
            transport,
            functions: Arc::new(functions),
            endpoint_name: endpoint_name.into(),
        };
        iface.set_thread_count(n_threads);
        iface
    }

    fn probe_bellwethers(workers: &[WorkerHandle<P, S, F>]) -> Vec<bool> {
        workers
            .iter()
            .map(|w| {
                let (tx, rx) = flume::bounded(1);
                w.send(WorkerRequest::ProbeEnv { reply: tx });
                rx.recv().unwrap_or(false)
            })
            .collect()
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_collective(&self) -> bool {
        self.transport.is_collective()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn functions(&self) -> Arc<FunctionRegistry<P, S, F>> {
        self.functions.clone()
    }

    pub fn endpoint_name(&self) -> &str {
        &self.endpoint_name
    }

    fn worker(&self, rank: Rank) -> Result<&WorkerHandle<P, S, F>, RemoteError> {
        self.workers
            .get(rank as usize)
            .ok_or(RemoteError::UnknownWorker(rank))
    }

    fn root(&self) -> Result<&WorkerHandle<P, S, F>, RemoteError> {
        self.workers.first().ok_or(RemoteError::EmptyCluster)
    }

    /// `nThreads` setter — re-applies the linear-algebra thread count
    /// to every worker. A no-op on a build with no such backend.
    pub fn set_thread_count(&self, n: usize) {
        for w in &self.workers {
            let (tx, rx) = flume::bounded(1);
            w.send(WorkerRequest::SetThreadCount { n, reply: tx });
            if rx.recv().is_err() {
                warn!("worker {} did not acknowledge thread-count change", w.rank);
            }
        }
    }

    /// `_cdSame` — ensures every worker starts from the same working
    /// directory as the client. There is no real process/filesystem
    /// boundary between workers here, so this always succeeds; kept as
    /// a named operation so a caller's bootstrap sequence reads the
    /// same as the original's.
    pub fn sync_directory(&self) -> bool {
        true
    }

    // ---- setup ---------------------------------------------------

    pub fn setup_local_fields(&self, rank: Rank, names: Option<Vec<String>>) -> Result<(), RemoteError> {
        let worker = self.worker(rank)?;
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::SetupLocalFields { names, reply: tx });
        rx.recv()
            .map_err(|_| RemoteError::WorkerPanicked(rank))?
            .map_err(|e| RemoteError::SetupFailed(rank, e))
    }

    pub fn setup_local_surveys(&self, rank: Rank, sub_configs: HashMap<SubIndex, SystemConfig>) -> Result<(), RemoteError> {
        let worker = self.worker(rank)?;
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::SetupLocalSurveys { sub_configs, reply: tx });
        rx.recv().map_err(|_| RemoteError::WorkerPanicked(rank))
    }

    pub fn setup_local_problem(&self, rank: Rank, sub_config: SubConfig) -> Result<(), RemoteError> {
        let worker = self.worker(rank)?;
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::SetupLocalProblem { sub_config, reply: tx });
        rx.recv()
            .map_err(|_| RemoteError::WorkerPanicked(rank))?
            .map_err(|e| RemoteError::SetupFailed(rank, e))
    }

    /// Discover which tags every worker currently hosts.
    pub fn tags_by_worker(&self) -> Result<HashMap<Rank, Vec<Tag>>, RemoteError> {
        let mut out = HashMap::new();
        for w in &self.workers {
            let (tx, rx) = flume::bounded(1);
            w.send(WorkerRequest::Tags { reply: tx });
            let (rank, tags) = rx.recv().map_err(|_| RemoteError::WorkerPanicked(w.rank))?;
            out.insert(rank, tags);
        }
        Ok(out)
    }

    // ---- task dispatch (explicit placement) -----------------------

    /// Submit a compute task directly to the rank that hosts `tag`.
    pub fn submit_compute(
        &self,
        rank: Rank,
        tag: Tag,
        solve: SolveFn<P, S, F>,
        subslice: Range<SourceIndex>,
    ) -> Result<JobHandle, RemoteError> {
        let worker = self.worker(rank)?;
        let (handle, completer) = JobHandle::pair();
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::Compute {
            tag,
            solve,
            subslice,
            reply: tx,
        });
        std::thread::spawn(move || {
            let ok = matches!(rx.recv(), Ok(Ok(())));
            completer.complete(ok);
        });
        Ok(handle)
    }

    /// Submit an individual clear: happens-after is free here because
    /// the worker's queue is FIFO, so submitting the clear right after
    /// its compute job on the same worker is sufficient ordering.
    pub fn submit_clear_individual(&self, rank: Rank, tag: Tag, clear: ClearFn<P, S, F>) -> Result<JobHandle, RemoteError> {
        let worker = self.worker(rank)?;
        let (handle, completer) = JobHandle::pair();
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::Clear {
            tag,
            clear,
            pinned_rank: None,
            reply: tx,
        });
        std::thread::spawn(move || {
            let ok = matches!(rx.recv(), Ok(Ok(())));
            completer.complete(ok);
        });
        Ok(handle)
    }

    /// Submit an ensemble clear pinned to `rank`, deferred until every
    /// job in `deps` (typically every compute job for `tag` across the
    /// whole cluster) has settled.
    pub fn submit_clear_ensemble(
        &self,
        rank: Rank,
        tag: Tag,
        clear: ClearFn<P, S, F>,
        deps: Vec<JobHandle>,
    ) -> Result<JobHandle, RemoteError> {
        let worker = self.worker(rank)?;
        let sender = worker_sender(worker);
        Ok(JobHandle::after(deps, move || {
            let (handle, completer) = JobHandle::pair();
            let (tx, rx) = flume::bounded(1);
            let _ = sender.send(WorkerRequest::Clear {
                tag,
                clear,
                pinned_rank: Some(rank),
                reply: tx,
            });
            let ok = matches!(rx.recv(), Ok(Ok(())));
            completer.complete(ok);
            handle
        }))
    }

    // ---- symbolic-namespace collectives ---------------------------

    /// `__setitem__` — broadcast a value to every worker's local
    /// namespace under `name`.
    pub fn set(&self, name: &str, value: F) -> Result<(), RemoteError> {
        if self.workers.is_empty() {
            return Err(RemoteError::EmptyCluster);
        }
        for w in &self.workers {
            let (tx, rx) = flume::bounded(1);
            w.send(WorkerRequest::SetField {
                name: name.to_string(),
                value: value.clone(),
                reply: tx,
            });
            rx.recv().map_err(|_| RemoteError::WorkerPanicked(w.rank))?;
        }
        Ok(())
    }

    /// `__getitem__` — gather one value per worker, in rank order.
    pub fn get(&self, name: &str) -> Result<Vec<F>, RemoteError> {
        self.gather_local(name)
    }

    fn gather_local(&self, name: &str) -> Result<Vec<F>, RemoteError> {
        if self.workers.is_empty() {
            return Err(RemoteError::EmptyCluster);
        }
        self.workers
            .iter()
            .map(|w| {
                let (tx, rx) = flume::bounded(1);
                w.send(WorkerRequest::GetLocalField {
                    name: name.to_string(),
                    reply: tx,
                });
                rx.recv()
                    .map_err(|_| RemoteError::WorkerPanicked(w.rank))?
                    .ok_or(RemoteError::WorkerPanicked(w.rank))
            })
            .collect()
    }

    fn local_on(&self, worker: &WorkerHandle<P, S, F>, name: &str) -> Result<F, RemoteError> {
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::GetLocalField {
            name: name.to_string(),
            reply: tx,
        });
        rx.recv()
            .map_err(|_| RemoteError::WorkerPanicked(worker.rank))?
            .ok_or(RemoteError::WorkerPanicked(worker.rank))
    }

    fn set_local_on(&self, worker: &WorkerHandle<P, S, F>, name: &str, value: F) -> Result<(), RemoteError> {
        let (tx, rx) = flume::bounded(1);
        worker.send(WorkerRequest::SetField {
            name: name.to_string(),
            value,
            reply: tx,
        });
        rx.recv().map_err(|_| RemoteError::WorkerPanicked(worker.rank))
    }

    /// `reduce(key)` — sum of every worker's local value for `key`.
    /// The transport doesn't change the result, only where the sum
    /// conceptually happens (root-side under a collective transport,
    /// client-side under a star transport) — both must be
    /// byte-identical, which is exercised directly by a test.
    pub fn reduce(&self, name: &str) -> Result<F, RemoteError> {
        let values = self.gather_local(name)?;
        fold_add(values)
    }

    /// `reduceMul(key1, key2, axis?)`.
    pub fn reduce_mul(&self, key1: &str, key2: &str, axis: Option<usize>) -> Result<F, RemoteError> {
        let a = self.reduce(key1)?;
        let b = self.reduce(key2)?;
        let product = a.mul(&b);
        Ok(match axis {
            Some(ax) => product.sum_axis(Some(ax)),
            None => product,
        })
    }

    /// `remoteDifference(key1, key2, keyResult)` — reduces both keys
    /// then broadcasts `reduce(key1) - reduce(key2)` to every worker.
    pub fn remote_difference(&self, key1: &str, key2: &str, result_key: &str) -> Result<(), RemoteError> {
        let a = self.reduce(key1)?;
        let b = self.reduce(key2)?;
        self.set(result_key, a.sub(&b))
    }

    /// `remoteOpGatherFirst(op, key1, key2, keyResult)` — reduces
    /// `key1` but takes `key2` straight from the root worker's local
    /// value (mirrors "any arbitrary worker has this information").
    pub fn remote_op_gather_first(&self, op: GatherOp, key1: &str, key2: &str, result_key: &str) -> Result<(), RemoteError> {
        let reduced1 = self.reduce(key1)?;
        let local2 = self.local_on(self.root()?, key2)?;
        self.set(result_key, op.apply(&reduced1, &local2))
    }

    pub fn remote_difference_gather_first(&self, key1: &str, key2: &str, result_key: &str) -> Result<(), RemoteError> {
        self.remote_op_gather_first(GatherOp::Sub, key1, key2, result_key)
    }

    /// `remoteSrcEst(keyResult, key1, key2, individual)`:
    /// `S = (conj(key2) * reduce(key1)) / (conj(reduce(key1)) * reduce(key1))`,
    /// the inner product over all axes when `individual` is false, or
    /// over all-but-the-first axis when true.
    pub fn remote_src_est(&self, result_key: &str, key1: &str, key2: &str, individual: bool) -> Result<(), RemoteError> {
        let item1 = self.reduce(key1)?;
        let item2 = self.local_on(self.root()?, key2)?;

        let axis = if individual { Some(1) } else { None };
        let numerator = item2.conj().mul(&item1).sum_axis(axis);
        let denominator = item1.conj().mul(&item1).sum_axis(axis);
        self.set(result_key, numerator.div(&denominator))
    }

    /// `remoteApplySrc(keyData, keySrc)` — in place on every worker,
    /// `keyData = keySrc * keyData`, both read from the same worker's
    /// own local namespace (no reduction).
    pub fn remote_apply_src(&self, data_key: &str, src_key: &str) -> Result<(), RemoteError> {
        for w in &self.workers {
            let data = self.local_on(w, data_key)?;
            let src = self.local_on(w, src_key)?;
            self.set_local_on(w, data_key, src.mul(&data))?;
        }
        Ok(())
    }

    /// `normFromDifference(key)` — on root, `sqrt((K * conj(K)).sum(0).sum(0)).real`,
    /// read from and written back to the root's *global* namespace
    /// (the slot `reduceLB` populates), then wrapped via
    /// [`FieldContainer::merge`] and keyed by `tag` — the subproblem
    /// this norm was computed for — rather than returned bare, matching
    /// the original's `CommonReducer`-wrapped result.
    pub fn norm_from_difference(&self, tag: Tag, name: &str) -> Result<MergedField<F>, RemoteError> {
        let root = self.root()?;
        let (tx, rx) = flume::bounded(1);
        root.send(WorkerRequest::GetGlobalField {
            name: name.to_string(),
            reply: tx,
        });
        let value = rx
            .recv()
            .map_err(|_| RemoteError::WorkerPanicked(root.rank))?
            .ok_or(RemoteError::WorkerPanicked(root.rank))?;

        let energy = value.mul(&value.conj()).sum_axis(Some(0)).sum_axis(Some(0));
        let norm = energy.sqrt().real();
        Ok(F::merge([(tag, norm)]))
    }

    /// `reduceLB(endpoint, key, after=None)`. The distilled open
    /// question ("callers must not invoke it without collective
    /// transport, or provide a star-mode fallback") is resolved with a
    /// fallback: under either transport this folds every worker's
    /// local value for `name` and stores the result into the root's
    /// global namespace, so downstream reads (e.g.
    /// [`RemoteInterface::norm_from_difference`]) work the same way
    /// regardless of which transport bootstrapped.
    pub fn reduce_lb(&self, name: &str) -> Result<(), RemoteError> {
        let reduced = self.reduce(name)?;
        let root = self.root()?;
        let (tx, rx) = flume::bounded(1);
        root.send(WorkerRequest::SetGlobalField {
            name: name.to_string(),
            value: reduced,
            reply: tx,
        });
        rx.recv().map_err(|_| RemoteError::WorkerPanicked(root.rank))
    }
}

fn fold_add<F: FieldContainer>(values: Vec<F>) -> Result<F, RemoteError> {
    let mut it = values.into_iter();
    let first = it.next().ok_or(RemoteError::EmptyCluster)?;
    Ok(it.fold(first, |acc, v| acc.add(&v)))
}

fn worker_sender<P, S, F>(worker: &WorkerHandle<P, S, F>) -> flume::Sender<WorkerRequest<P, S, F>> {
    worker.sender_clone()
}
