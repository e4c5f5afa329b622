//! The per-rank worker thread: owns one [`Endpoint`] and processes
//! requests serially off a queue, the way one MPI rank processes one
//! task at a time.
//!
//! The thread-local rank cell and the panic-to-crash reporting guard
//! follow the same pattern as a per-block worker thread processing a
//! serial request queue.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use log::{debug, error};

use crate::endpoint::Endpoint;
use crate::field::FieldContainer;
use crate::tag::{Rank, SourceIndex, SubConfig, SubIndex, SystemConfig, Tag};

thread_local! {
    /// Rank of the worker the current thread is running. Set once at
    /// the top of the worker's message loop.
    static RANK: RefCell<Option<Rank>> = const { RefCell::new(None) };
}

/// The rank of the calling thread, if it is a worker thread.
pub fn current_rank() -> Option<Rank> {
    RANK.with(|x| *x.borrow())
}

/// `solve(endpoint, tag, subslice)`.
pub type SolveFn<P, S, F> =
    Arc<dyn Fn(&mut Endpoint<P, S, F>, Tag, Range<SourceIndex>) -> Result<(), String> + Send + Sync>;
/// `clear(endpoint, tag)` (individual) or `clear(endpoint, tag, rank)`
/// (ensemble, `rank` is `Some` and must match the callee's own rank).
pub type ClearFn<P, S, F> =
    Arc<dyn Fn(&mut Endpoint<P, S, F>, Tag, Option<Rank>) -> Result<(), String> + Send + Sync>;

/// Named callables referenced by a schedule entry — the Rust analogue
/// of `Endpoint.functions`.
pub struct FunctionRegistry<P, S, F> {
    solve: HashMap<String, SolveFn<P, S, F>>,
    clear: HashMap<String, ClearFn<P, S, F>>,
}

impl<P, S, F> FunctionRegistry<P, S, F> {
    pub fn new() -> Self {
        Self {
            solve: HashMap::new(),
            clear: HashMap::new(),
        }
    }

    pub fn register_solve(&mut self, name: impl Into<String>, f: SolveFn<P, S, F>) {
        self.solve.insert(name.into(), f);
    }

    pub fn register_clear(&mut self, name: impl Into<String>, f: ClearFn<P, S, F>) {
        self.clear.insert(name.into(), f);
    }

    pub fn solve(&self, name: &str) -> Option<SolveFn<P, S, F>> {
        self.solve.get(name).cloned()
    }

    pub fn clear(&self, name: &str) -> Option<ClearFn<P, S, F>> {
        self.clear.get(name).cloned()
    }
}

impl<P, S, F> Default for FunctionRegistry<P, S, F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Requests a worker thread can execute. Every variant carries its own
/// reply sender so the caller never blocks the worker's queue waiting
/// on a reply that hasn't been produced yet.
pub enum WorkerRequest<P, S, F> {
    SetupLocalFields {
        names: Option<Vec<String>>,
        reply: flume::Sender<Result<(), String>>,
    },
    SetupLocalSurveys {
        sub_configs: HashMap<SubIndex, SystemConfig>,
        reply: flume::Sender<()>,
    },
    SetupLocalProblem {
        sub_config: SubConfig,
        reply: flume::Sender<Result<(), String>>,
    },
    Tags {
        reply: flume::Sender<(Rank, Vec<Tag>)>,
    },
    Compute {
        tag: Tag,
        solve: SolveFn<P, S, F>,
        subslice: Range<SourceIndex>,
        reply: flume::Sender<Result<(), String>>,
    },
    Clear {
        tag: Tag,
        clear: ClearFn<P, S, F>,
        /// `Some(r)` for an ensemble clear pinned to rank `r`; the
        /// handler fails if `r` isn't this worker's own rank.
        pinned_rank: Option<Rank>,
        reply: flume::Sender<Result<(), String>>,
    },
    SetField {
        name: String,
        value: F,
        reply: flume::Sender<()>,
    },
    GetLocalField {
        name: String,
        reply: flume::Sender<Option<F>>,
    },
    SetGlobalField {
        name: String,
        value: F,
        reply: flume::Sender<()>,
    },
    GetGlobalField {
        name: String,
        reply: flume::Sender<Option<F>>,
    },
    ProbeEnv {
        reply: flume::Sender<bool>,
    },
    SetThreadCount {
        n: usize,
        reply: flume::Sender<()>,
    },
    Shutdown,
}

/// A handle to a running worker thread.
pub struct WorkerHandle<P, S, F> {
    pub rank: Rank,
    sender: flume::Sender<WorkerRequest<P, S, F>>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl<P, S, F> WorkerHandle<P, S, F>
where
    P: crate::endpoint::Problem<Survey = S> + 'static,
    S: Send + 'static,
    F: FieldContainer,
{
    /// Spawn a worker thread owning `endpoint`, processing requests
    /// serially from its queue.
    pub fn spawn(rank: Rank, mut endpoint: Endpoint<P, S, F>) -> Self {
        let (tx, rx) = flume::unbounded::<WorkerRequest<P, S, F>>();

        let join = std::thread::Builder::new()
            .name(format!("geosched-worker-{rank}"))
            .spawn(move || {
                RANK.with(|x| *x.borrow_mut() = Some(rank));
                let mut catch_panic = CatchPanic::new(move || {
                    error!("worker {rank} crashed while processing a request");
                });
                run_loop(rank, &mut endpoint, &rx);
                catch_panic.defuse();
                debug!("worker {rank} shutting down cleanly");
            })
            .expect("failed to spawn worker thread");

        Self {
            rank,
            sender: tx,
            join: Some(join),
        }
    }

    pub fn send(&self, req: WorkerRequest<P, S, F>) {
        let _ = self.sender.send(req);
    }

    /// A clone of this worker's request sender, for code that needs to
    /// address it from outside the holding [`WorkerHandle`] (e.g. a
    /// dependent-job thread spawned by [`crate::remote::JobHandle::after`]).
    pub fn sender_clone(&self) -> flume::Sender<WorkerRequest<P, S, F>> {
        self.sender.clone()
    }
}

impl<P, S, F> Drop for WorkerHandle<P, S, F> {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerRequest::Shutdown);
        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<P, S, F>(
    rank: Rank,
    endpoint: &mut Endpoint<P, S, F>,
    rx: &flume::Receiver<WorkerRequest<P, S, F>>,
) where
    P: crate::endpoint::Problem<Survey = S>,
    F: FieldContainer,
{
    while let Ok(request) = rx.recv() {
        match request {
            WorkerRequest::SetupLocalFields { names, reply } => {
                let result = endpoint
                    .setup_local_fields(names.as_deref())
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            WorkerRequest::SetupLocalSurveys { sub_configs, reply } => {
                endpoint.setup_local_surveys(&sub_configs);
                let _ = reply.send(());
            }
            WorkerRequest::SetupLocalProblem { sub_config, reply } => {
                let result = endpoint
                    .setup_local_problem(&sub_config)
                    .map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            WorkerRequest::Tags { reply } => {
                let tags = endpoint.tags().copied().collect();
                let _ = reply.send((rank, tags));
            }
            WorkerRequest::Compute {
                tag,
                solve,
                subslice,
                reply,
            } => {
                if !endpoint.has_tag(&tag) {
                    let _ = reply.send(Err(format!(
                        "worker {rank} does not host tag {tag}; affinity violation"
                    )));
                    continue;
                }
                let result = solve(endpoint, tag, subslice);
                let _ = reply.send(result);
            }
            WorkerRequest::Clear {
                tag,
                clear,
                pinned_rank,
                reply,
            } => {
                if let Some(pinned) = pinned_rank {
                    if pinned != rank {
                        let _ = reply.send(Err(format!(
                            "ensemble clear for tag {tag} pinned to rank {pinned}, not {rank}"
                        )));
                        continue;
                    }
                }
                let result = clear(endpoint, tag, pinned_rank);
                let _ = reply.send(result);
            }
            WorkerRequest::SetField { name, value, reply } => {
                endpoint.set_local_field(name, value);
                let _ = reply.send(());
            }
            WorkerRequest::GetLocalField { name, reply } => {
                let _ = reply.send(endpoint.ensure_local_field(&name).cloned());
            }
            WorkerRequest::SetGlobalField { name, value, reply } => {
                endpoint.set_global_field(name, value);
                let _ = reply.send(());
            }
            WorkerRequest::GetGlobalField { name, reply } => {
                let _ = reply.send(endpoint.global_field(&name).cloned());
            }
            WorkerRequest::ProbeEnv { reply } => {
                let has_bellwether = crate::remote::MPI_BELLWETHERS
                    .iter()
                    .any(|var| std::env::var(var).is_ok());
                let _ = reply.send(has_bellwether);
            }
            WorkerRequest::SetThreadCount { n, reply } => {
                debug!("worker {rank} set linear-algebra thread count to {n} (no-op if absent)");
                let _ = reply.send(());
            }
            WorkerRequest::Shutdown => break,
        }
    }
}

/// Call a function if this struct goes out of scope without calling
/// `defuse`, including during a panic stack-unwinding.
struct CatchPanic<F: FnOnce()> {
    /// True if the function should be called.
    primed: bool,
    /// Function to call. The `Drop` implementation moves it out.
    handler: Option<F>,
}

impl<F: FnOnce()> CatchPanic<F> {
    fn new(handler: F) -> Self {
        Self {
            primed: true,
            handler: Some(handler),
        }
    }

    /// Avoid calling the function on drop.
    fn defuse(&mut self) {
        self.primed = false;
    }
}

impl<F: FnOnce()> Drop for CatchPanic<F> {
    fn drop(&mut self) {
        if self.primed {
            (self.handler.take().unwrap())();
        }
    }
}
