//! `geosched`: scheduler, remote interface and endpoint core for a
//! distributed geophysical forward/inverse-modeling cluster.
//!
//! The crate wires three pieces together: an [`endpoint::Endpoint`]
//! holds the per-rank state (local problems, local/global field
//! buffers), a [`remote::RemoteInterface`] bootstraps one worker
//! thread per rank and exposes the cluster-wide collective operations,
//! and a [`scheduler::Scheduler`] turns a named [`scheduler::Schedule`]
//! entry into a [`graph::SystemGraph`] of dispatched jobs.
//!
//! A minimal run looks like:
//!
//! ```ignore
//! use geosched::prelude::*;
//!
//! let endpoints = vec![/* one Endpoint per rank */];
//! let remote = Arc::new(RemoteInterface::bootstrap(
//!     endpoints, true, 1, registry, "demo",
//! ));
//! let scheduler = Scheduler::new(remote, total_sources, PartitionPolicy::default());
//! let graph = scheduler.run(&schedule, "forward", ScheduleRequest::All)?;
//! scheduler.wait(&graph);
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod field;
pub mod graph;
pub mod partition;
pub mod remote;
pub mod scheduler;
pub mod tag;
pub mod worker;

/// Common imports for a caller wiring up a cluster.
pub mod prelude {
    pub use crate::config::{ClusterConfig, ProblemConfig};
    pub use crate::endpoint::{Endpoint, FieldSpec, PrototypeFieldSpec, Problem};
    pub use crate::error::{EndpointError, RemoteError, SchedulerError};
    pub use crate::field::{DenseField, FieldContainer, MergedField};
    pub use crate::graph::SystemGraph;
    pub use crate::remote::{JobHandle, RemoteInterface, Transport};
    pub use crate::scheduler::{PartitionPolicy, Schedule, ScheduleEntry, ScheduleRequest, Scheduler};
    pub use crate::tag::{Rank, SourceIndex, SubConfig, Tag};
    pub use crate::worker::{ClearFn, FunctionRegistry, SolveFn};
}
