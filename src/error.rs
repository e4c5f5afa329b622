//! Error kinds recognized by the core, split by the layer that raises
//! them.

use thiserror::Error;

use crate::tag::{Rank, Tag};

/// Errors raised by [`crate::endpoint::Endpoint`] operations.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("base system config is missing the required `geom` entry")]
    MissingGeom,

    #[error("field `{0}` is not present in the configured fieldspec")]
    UnknownField(String),

    #[error("no fieldspec was configured for this endpoint")]
    MissingFieldSpec,

    #[error("no survey registered for sub-index {0}; setupLocalSurveys must run first")]
    MissingSurvey(crate::tag::SubIndex),

    #[error("tag {0} is already registered on this worker")]
    DuplicateTag(Tag),

    #[error("failed to pair problem with survey for tag {0}: {1}")]
    PairingFailed(Tag, String),

    #[error("problem or survey factory was not configured before first use")]
    MissingFactory,
}

/// Errors raised by the [`crate::remote::RemoteInterface`].
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("worker {0} is not part of the cluster")]
    UnknownWorker(Rank),

    #[error("worker {0} panicked while executing a task")]
    WorkerPanicked(Rank),

    #[error("collective operation requires at least one worker")]
    EmptyCluster,

    #[error("underlying linear-algebra library is not present, thread count request ignored")]
    ThreadControlUnavailable,

    #[error("setup on worker {0} failed: {1}")]
    SetupFailed(Rank, String),
}

/// Errors raised by the [`crate::scheduler::Scheduler`].
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler must run over a contiguous slice or the `All` sentinel")]
    NonSliceRange,

    #[error("unknown schedule entry `{0}`")]
    UnknownEntry(String),

    #[error("no worker hosts tag {0}; cannot dispatch compute/clear for it")]
    PermanentUnmetDependency(Tag),

    #[error("ensemble clear for tag {0} requires rank {1} to host it, but it does not")]
    EnsembleClearRankMismatch(Tag, Rank),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}
