//! Transport selection: a collective transport (every worker reaches
//! every other worker through a shared communicator) versus a star
//! transport (the client fans a request out to each worker and folds
//! the replies itself).
//!
//! Grounded on the original source's `RemoteInterface.__init__`: the
//! bellwether environment variables and the `ranks.index(i)` reorder
//! permutation are carried over unchanged; `DEFAULT_MPI = True` is
//! kept as the default `mpi_requested` value in [`crate::config`].

/// Environment variables whose presence on every worker indicates an
/// MPI communicator is available to build a collective transport.
pub const MPI_BELLWETHERS: [&str; 2] = ["PMI_SIZE", "OMPI_UNIVERSE_SIZE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// All collectives route through a shared communicator; the root
    /// worker performs reductions locally.
    Collective,
    /// The client (this process) queries every worker directly and
    /// folds results itself.
    Star,
}

impl Transport {
    pub fn is_collective(self) -> bool {
        matches!(self, Transport::Collective)
    }
}

/// A collective transport is only selected if the caller asked for
/// one (`mpi_requested`) and *every* worker reported at least one
/// bellwether variable set. A cluster with zero workers, or any
/// worker missing the bellwether, falls back to the star transport.
pub fn select_transport(mpi_requested: bool, worker_has_bellwether: &[bool]) -> Transport {
    let mpi_safe = mpi_requested
        && !worker_has_bellwether.is_empty()
        && worker_has_bellwether.iter().all(|&has_it| has_it);

    if mpi_safe {
        Transport::Collective
    } else {
        Transport::Star
    }
}

/// The permutation that reorders workers into ascending
/// self-reported-rank order, mirroring `[ranks.index(i) for i in
/// range(len(ranks))]` from the original source. Panics if
/// `ranks_reported` isn't a permutation of `0..ranks_reported.len()`.
pub fn compute_reorder(ranks_reported: &[u32]) -> Vec<usize> {
    (0..ranks_reported.len() as u32)
        .map(|want| {
            ranks_reported
                .iter()
                .position(|&r| r == want)
                .expect("ranks_reported must be a permutation of 0..n")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collective_requires_every_worker_to_have_a_bellwether() {
        assert_eq!(select_transport(true, &[true, true, true]), Transport::Collective);
        assert_eq!(select_transport(true, &[true, false, true]), Transport::Star);
    }

    #[test]
    fn collective_is_never_selected_when_not_requested() {
        assert_eq!(select_transport(false, &[true, true]), Transport::Star);
    }

    #[test]
    fn empty_cluster_falls_back_to_star() {
        assert_eq!(select_transport(true, &[]), Transport::Star);
    }

    #[test]
    fn reorder_inverts_the_reported_rank_permutation() {
        // Worker at position 0 reported rank 2, position 1 reported
        // rank 0, position 2 reported rank 1.
        let reorder = compute_reorder(&[2, 0, 1]);
        assert_eq!(reorder, vec![1, 2, 0]);
    }

    #[test]
    fn reorder_is_identity_when_already_sorted() {
        assert_eq!(compute_reorder(&[0, 1, 2]), vec![0, 1, 2]);
    }
}
