//! The scheduler: discovers which workers host which tags, partitions
//! the source range, dispatches compute/clear tasks with explicit
//! affinity, and wires the System Graph.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

use log::debug;

use crate::endpoint::Problem;
use crate::error::SchedulerError;
use crate::field::FieldContainer;
use crate::graph::{NodeData, SystemGraph};
use crate::partition;
use crate::remote::{JobHandle, RemoteInterface};
use crate::tag::{Rank, SourceIndex, Tag};

/// A named, schedulable operation: which callables to run and which
/// keys to fold at the end.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub solve: String,
    pub clear: String,
    pub reduce: Vec<String>,
}

pub type Schedule = HashMap<String, ScheduleEntry>;

/// `isrcs` in the original: either an explicit contiguous range, or
/// `All`, standing in for the Python source's `isrcs = None ->
/// slice(None)` sentinel resolved against the scheduler's configured
/// total source count.
#[derive(Debug, Clone)]
pub enum ScheduleRequest {
    Range(Range<SourceIndex>),
    All,
}

/// `chunksPerWorker`/`ensembleClear` — the two problem-level knobs
/// that shape how a tag's work gets partitioned and cleared.
#[derive(Debug, Clone, Copy)]
pub struct PartitionPolicy {
    pub chunks_per_worker: usize,
    pub ensemble_clear: bool,
}

impl Default for PartitionPolicy {
    fn default() -> Self {
        Self {
            chunks_per_worker: 1,
            ensemble_clear: false,
        }
    }
}

/// Runs [`Schedule`] entries against a [`RemoteInterface`], producing a
/// [`SystemGraph`] per call and knowing how to wait for it to settle.
pub struct Scheduler<P, S, F> {
    remote: Arc<RemoteInterface<P, S, F>>,
    total_sources: usize,
    policy: PartitionPolicy,
}

impl<P, S, F> Scheduler<P, S, F>
where
    P: Problem<Survey = S> + 'static,
    S: Send + 'static,
    F: FieldContainer,
{
    pub fn new(remote: Arc<RemoteInterface<P, S, F>>, total_sources: usize, policy: PartitionPolicy) -> Self {
        Self {
            remote,
            total_sources,
            policy,
        }
    }

    fn resolve_range(&self, request: &ScheduleRequest) -> Result<Range<SourceIndex>, SchedulerError> {
        let range = match request {
            ScheduleRequest::All => 0..self.total_sources,
            ScheduleRequest::Range(r) => r.clone(),
        };
        if range.start > range.end {
            return Err(SchedulerError::NonSliceRange);
        }
        Ok(range)
    }

    /// `SystemSolver.__call__(entry, isrcs)`: build and dispatch the
    /// full graph for one schedule entry.
    pub fn run(&self, schedule: &Schedule, entry_name: &str, isrcs: ScheduleRequest) -> Result<SystemGraph, SchedulerError> {
        let isrcs = self.resolve_range(&isrcs)?;
        let entry = schedule
            .get(entry_name)
            .ok_or_else(|| SchedulerError::UnknownEntry(entry_name.to_string()))?;

        let solve_fn = self
            .remote
            .functions()
            .solve(&entry.solve)
            .ok_or_else(|| SchedulerError::UnknownEntry(entry.solve.clone()))?;
        let clear_fn = self
            .remote
            .functions()
            .clear(&entry.clear)
            .ok_or_else(|| SchedulerError::UnknownEntry(entry.clear.clone()))?;

        let tags_by_worker = self.remote.tags_by_worker()?;
        let mut tags: Vec<Tag> = tags_by_worker
            .values()
            .flat_map(|t| t.iter().copied())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        tags.sort();

        let mut graph = SystemGraph::new();
        let begin = graph.add_node(NodeData::new("Begin"));

        let mut tail_nodes = Vec::new();
        let mut all_clear_jobs = Vec::new();

        for tag in tags {
            let mut hosting_ranks: Vec<Rank> = tags_by_worker
                .iter()
                .filter(|(_, tags)| tags.contains(&tag))
                .map(|(&rank, _)| rank)
                .collect();
            hosting_ranks.sort();

            if hosting_ranks.is_empty() {
                return Err(SchedulerError::PermanentUnmetDependency(tag));
            }

            let head = graph.add_node(
                NodeData::new(format!("Head: {}, {}", tag.frequency, tag.parameter)).with_tag(tag),
            );
            graph.add_edge(begin, head);

            let chunk_count = self.policy.chunks_per_worker * hosting_ranks.len();
            let subslices = partition::non_empty_chunks(isrcs.clone(), chunk_count);

            let mut system_jobs = Vec::new();
            let mut compute_nodes = Vec::new();
            let mut compute_ranks = Vec::new();

            for (i, subslice) in subslices.into_iter().enumerate() {
                let rank = hosting_ranks[i % hosting_ranks.len()];
                let job = self.remote.submit_compute(rank, tag, solve_fn.clone(), subslice.clone())?;
                let label = format!("Compute: {}, {}, {}", tag.frequency, tag.parameter, i);
                let node = graph.add_node(
                    NodeData::new(label)
                        .with_job(job.clone())
                        .with_subslice(subslice)
                        .with_tag(tag)
                        .with_rank(rank),
                );
                graph.add_edge(head, node);
                system_jobs.push(job);
                compute_nodes.push(node);
                compute_ranks.push(rank);
            }

            let mut end_nodes = Vec::new();

            if self.policy.ensemble_clear {
                let wrap = graph.add_node(NodeData::new(format!("Wrap: {}, {}", tag.frequency, tag.parameter)).with_tag(tag));
                for &node in &compute_nodes {
                    graph.add_edge(node, wrap);
                }
                for &rank in &hosting_ranks {
                    let job = self
                        .remote
                        .submit_clear_ensemble(rank, tag, clear_fn.clone(), system_jobs.clone())?;
                    let label = format!("Wrap: {}, {}, {}", tag.frequency, tag.parameter, rank);
                    let node = graph.add_node(NodeData::new(label).with_job(job.clone()).with_tag(tag).with_rank(rank));
                    graph.add_edge(wrap, node);
                    end_nodes.push(node);
                    all_clear_jobs.push(job);
                }
            } else {
                for (i, (&node, &rank)) in compute_nodes.iter().zip(&compute_ranks).enumerate() {
                    let job = self.remote.submit_clear_individual(rank, tag, clear_fn.clone())?;
                    let label = format!("Wrap: {}, {}, {}", tag.frequency, tag.parameter, i);
                    let clear_node = graph.add_node(NodeData::new(label).with_job(job.clone()).with_tag(tag).with_rank(rank));
                    graph.add_edge(node, clear_node);
                    end_nodes.push(clear_node);
                    all_clear_jobs.push(job);
                }
            }

            let tail = graph.add_node(NodeData::new(format!("Tail: {}, {}", tag.frequency, tag.parameter)).with_tag(tag));
            for node in end_nodes {
                graph.add_edge(node, tail);
            }
            tail_nodes.push(tail);
        }

        let mut after: Vec<JobHandle> = all_clear_jobs;
        let mut end_jobs = Vec::new();
        for label in &entry.reduce {
            let remote = self.remote.clone();
            let label = label.clone();
            let deps = std::mem::take(&mut after);
            let job = JobHandle::after(deps, move || JobHandle::resolved(remote.reduce_lb(&label).is_ok()));
            after = vec![job.clone()];
            end_jobs = vec![job];
        }

        let end = graph.add_node(NodeData::new("End").with_jobs(end_jobs));
        for tail in tail_nodes {
            graph.add_edge(tail, end);
        }

        debug!("scheduled entry `{entry_name}` over {} node(s)", graph.node_count());
        Ok(graph)
    }

    /// Block until the graph's terminal work has settled: `End`'s own
    /// jobs if it has any (the reduction chain ran), otherwise the
    /// first predecessor's jobs of every tail node (no reduce labels
    /// were configured for this entry).
    pub fn wait(&self, graph: &SystemGraph) -> bool {
        let end = graph
            .node_by_label("End")
            .expect("run() always adds an End node");
        let end_jobs = graph.node(end).jobs.clone();
        if !end_jobs.is_empty() {
            return end_jobs.iter().all(|j| j.wait());
        }

        graph
            .predecessors(end)
            .iter()
            .filter_map(|&tail| graph.predecessors(tail).first().copied())
            .flat_map(|wrap_node| graph.node(wrap_node).jobs.clone())
            .collect::<Vec<_>>()
            .iter()
            .all(|j| j.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_policy_defaults_to_one_chunk_per_worker_and_individual_clear() {
        let policy = PartitionPolicy::default();
        assert_eq!(policy.chunks_per_worker, 1);
        assert!(!policy.ensemble_clear);
    }
}
