//! End-to-end scheduler behavior against an in-process simulated
//! cluster: fan-out/fan-in shape, chunk boundaries, reduction chains
//! and transport selection.

mod support;

use geosched::prelude::*;
use num_complex::Complex64;
use support::{bootstrap_cluster, schedule_with};

#[test]
fn two_workers_two_tags_produce_one_compute_and_clear_node_each() {
    let tag_a = Tag::new(0, 0);
    let tag_b = Tag::new(1, 0);
    let remote = bootstrap_cluster(vec![vec![tag_a], vec![tag_b]]);
    let scheduler = Scheduler::new(
        remote,
        1,
        PartitionPolicy {
            chunks_per_worker: 1,
            ensemble_clear: false,
        },
    );
    let schedule = schedule_with("forward", vec![]);

    let graph = scheduler
        .run(&schedule, "forward", ScheduleRequest::Range(0..1))
        .unwrap();
    assert!(scheduler.wait(&graph));

    assert_eq!(graph.nodes_with_label_prefix("Compute:").len(), 2);
    assert_eq!(graph.nodes_with_label_prefix("Head:").len(), 2);
    assert_eq!(graph.nodes_with_label_prefix("Tail:").len(), 2);
    assert_eq!(graph.nodes_with_label_prefix("Wrap:").len(), 2);
    assert_eq!(graph.node_count(), 1 + 2 + 2 + 2 + 2 + 1);
}

#[test]
fn ensemble_clear_fans_in_then_out_per_rank() {
    let tag = Tag::new(0, 0);
    let remote = bootstrap_cluster(vec![vec![tag], vec![tag]]);
    let scheduler = Scheduler::new(
        remote,
        1,
        PartitionPolicy {
            chunks_per_worker: 1,
            ensemble_clear: true,
        },
    );
    let schedule = schedule_with("forward", vec![]);

    let graph = scheduler
        .run(&schedule, "forward", ScheduleRequest::Range(0..1))
        .unwrap();
    assert!(scheduler.wait(&graph));

    let fan_in = graph.node_by_label("Wrap: 0, 0").expect("fan-in wrap node");
    let per_rank_clears = graph.nodes_with_label_prefix("Wrap: 0, 0, ");
    assert_eq!(per_rank_clears.len(), 2);
    for &clear in &per_rank_clears {
        assert!(graph.predecessors(clear).contains(&fan_in));
    }
}

#[test]
fn chunking_matches_partition_boundaries() {
    let tag = Tag::new(2, 0);
    let remote = bootstrap_cluster(vec![vec![tag], vec![tag]]);
    let scheduler = Scheduler::new(
        remote,
        10,
        PartitionPolicy {
            chunks_per_worker: 2,
            ensemble_clear: false,
        },
    );
    let schedule = schedule_with("forward", vec![]);

    let graph = scheduler
        .run(&schedule, "forward", ScheduleRequest::All)
        .unwrap();
    assert!(scheduler.wait(&graph));

    let compute_nodes = graph.nodes_with_label_prefix("Compute:");
    assert_eq!(compute_nodes.len(), 4);
    let mut slices: Vec<_> = compute_nodes
        .iter()
        .map(|&idx| graph.node(idx).subslice.clone().unwrap())
        .collect();
    slices.sort_by_key(|r| r.start);
    assert_eq!(slices, vec![0..2, 2..5, 5..7, 7..10]);
}

#[test]
fn reduction_chain_ends_at_the_last_reduce_job() {
    let tag = Tag::new(0, 0);
    let remote = bootstrap_cluster(vec![vec![tag]]);
    remote.set("u", DenseField::scalar(Complex64::new(1.0, 0.0))).unwrap();
    remote.set("v", DenseField::scalar(Complex64::new(2.0, 0.0))).unwrap();

    let scheduler = Scheduler::new(remote, 1, PartitionPolicy::default());
    let schedule = schedule_with("forward", vec!["u".into(), "v".into()]);

    let graph = scheduler
        .run(&schedule, "forward", ScheduleRequest::Range(0..1))
        .unwrap();
    assert!(scheduler.wait(&graph));

    let end = graph.node_by_label("End").unwrap();
    assert_eq!(graph.node(end).jobs.len(), 1);
}

#[test]
fn star_transport_reduce_matches_manual_fold() {
    let remote = bootstrap_cluster(vec![vec![], vec![]]);
    assert_eq!(remote.transport(), Transport::Star);

    remote.set("k", DenseField::scalar(Complex64::new(3.0, 0.0))).unwrap();

    let reduced = remote.reduce("k").unwrap();
    let gathered = remote.get("k").unwrap();
    let manual = gathered.into_iter().reduce(|a, b| a.add(&b)).unwrap();

    assert_eq!(reduced.data, manual.data);
}

#[test]
fn only_non_empty_chunks_get_dispatched() {
    let tag = Tag::new(0, 0);
    let remote = bootstrap_cluster(vec![vec![tag], vec![tag]]);
    let scheduler = Scheduler::new(
        remote,
        1,
        PartitionPolicy {
            chunks_per_worker: 3,
            ensemble_clear: false,
        },
    );
    let schedule = schedule_with("forward", vec![]);

    let graph = scheduler
        .run(&schedule, "forward", ScheduleRequest::Range(0..1))
        .unwrap();
    assert!(scheduler.wait(&graph));

    let compute_nodes = graph.nodes_with_label_prefix("Compute:");
    assert_eq!(compute_nodes.len(), 1);
    assert_eq!(graph.node(compute_nodes[0]).subslice.clone().unwrap(), 0..1);
}
