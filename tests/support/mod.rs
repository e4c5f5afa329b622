//! An in-process simulated cluster used by the integration tests: a
//! trivial `Problem`/`Survey` pair and a helper that bootstraps a
//! `RemoteInterface` with one rank per entry of `tags_per_rank`.

use std::collections::HashMap;
use std::sync::Arc;

use geosched::prelude::*;
use geosched::tag::SystemConfig;
use num_complex::Complex64;

pub struct DummyProblem;

impl Problem for DummyProblem {
    type Survey = ();

    fn pair(&mut self, _survey: &()) -> Result<(), String> {
        Ok(())
    }
}

fn base_config() -> geosched::tag::BaseSystemConfig {
    let mut cfg = SystemConfig::new();
    cfg.insert("geom".into(), serde_json::json!({}));
    geosched::tag::BaseSystemConfig::new(cfg).unwrap()
}

pub fn make_endpoint() -> Endpoint<DummyProblem, (), DenseField> {
    let spec: Box<dyn FieldSpec<DenseField> + Send> = Box::new(
        PrototypeFieldSpec::new()
            .with_field("u", DenseField::scalar(Complex64::new(0.0, 0.0)))
            .with_field("v", DenseField::scalar(Complex64::new(0.0, 0.0))),
    );
    Endpoint::new(base_config(), |_cfg| DummyProblem, |_geom| (), Some(spec))
}

/// Bootstraps one worker per entry of `tags_per_rank`, registering every
/// listed tag against that worker before returning. MPI is requested but
/// no bellwether environment variable is set under test, so the cluster
/// always settles on the star transport.
pub fn bootstrap_cluster(
    tags_per_rank: Vec<Vec<Tag>>,
) -> Arc<RemoteInterface<DummyProblem, (), DenseField>> {
    let endpoints: Vec<_> = tags_per_rank.iter().map(|_| make_endpoint()).collect();

    let mut registry = FunctionRegistry::new();
    registry.register_solve(
        "noop",
        Arc::new(|_ep: &mut Endpoint<DummyProblem, (), DenseField>, _tag, _sub| Ok(())) as SolveFn<_, _, _>,
    );
    registry.register_clear(
        "noop",
        Arc::new(|_ep: &mut Endpoint<DummyProblem, (), DenseField>, _tag, _rank| Ok(())) as ClearFn<_, _, _>,
    );

    let remote = Arc::new(RemoteInterface::bootstrap(endpoints, true, 1, registry, "test"));

    for (rank, tags) in tags_per_rank.into_iter().enumerate() {
        let rank = rank as Rank;
        let mut surveys = HashMap::new();
        surveys.insert(0i64, SystemConfig::new());
        remote.setup_local_surveys(rank, surveys).unwrap();
        for tag in tags {
            remote
                .setup_local_problem(
                    rank,
                    SubConfig {
                        isub: 0,
                        tag,
                        overlay: SystemConfig::new(),
                    },
                )
                .unwrap();
        }
    }

    remote
}

pub fn schedule_with(entry_name: &str, reduce: Vec<String>) -> Schedule {
    let mut schedule = Schedule::new();
    schedule.insert(
        entry_name.to_string(),
        ScheduleEntry {
            solve: "noop".into(),
            clear: "noop".into(),
            reduce,
        },
    );
    schedule
}
