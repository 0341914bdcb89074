use fnv::FnvHashMap;
use log::{info, warn};
use rayon::prelude::*;

use crate::checkpoint::{CheckpointStore, RunIdentity};
use crate::config::EstimatorConfig;
use crate::enumerate::PathEnumerator;
use crate::error::{scope_sampler_error, ComponentError, EstimatorError};
use crate::graph::{Component, GraphModel};
use crate::model_selection::ModelSelector;
use crate::observation::{AlignmentRecord, Evidence, ObservationModel};
use crate::report::{assemble, ComponentReport};
use crate::sampler::{CancelToken, ChainState, MetropolisSampler, NoCheckpoint};

/// The result for one selected component.
#[derive(Debug)]
pub struct ComponentOutcome {
    pub component: usize,
    pub result: Result<ComponentReport, ComponentError>,
}

/// Runs the whole pipeline over the selected components of a graph.
pub struct Estimator<'a> {
    graph: &'a GraphModel,
    config: &'a EstimatorConfig,
    store: Option<&'a CheckpointStore>,
    cancel: CancelToken,
}

impl<'a> Estimator<'a> {
    pub fn new(graph: &'a GraphModel, config: &'a EstimatorConfig) -> Self {
        Estimator {
            graph,
            config,
            store: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_checkpoints(mut self, store: &'a CheckpointStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Analyze every selected component. Component failures come back
    /// in their outcome; configuration, checkpoint and interruption
    /// failures abort the run.
    pub fn run(&self, records: &[AlignmentRecord]) -> Result<Vec<ComponentOutcome>, EstimatorError> {
        self.config.validate()?;
        let selected = self.config.graph_selection.select(self.graph)?;

        let mut by_component: FnvHashMap<usize, Vec<&AlignmentRecord>> = FnvHashMap::default();
        let mut unplaced = 0;
        for record in records {
            match record
                .walk
                .first()
                .and_then(|s| self.graph.component_of(s.contig))
            {
                Some(comp) => by_component.entry(comp.id).or_default().push(record),
                None => unplaced += 1,
            }
        }
        if unplaced > 0 {
            warn!("{} alignments could not be placed on the graph", unplaced);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.processes)
            .build()
            .map_err(|e| EstimatorError::ThreadPool(e.to_string()))?;

        let empty = Vec::new();
        let outcomes: Vec<Result<ComponentOutcome, EstimatorError>> = pool.install(|| {
            selected
                .par_iter()
                .enumerate()
                .map(|(rank, comp)| {
                    let records = by_component.get(&comp.id).unwrap_or(&empty);
                    self.run_component(rank, comp, records)
                })
                .collect()
        });
        let outcomes = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            "Finished {} components, {} failed",
            outcomes.len(),
            failed
        );
        Ok(outcomes)
    }

    fn run_component(
        &self,
        rank: usize,
        comp: &Component,
        records: &[&AlignmentRecord],
    ) -> Result<ComponentOutcome, EstimatorError> {
        let config = self.config;
        let seed = config.seed.wrapping_add(rank as u64);
        let evidence = Evidence::collect(records.iter().copied(), &config.filter());
        info!(
            "Component {}: {} contigs, {} alignments kept, {} discarded",
            comp.id,
            comp.contigs.len(),
            evidence.len(),
            evidence.discarded()
        );

        let identity = RunIdentity {
            graph: self.graph.fingerprint(),
            evidence: evidence.fingerprint(),
            filter: config.filter(),
            constraints: config.constraints(),
            budget: config.budget(),
            max_copy: config.max_copy,
            workers: config.processes,
            penalty: config.unexplained_penalty,
            n_burn: config.n_burn,
            seed,
        };
        let checkpoint = match self.store {
            Some(store) => store.load(comp.id, &identity)?,
            None => None,
        };
        let outcome = |result: Result<ComponentReport, ComponentError>| ComponentOutcome {
            component: comp.id,
            result,
        };

        let (paths, resumed) = match checkpoint {
            Some(cp) => (cp.paths, Some(cp.state)),
            None => {
                let enumerator =
                    PathEnumerator::new(self.graph, comp, config.constraints(), config.max_copy);
                match enumerator.enumerate_parallel(seed, config.budget(), config.processes) {
                    Ok(paths) => (paths, None),
                    Err(err) => {
                        warn!("{}", err);
                        return Ok(outcome(Err(err.into())));
                    }
                }
            }
        };

        let model = ObservationModel::new(paths, &evidence, config.unexplained_penalty);
        let resumed_from = resumed.as_ref().map(|s| s.generation);
        let state = match resumed {
            Some(state) => state,
            None => match ChainState::uniform(&model, seed) {
                Ok(state) => state,
                Err(err) => return Ok(outcome(Err(scope_sampler_error(err, comp.id)?))),
            },
        };

        let sampler = MetropolisSampler::new(&model, config.sampler_settings());
        let fingerprint = identity.fingerprint(model.paths());
        let chain = match self.store {
            Some(store) => sampler.run(
                state,
                &mut store.sink(comp.id, fingerprint, model.paths()),
                &self.cancel,
            ),
            None => sampler.run(state, &mut NoCheckpoint, &self.cancel),
        };
        let posterior = match chain {
            Ok(posterior) => posterior,
            Err(err) => return Ok(outcome(Err(scope_sampler_error(err, comp.id)?))),
        };

        let selector = ModelSelector::new(&model, config.selection_settings(seed), &self.cancel);
        let selection = match selector.select(posterior.clone()) {
            Ok(selection) => selection,
            Err(err) => return Ok(outcome(Err(scope_sampler_error(err, comp.id)?))),
        };

        let report = assemble(
            comp.id,
            self.graph,
            &posterior,
            &selection,
            config.out_seq_threshold,
            resumed_from,
        );
        for path in report.paths.iter() {
            info!(
                "Component {}: {} at frequency {:.4}",
                comp.id, path.label, path.frequency
            );
        }
        Ok(outcome(Ok(report)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointError, PreviousRun};
    use crate::components::ComponentSelection;
    use crate::enumerate::tests::braided_triangle;
    use crate::enumerate::{Composition, Topology};
    use crate::graph::{GraphBuilder, Step};
    use crate::model_selection::SelectionMode;
    use crate::observation::tests::record;

    fn f(c: usize) -> Step {
        Step::forward(c)
    }

    /// Reads drawn only from the circle a+ b+ c+.
    fn true_circle_reads() -> Vec<AlignmentRecord> {
        let mut records = Vec::new();
        for _ in 0..30 {
            records.push(record(vec![f(0), f(1)]));
            records.push(record(vec![f(1), f(2)]));
            records.push(record(vec![f(2), f(0)]));
            records.push(record(vec![f(0), f(1), f(2)]));
        }
        records
    }

    fn config() -> EstimatorConfig {
        EstimatorConfig {
            criterion: SelectionMode::Aic,
            min_valid_search: 2,
            max_valid_search: 1000,
            n_generations: 2000,
            n_burn: 500,
            checkpoint_interval: 500,
            refine_generations: 500,
            out_seq_threshold: 0.05,
            ..EstimatorConfig::new(Topology::Circular, Composition::Single)
        }
    }

    #[test]
    fn true_circle_is_recovered() {
        let graph = braided_triangle();
        let config = config();
        let outcomes = Estimator::new(&graph, &config)
            .run(&true_circle_reads())
            .unwrap();
        assert_eq!(outcomes.len(), 1);

        let report = outcomes[0].result.as_ref().unwrap();
        assert_eq!(report.diagnostics.candidates, 2);
        assert_eq!(report.diagnostics.removals, 1);
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.paths[0].label, "a+,b+,c+");
        assert!((report.paths[0].frequency - 1.0).abs() < 0.05);
        assert_eq!(report.diagnostics.informative_alignments, 120);
    }

    #[test]
    fn failing_component_does_not_stop_others() {
        let mut builder = GraphBuilder::new();
        for name in ["a", "b", "c"].iter() {
            builder.add_contig(name, 1000, 30.0).unwrap();
        }
        builder.add_contig("lonely", 100, 1.0).unwrap();
        builder.add_edge(f(0), f(1), 0).unwrap();
        builder.add_edge(f(1), f(2), 0).unwrap();
        builder.add_edge(f(2), f(0), 0).unwrap();
        builder.add_edge(f(0), Step::backward(1), 0).unwrap();
        builder.add_edge(Step::backward(1), f(2), 0).unwrap();
        let graph = builder.build();

        let config = EstimatorConfig {
            graph_selection: ComponentSelection::Range(0, 2),
            processes: 2,
            ..config()
        };
        let outcomes = Estimator::new(&graph, &config)
            .run(&true_circle_reads())
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].component, 0);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].component, 1);
        assert!(matches!(
            outcomes[1].result,
            Err(ComponentError::Enumeration(_))
        ));
    }

    #[test]
    fn second_run_resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let graph = braided_triangle();
        let config = config();
        let reads = true_circle_reads();

        let store = CheckpointStore::open(dir.path(), PreviousRun::Terminate).unwrap();
        let first = Estimator::new(&graph, &config)
            .with_checkpoints(&store)
            .run(&reads)
            .unwrap();
        assert!(store.file_for(0).exists());

        let store = CheckpointStore::open(dir.path(), PreviousRun::Resume).unwrap();
        let second = Estimator::new(&graph, &config)
            .with_checkpoints(&store)
            .run(&reads)
            .unwrap();

        let a = first[0].result.as_ref().unwrap();
        let b = second[0].result.as_ref().unwrap();
        assert_eq!(a.diagnostics.resumed_from, None);
        assert_eq!(b.diagnostics.resumed_from, Some(2000));
        assert_eq!(a.paths, b.paths);

        let other_seed = EstimatorConfig { seed: 1, ..config };
        assert!(matches!(
            Estimator::new(&graph, &other_seed)
                .with_checkpoints(&store)
                .run(&reads),
            Err(EstimatorError::Checkpoint(_))
        ));
    }

    #[test]
    fn resume_refuses_changed_search_settings() {
        let dir = tempfile::tempdir().unwrap();
        let graph = braided_triangle();
        let config = config();
        let reads = true_circle_reads();

        let store = CheckpointStore::open(dir.path(), PreviousRun::Terminate).unwrap();
        Estimator::new(&graph, &config)
            .with_checkpoints(&store)
            .run(&reads)
            .unwrap();

        let store = CheckpointStore::open(dir.path(), PreviousRun::Resume).unwrap();
        let changed = [
            EstimatorConfig {
                max_copy: 1,
                ..config.clone()
            },
            EstimatorConfig {
                min_valid_search: 1,
                max_valid_search: 1,
                ..config.clone()
            },
            EstimatorConfig {
                processes: 2,
                ..config.clone()
            },
        ];
        for other in changed.iter() {
            let result = Estimator::new(&graph, other).with_checkpoints(&store).run(&reads);
            assert!(matches!(
                result,
                Err(EstimatorError::Checkpoint(CheckpointError::Incompatible { .. }))
            ));
        }
    }

    #[test]
    fn cancellation_aborts_the_run() {
        let graph = braided_triangle();
        let config = config();
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = Estimator::new(&graph, &config)
            .with_cancel(cancel)
            .run(&true_circle_reads());
        assert!(matches!(result, Err(EstimatorError::Interrupted { .. })));
    }

    #[test]
    fn bad_selection_is_run_scoped() {
        let graph = braided_triangle();
        let config = EstimatorConfig {
            graph_selection: ComponentSelection::Rank(3),
            ..config()
        };
        assert!(matches!(
            Estimator::new(&graph, &config).run(&[]),
            Err(EstimatorError::Selection(_))
        ));
    }
}
