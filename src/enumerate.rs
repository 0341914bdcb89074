use fnv::FnvHashMap;
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::collections::{BTreeSet, VecDeque};
use std::fmt;

use crate::graph::{Component, GraphModel, Step};
use crate::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Every path must close back onto its first step.
    Circular,
    Unconstrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// Every path must visit every contig of the component.
    Single,
    Unconstrained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchConstraints {
    pub topology: Topology,
    pub composition: Composition,
}

impl Default for SearchConstraints {
    fn default() -> Self {
        SearchConstraints {
            topology: Topology::Unconstrained,
            composition: Composition::Unconstrained,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SearchBudget {
    /// Stop once this many distinct valid paths are found.
    pub min_valid: usize,
    /// Give up after this many walks.
    pub max_attempts: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnumerationError {
    InsufficientPaths {
        component: usize,
        found: usize,
        required: usize,
        attempts: usize,
    },
}

impl fmt::Display for EnumerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerationError::InsufficientPaths {
                component,
                found,
                required,
                attempts,
            } => write!(
                f,
                "Component {}: found {} valid paths after {} attempts, {} required",
                component, found, attempts, required
            ),
        }
    }
}

impl std::error::Error for EnumerationError {}

/// Randomized walk search over one component.
#[derive(Debug, Clone)]
pub struct PathEnumerator<'a> {
    graph: &'a GraphModel,
    component: &'a Component,
    constraints: SearchConstraints,
    copy_limits: FnvHashMap<usize, usize>,
    max_len: usize,
}

impl<'a> PathEnumerator<'a> {
    pub fn new(
        graph: &'a GraphModel,
        component: &'a Component,
        constraints: SearchConstraints,
        max_copy: usize,
    ) -> Self {
        let copy_limits = copy_limits(graph, component, max_copy);
        let max_len = copy_limits.values().sum::<usize>() + 1;
        PathEnumerator {
            graph,
            component,
            constraints,
            copy_limits,
            max_len,
        }
    }

    /// How many times a walk may visit `contig`.
    pub fn copy_limit(&self, contig: usize) -> usize {
        self.copy_limits.get(&contig).copied().unwrap_or(0)
    }

    /// Run walks with `rng` until the budget is met or spent. Paths
    /// come back in canonical order.
    pub fn enumerate<R: Rng>(
        &self,
        rng: &mut R,
        budget: SearchBudget,
    ) -> Result<Vec<Path>, EnumerationError> {
        let (found, attempts) = self.search(rng, budget);
        self.finish(found, attempts, budget)
    }

    /// Split the attempt budget over `workers` generators, each a
    /// jump of the seeded generator, and merge what they find. With
    /// one worker this is `enumerate` with a generator seeded from
    /// `seed`.
    pub fn enumerate_parallel(
        &self,
        seed: u64,
        budget: SearchBudget,
        workers: usize,
    ) -> Result<Vec<Path>, EnumerationError> {
        let workers = workers.max(1);
        let per_worker = SearchBudget {
            min_valid: budget.min_valid,
            max_attempts: (budget.max_attempts + workers - 1) / workers,
        };

        let results: Vec<(BTreeSet<Path>, usize)> = (0..workers)
            .into_par_iter()
            .map(|worker| {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
                for _ in 0..worker {
                    rng.jump();
                }
                self.search(&mut rng, per_worker)
            })
            .collect();

        let mut found = BTreeSet::new();
        let mut attempts = 0;
        for (paths, n) in results {
            found.extend(paths);
            attempts += n;
        }
        self.finish(found, attempts, budget)
    }

    fn search<R: Rng>(&self, rng: &mut R, budget: SearchBudget) -> (BTreeSet<Path>, usize) {
        let mut found = BTreeSet::new();
        let mut attempts = 0;
        while attempts < budget.max_attempts && found.len() < budget.min_valid {
            attempts += 1;
            if let Some(path) = self.random_walk(rng) {
                if self.accepts(&path) && found.insert(path) {
                    debug!(
                        "Component {}: path {} found after {} attempts",
                        self.component.id,
                        found.len(),
                        attempts
                    );
                }
            }
        }
        (found, attempts)
    }

    fn finish(
        &self,
        found: BTreeSet<Path>,
        attempts: usize,
        budget: SearchBudget,
    ) -> Result<Vec<Path>, EnumerationError> {
        if found.len() < budget.min_valid {
            return Err(EnumerationError::InsufficientPaths {
                component: self.component.id,
                found: found.len(),
                required: budget.min_valid,
                attempts,
            });
        }

        if self.constraints.composition == Composition::Unconstrained {
            let covered: BTreeSet<usize> = found.iter().flat_map(|p| p.contigs()).collect();
            if covered.len() < self.component.contigs.len() {
                warn!(
                    "Component {}: enumerated paths cover {} of {} contigs",
                    self.component.id,
                    covered.len(),
                    self.component.contigs.len()
                );
            }
        }

        info!(
            "Component {}: {} candidate paths from {} attempts",
            self.component.id,
            found.len(),
            attempts
        );
        Ok(found.into_iter().collect())
    }

    /// Whether a finished walk satisfies the constraints.
    pub fn accepts(&self, path: &Path) -> bool {
        if !path.is_valid(self.graph) {
            return false;
        }
        if self.constraints.topology == Topology::Circular && !path.is_circular() {
            return false;
        }
        if self.constraints.composition == Composition::Single
            && path.contigs() != self.component.contigs
        {
            return false;
        }
        true
    }

    fn random_walk<R: Rng>(&self, rng: &mut R) -> Option<Path> {
        let contig = *self.component.contigs.choose(rng)?;
        let start = if rng.gen::<bool>() {
            Step::forward(contig)
        } else {
            Step::backward(contig)
        };

        let mut visits: FnvHashMap<usize, usize> = FnvHashMap::default();
        visits.insert(start.contig, 1);
        let mut walk = VecDeque::new();
        walk.push_back(start);

        loop {
            let last = *walk.back()?;
            let candidates: Vec<Step> = self
                .graph
                .successors(last)
                .iter()
                .map(|(next, _)| *next)
                .filter(|next| *next == start || self.can_visit(&visits, next.contig))
                .collect();
            let next = match self.choose(rng, &candidates) {
                Some(next) => next,
                None => break,
            };
            if next == start {
                return Some(Path::circular(walk.into_iter().collect()));
            }
            if walk.len() >= self.max_len {
                return None;
            }
            *visits.entry(next.contig).or_default() += 1;
            walk.push_back(next);
        }

        if self.constraints.topology == Topology::Circular {
            return None;
        }

        // extend backwards from the start
        loop {
            let first = *walk.front()?;
            let candidates: Vec<Step> = self
                .graph
                .successors(first.flip())
                .iter()
                .map(|(prev, _)| prev.flip())
                .filter(|prev| self.can_visit(&visits, prev.contig))
                .collect();
            let prev = match self.choose(rng, &candidates) {
                Some(prev) => prev,
                None => break,
            };
            if walk.len() >= self.max_len {
                return None;
            }
            *visits.entry(prev.contig).or_default() += 1;
            walk.push_front(prev);
        }

        Some(Path::linear(walk.into_iter().collect()))
    }

    fn can_visit(&self, visits: &FnvHashMap<usize, usize>, contig: usize) -> bool {
        visits.get(&contig).copied().unwrap_or(0) < self.copy_limit(contig)
    }

    /// Pick a step with probability proportional to its contig's
    /// depth, or uniformly if no candidate has positive depth.
    fn choose<R: Rng>(&self, rng: &mut R, candidates: &[Step]) -> Option<Step> {
        if candidates.is_empty() {
            return None;
        }
        let depth = |s: &Step| self.graph.contig(s.contig).depth.max(0.0);
        candidates
            .choose_weighted(rng, depth)
            .ok()
            .or_else(|| candidates.choose(rng))
            .copied()
    }
}

/// Length-weighted median depth of the component's contigs.
fn base_depth(graph: &GraphModel, component: &Component) -> f64 {
    let mut contigs: Vec<_> = component
        .contigs
        .iter()
        .map(|&c| graph.contig(c))
        .collect();
    contigs.sort_by(|a, b| {
        a.depth
            .partial_cmp(&b.depth)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let total: usize = contigs.iter().map(|c| c.length).sum();
    let mut cumulative = 0;
    for contig in contigs.iter() {
        cumulative += contig.length;
        if 2 * cumulative >= total {
            return contig.depth;
        }
    }
    contigs.last().map(|c| c.depth).unwrap_or(0.0)
}

fn copy_limits(
    graph: &GraphModel,
    component: &Component,
    max_copy: usize,
) -> FnvHashMap<usize, usize> {
    let base = base_depth(graph, component);
    let max_copy = max_copy.max(1);
    component
        .contigs
        .iter()
        .map(|&c| {
            let depth = graph.contig(c).depth;
            let limit = if base > 0.0 && depth.is_finite() {
                ((depth / base).round() as usize).max(1).min(max_copy)
            } else {
                1
            };
            (c, limit)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    /// a, b, c closing into a circle either through b+ or b-.
    pub(crate) fn braided_triangle() -> GraphModel {
        let mut builder = GraphBuilder::new();
        let a = builder.add_contig("a", 1000, 30.0).unwrap();
        let b = builder.add_contig("b", 500, 30.0).unwrap();
        let c = builder.add_contig("c", 800, 30.0).unwrap();
        builder.add_edge(Step::forward(a), Step::forward(b), 0).unwrap();
        builder.add_edge(Step::forward(b), Step::forward(c), 0).unwrap();
        builder.add_edge(Step::forward(c), Step::forward(a), 0).unwrap();
        builder.add_edge(Step::forward(a), Step::backward(b), 0).unwrap();
        builder.add_edge(Step::backward(b), Step::forward(c), 0).unwrap();
        builder.build()
    }

    fn chain() -> GraphModel {
        let mut builder = GraphBuilder::new();
        for name in ["x", "y", "z"].iter() {
            builder.add_contig(name, 100, 10.0).unwrap();
        }
        builder.add_edge(Step::forward(0), Step::forward(1), 0).unwrap();
        builder.add_edge(Step::forward(1), Step::forward(2), 0).unwrap();
        builder.build()
    }

    fn circular_single() -> SearchConstraints {
        SearchConstraints {
            topology: Topology::Circular,
            composition: Composition::Single,
        }
    }

    #[test]
    fn finds_both_circles() {
        let graph = braided_triangle();
        let comp = &graph.components()[0];
        let enumerator = PathEnumerator::new(&graph, comp, circular_single(), 4);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let budget = SearchBudget {
            min_valid: 2,
            max_attempts: 1000,
        };
        let paths = enumerator.enumerate(&mut rng, budget).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&Path::circular(vec![
            Step::forward(0),
            Step::forward(1),
            Step::forward(2)
        ])));
        assert!(paths.contains(&Path::circular(vec![
            Step::forward(0),
            Step::backward(1),
            Step::forward(2)
        ])));
        for path in paths.iter() {
            assert!(path.is_valid(&graph));
            assert!(path.is_circular());
        }
    }

    #[test]
    fn too_few_paths_is_an_error() {
        let graph = braided_triangle();
        let comp = &graph.components()[0];
        let enumerator = PathEnumerator::new(&graph, comp, circular_single(), 4);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let budget = SearchBudget {
            min_valid: 3,
            max_attempts: 200,
        };
        match enumerator.enumerate(&mut rng, budget) {
            Err(EnumerationError::InsufficientPaths {
                found,
                required,
                attempts,
                ..
            }) => {
                assert_eq!(found, 2);
                assert_eq!(required, 3);
                assert_eq!(attempts, 200);
            }
            other => panic!("expected InsufficientPaths, got {:?}", other),
        }
    }

    #[test]
    fn open_walks_extend_both_ways() {
        let graph = chain();
        let comp = &graph.components()[0];
        let enumerator = PathEnumerator::new(&graph, comp, SearchConstraints::default(), 4);
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let budget = SearchBudget {
            min_valid: 1,
            max_attempts: 10,
        };
        let paths = enumerator.enumerate(&mut rng, budget).unwrap();
        assert_eq!(
            paths,
            vec![Path::linear(vec![
                Step::forward(0),
                Step::forward(1),
                Step::forward(2)
            ])]
        );

        let circular = PathEnumerator::new(&graph, comp, circular_single(), 4);
        assert!(circular.enumerate(&mut rng, budget).is_err());
    }

    #[test]
    fn same_seed_same_paths() {
        let graph = braided_triangle();
        let comp = &graph.components()[0];
        let constraints = SearchConstraints::default();
        let enumerator = PathEnumerator::new(&graph, comp, constraints, 4);
        let budget = SearchBudget {
            min_valid: 2,
            max_attempts: 500,
        };
        let serial = enumerator
            .enumerate(&mut Xoshiro256PlusPlus::seed_from_u64(99), budget)
            .unwrap();
        let parallel = enumerator.enumerate_parallel(99, budget, 1).unwrap();
        assert_eq!(serial, parallel);

        let split = enumerator.enumerate_parallel(99, budget, 3).unwrap();
        assert!(split.len() >= 2);
        let unique: BTreeSet<_> = split.iter().collect();
        assert_eq!(unique.len(), split.len());
    }

    #[test]
    fn deep_contigs_may_repeat() {
        let mut builder = GraphBuilder::new();
        builder.add_contig("rep", 100, 20.0).unwrap();
        builder.add_contig("u1", 1000, 10.0).unwrap();
        builder.add_contig("u2", 1000, 10.0).unwrap();
        builder.add_contig("hi", 10, 1000.0).unwrap();
        builder.add_edge(Step::forward(0), Step::forward(1), 0).unwrap();
        builder.add_edge(Step::forward(1), Step::forward(0), 0).unwrap();
        builder.add_edge(Step::forward(0), Step::forward(2), 0).unwrap();
        builder.add_edge(Step::forward(2), Step::forward(3), 0).unwrap();
        let graph = builder.build();
        let comp = &graph.components()[0];

        let enumerator = PathEnumerator::new(&graph, comp, SearchConstraints::default(), 4);
        assert_eq!(enumerator.copy_limit(0), 2);
        assert_eq!(enumerator.copy_limit(1), 1);
        assert_eq!(enumerator.copy_limit(3), 4);
        assert_eq!(enumerator.copy_limit(9), 0);

        let loop_path = Path::circular(vec![Step::forward(0), Step::forward(1)]);
        assert!(enumerator.accepts(&loop_path));
    }
}
