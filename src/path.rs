use serde::{Deserialize, Serialize};

use std::fmt::Write;

use crate::graph::{reverse_walk, GraphModel, Step};

/// A candidate traversal of the graph. The step list is stored in
/// canonical form, so two paths describing the same traversal (read
/// on the other strand, or rotated if circular) compare equal.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Path {
    steps: Vec<Step>,
    circular: bool,
}

impl Path {
    pub fn new(steps: Vec<Step>, circular: bool) -> Self {
        let steps = if circular {
            canonical_circular(steps)
        } else {
            canonical_linear(steps)
        };
        Path { steps, circular }
    }

    pub fn linear(steps: Vec<Step>) -> Self {
        Path::new(steps, false)
    }

    pub fn circular(steps: Vec<Step>) -> Self {
        Path::new(steps, true)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn is_circular(&self) -> bool {
        self.circular
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct contigs visited, ascending.
    pub fn contigs(&self) -> Vec<usize> {
        let mut contigs: Vec<usize> = self.steps.iter().map(|s| s.contig).collect();
        contigs.sort_unstable();
        contigs.dedup();
        contigs
    }

    /// Every consecutive pair must be joined by an edge, and a
    /// circular path must also lead from its last step back to the
    /// first.
    pub fn is_valid(&self, graph: &GraphModel) -> bool {
        if self.steps.is_empty() {
            return false;
        }
        let n_contigs = graph.contigs().len();
        if self.steps.iter().any(|s| s.contig >= n_contigs) {
            return false;
        }
        let linked = self
            .steps
            .windows(2)
            .all(|w| graph.has_edge(w[0], w[1]));
        let closed = !self.circular || {
            let first = self.steps[0];
            let last = self.steps[self.steps.len() - 1];
            graph.has_edge(last, first)
        };
        linked && closed
    }

    /// Number of placements of `walk` along this path, counting both
    /// strands. Circular paths wrap, so a walk longer than the path
    /// can still be placed.
    pub fn occurrences(&self, walk: &[Step]) -> usize {
        if walk.is_empty() || self.steps.is_empty() {
            return 0;
        }
        let rev = reverse_walk(&self.steps);
        count_placements(&self.steps, walk, self.circular)
            + count_placements(&rev, walk, self.circular)
    }

    /// Number of start positions a walk of `k` steps could take,
    /// counting both strands.
    pub fn positions(&self, k: usize) -> usize {
        let n = self.steps.len();
        if self.circular {
            2 * n
        } else if k == 0 || k > n {
            0
        } else {
            2 * (n - k + 1)
        }
    }

    /// Probability that an alignment drawn uniformly from this path
    /// lands on `walk`.
    pub fn emission_weight(&self, walk: &[Step]) -> f64 {
        let positions = self.positions(walk.len());
        if positions == 0 {
            return 0.0;
        }
        self.occurrences(walk) as f64 / positions as f64
    }

    /// GFA-style step list, e.g. `ctg1+,ctg2-`
    pub fn label(&self, graph: &GraphModel) -> String {
        let mut result = String::new();
        for (i, step) in self.steps.iter().enumerate() {
            if i != 0 {
                result.push(',');
            }
            let written = match graph.contig_name(step.contig) {
                Some(name) => write!(result, "{}{}", name, step.orient),
                None => write!(result, "{}", step),
            };
            written.expect("writing to a String cannot fail");
        }
        result
    }
}

fn count_placements(steps: &[Step], walk: &[Step], circular: bool) -> usize {
    let n = steps.len();
    let k = walk.len();
    if circular {
        (0..n)
            .filter(|&i| walk.iter().enumerate().all(|(j, s)| steps[(i + j) % n] == *s))
            .count()
    } else if k > n {
        0
    } else {
        steps.windows(k).filter(|w| *w == walk).count()
    }
}

fn canonical_linear(steps: Vec<Step>) -> Vec<Step> {
    let rev = reverse_walk(&steps);
    if rev < steps {
        rev
    } else {
        steps
    }
}

/// Smallest rotation over both strands.
fn canonical_circular(steps: Vec<Step>) -> Vec<Step> {
    let n = steps.len();
    if n == 0 {
        return steps;
    }
    fn rotated(s: &[Step], r: usize) -> impl Iterator<Item = Step> + '_ {
        s[r..].iter().chain(s[..r].iter()).copied()
    }

    let rev = reverse_walk(&steps);

    let mut best: (&[Step], usize) = (&steps, 0);
    for strand in [&steps, &rev].iter() {
        for r in 0..n {
            if rotated(strand, r).lt(rotated(best.0, best.1)) {
                best = (strand.as_slice(), r);
            }
        }
    }
    rotated(best.0, best.1).collect()
}
