use bstr::BString;
use fnv::FnvHasher;
use log::debug;
use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::graph::{reverse_walk, Step};
use crate::path::Path;

/// One read aligned to a contiguous walk through the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub read_name: BString,
    pub identity: f64,
    pub aligned_length: usize,
    pub walk: Vec<Step>,
}

/// Cutoffs applied to alignments before they count as evidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentFilter {
    pub min_identity: f64,
    pub min_length: usize,
}

impl Default for AlignmentFilter {
    fn default() -> Self {
        AlignmentFilter {
            min_identity: 0.85,
            min_length: 5000,
        }
    }
}

impl AlignmentFilter {
    pub fn accepts(&self, record: &AlignmentRecord) -> bool {
        !record.walk.is_empty()
            && record.identity >= self.min_identity
            && record.aligned_length >= self.min_length
    }
}

/// Log-probability charged to an alignment that no path in the
/// current set explains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum UnexplainedPenalty {
    /// A fixed log-probability.
    Fixed(f64),
    /// The weakest positive emission of the full path set, shifted by
    /// this log factor.
    RelativeToWeakest(f64),
}

impl Default for UnexplainedPenalty {
    fn default() -> Self {
        UnexplainedPenalty::RelativeToWeakest(1e-3f64.ln())
    }
}

impl UnexplainedPenalty {
    fn resolve(&self, weakest_emission: Option<f64>) -> f64 {
        match *self {
            UnexplainedPenalty::Fixed(log_p) => log_p,
            UnexplainedPenalty::RelativeToWeakest(log_factor) => {
                weakest_emission.map(f64::ln).unwrap_or(0.0) + log_factor
            }
        }
    }
}

/// Filtered alignments, grouped by walk. Both strands of a walk land
/// in the same group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evidence {
    groups: Vec<(Vec<Step>, usize)>,
    discarded: usize,
}

impl Evidence {
    pub fn collect<'a, I>(records: I, filter: &AlignmentFilter) -> Self
    where
        I: IntoIterator<Item = &'a AlignmentRecord>,
    {
        let mut groups: BTreeMap<Vec<Step>, usize> = BTreeMap::new();
        let mut discarded = 0;
        for record in records {
            if !filter.accepts(record) {
                discarded += 1;
                continue;
            }
            let rev = reverse_walk(&record.walk);
            let key = if rev < record.walk {
                rev
            } else {
                record.walk.clone()
            };
            *groups.entry(key).or_default() += 1;
        }
        Evidence {
            groups: groups.into_iter().collect(),
            discarded,
        }
    }

    /// Number of alignments that passed the filter.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, n)| n).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn groups(&self) -> &[(Vec<Step>, usize)] {
        &self.groups
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        self.groups.hash(&mut hasher);
        self.discarded.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Observation {
    count: usize,
    /// (path index, emission weight) for each compatible path
    emissions: Vec<(usize, f64)>,
}

/// Likelihood of path frequencies given the evidence, for a fixed
/// path set.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationModel {
    paths: Vec<Path>,
    observations: Vec<Observation>,
    log_penalty: f64,
    unexplained: usize,
    informative: usize,
    discarded: usize,
}

impl ObservationModel {
    pub fn new(paths: Vec<Path>, evidence: &Evidence, penalty: UnexplainedPenalty) -> Self {
        let observations: Vec<Observation> = evidence
            .groups
            .iter()
            .map(|(walk, count)| Observation {
                count: *count,
                emissions: paths
                    .iter()
                    .enumerate()
                    .map(|(ix, p)| (ix, p.emission_weight(walk)))
                    .filter(|(_, w)| *w > 0.0)
                    .collect(),
            })
            .collect();

        let weakest = observations
            .iter()
            .flat_map(|o| o.emissions.iter().map(|(_, w)| *w))
            .fold(None, |acc: Option<f64>, w| Some(acc.map_or(w, |a| a.min(w))));

        let informative = observations
            .iter()
            .filter(|o| !o.emissions.is_empty())
            .map(|o| o.count)
            .sum();
        let unexplained = evidence.len() - informative;

        debug!(
            "Observation model over {} paths: {} informative, {} unexplained, {} discarded alignments",
            paths.len(),
            informative,
            unexplained,
            evidence.discarded
        );

        ObservationModel {
            paths,
            observations,
            log_penalty: penalty.resolve(weakest),
            unexplained,
            informative,
            discarded: evidence.discarded,
        }
    }

    /// The model over a subset of this model's paths, given by index.
    /// The penalty and the observation count of this model carry
    /// over, so scores of nested path sets stay comparable.
    pub fn restrict(&self, keep: &[usize]) -> Self {
        let mut remap = vec![None; self.paths.len()];
        for (new_ix, &old_ix) in keep.iter().enumerate() {
            remap[old_ix] = Some(new_ix);
        }

        let observations: Vec<Observation> = self
            .observations
            .iter()
            .map(|o| Observation {
                count: o.count,
                emissions: o
                    .emissions
                    .iter()
                    .filter_map(|&(ix, w)| remap[ix].map(|n| (n, w)))
                    .collect(),
            })
            .collect();

        let explained: usize = observations
            .iter()
            .filter(|o| !o.emissions.is_empty())
            .map(|o| o.count)
            .sum();
        let total = self.unexplained + self.informative;

        ObservationModel {
            paths: keep.iter().map(|&ix| self.paths[ix].clone()).collect(),
            observations,
            log_penalty: self.log_penalty,
            unexplained: total - explained,
            informative: self.informative,
            discarded: self.discarded,
        }
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    pub fn n_paths(&self) -> usize {
        self.paths.len()
    }

    /// Alignments explained by the path set this model was first
    /// built from.
    pub fn n_observations(&self) -> usize {
        self.informative
    }

    /// Alignments no path of this set explains.
    pub fn n_unexplained(&self) -> usize {
        self.unexplained
    }

    pub fn n_discarded(&self) -> usize {
        self.discarded
    }

    pub fn log_penalty(&self) -> f64 {
        self.log_penalty
    }

    /// Σ count · ln Σ_p f_p w(a, p), plus the penalty for every
    /// unexplained alignment. May be -inf when explaining paths all
    /// have zero frequency; NaN only for malformed input.
    pub fn log_likelihood(&self, freqs: &[f64]) -> f64 {
        debug_assert_eq!(freqs.len(), self.paths.len());
        let mut ll = self.unexplained as f64 * self.log_penalty;
        for obs in self.observations.iter().filter(|o| !o.emissions.is_empty()) {
            let p: f64 = obs.emissions.iter().map(|&(ix, w)| freqs[ix] * w).sum();
            ll += obs.count as f64 * p.ln();
        }
        ll
    }

    /// Soft assignment of each alignment group to its compatible
    /// paths, proportional to frequency times emission weight.
    pub fn responsibilities(&self, freqs: &[f64]) -> Vec<Vec<(usize, f64)>> {
        self.observations
            .iter()
            .map(|obs| {
                let total: f64 = obs.emissions.iter().map(|&(ix, w)| freqs[ix] * w).sum();
                if total > 0.0 {
                    obs.emissions
                        .iter()
                        .map(|&(ix, w)| (ix, freqs[ix] * w / total))
                        .collect()
                } else {
                    Vec::new()
                }
            })
            .collect()
    }

    /// Expected number of alignments attributed to each path.
    pub fn expected_support(&self, freqs: &[f64]) -> Vec<f64> {
        let mut support = vec![0.0; self.paths.len()];
        for (obs, resp) in self.observations.iter().zip(self.responsibilities(freqs)) {
            for (ix, r) in resp {
                support[ix] += obs.count as f64 * r;
            }
        }
        support
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn f(c: usize) -> Step {
        Step::forward(c)
    }

    pub(crate) fn record(walk: Vec<Step>) -> AlignmentRecord {
        AlignmentRecord {
            read_name: BString::from("read"),
            identity: 0.99,
            aligned_length: 10_000,
            walk,
        }
    }

    fn loose() -> AlignmentFilter {
        AlignmentFilter {
            min_identity: 0.0,
            min_length: 0,
        }
    }

    #[test]
    fn filter_discards_and_counts() {
        let mut low_id = record(vec![f(0)]);
        low_id.identity = 0.5;
        let mut short = record(vec![f(0)]);
        short.aligned_length = 100;
        let empty = record(vec![]);
        let good = record(vec![f(0), f(1)]);

        let records = vec![low_id, short, empty, good];
        let evidence = Evidence::collect(&records, &AlignmentFilter::default());
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence.discarded(), 3);
    }

    #[test]
    fn strands_are_grouped() {
        let records = vec![
            record(vec![f(0), f(1)]),
            record(vec![Step::backward(1), Step::backward(0)]),
        ];
        let evidence = Evidence::collect(&records, &loose());
        assert_eq!(evidence.groups().len(), 1);
        assert_eq!(evidence.groups()[0].1, 2);
    }

    #[test]
    fn likelihood_prefers_explaining_path() {
        let circle = Path::circular(vec![f(0), f(1), f(2)]);
        let line = Path::linear(vec![f(2), f(0)]);
        let records = vec![
            record(vec![f(0), f(1)]),
            record(vec![f(1), f(2)]),
            record(vec![f(2), f(0)]),
        ];
        let evidence = Evidence::collect(&records, &loose());
        let model = ObservationModel::new(
            vec![circle, line],
            &evidence,
            UnexplainedPenalty::Fixed(-20.0),
        );
        assert_eq!(model.n_observations(), 3);
        assert_eq!(model.n_unexplained(), 0);

        let all_circle = model.log_likelihood(&[1.0, 0.0]);
        let mixed = model.log_likelihood(&[0.5, 0.5]);
        assert!(all_circle > mixed);
        assert!((all_circle - 3.0 * (1.0f64 / 6.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn restriction_charges_penalty() {
        let circle = Path::circular(vec![f(0), f(1), f(2)]);
        let line = Path::linear(vec![f(2), f(0)]);
        let records = vec![record(vec![f(0), f(1)]), record(vec![f(2), f(0)])];
        let evidence = Evidence::collect(&records, &loose());
        let model = ObservationModel::new(
            vec![circle, line.clone()],
            &evidence,
            UnexplainedPenalty::Fixed(-20.0),
        );

        let only_line = model.restrict(&[1]);
        assert_eq!(only_line.paths(), &[line]);
        assert_eq!(only_line.n_unexplained(), 1);
        assert_eq!(only_line.n_observations(), 2);
        let ll = only_line.log_likelihood(&[1.0]);
        assert!((ll - (-20.0 + 0.5f64.ln())).abs() < 1e-12);
    }

    #[test]
    fn weakest_relative_penalty() {
        let circle = Path::circular(vec![f(0), f(1), f(2)]);
        let evidence = Evidence::collect(&[record(vec![f(0)])], &loose());
        let model = ObservationModel::new(vec![circle], &evidence, Default::default());
        let expected = (1.0f64 / 6.0).ln() + 1e-3f64.ln();
        assert!((model.log_penalty() - expected).abs() < 1e-12);
    }

    #[test]
    fn soft_assignment_splits_shared_alignments() {
        let circle = Path::circular(vec![f(0), f(1), f(2)]);
        let line = Path::linear(vec![f(0), f(1), f(2)]);
        let records = vec![record(vec![f(1)]), record(vec![f(2), f(0)])];
        let evidence = Evidence::collect(&records, &loose());
        let model = ObservationModel::new(vec![circle, line], &evidence, Default::default());

        let resp = model.responsibilities(&[0.5, 0.5]);
        // f1 sits once in each path; both have 6 positions for k = 1
        let shared = resp.iter().find(|r| r.len() == 2).unwrap();
        assert!((shared[0].1 - 0.5).abs() < 1e-12);

        let support = model.expected_support(&[0.5, 0.5]);
        assert!((support.iter().sum::<f64>() - 2.0).abs() < 1e-12);
        assert!(support[0] > support[1]);
    }
}
