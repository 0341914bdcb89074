use crate::graph::GraphModel;
use crate::model_selection::Selection;
use crate::path::Path;
use crate::sampler::Posterior;

/// A path that survived the frequency threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedPath {
    pub path: Path,
    /// Comma-separated oriented contig names.
    pub label: String,
    pub frequency: f64,
    /// Expected number of alignments attributed to the path.
    pub support: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Diagnostics {
    pub criterion: Option<&'static str>,
    pub score: Option<f64>,
    /// Generations of the full-set chain.
    pub generations: usize,
    pub acceptance_rate: f64,
    pub stalls: usize,
    pub candidates: usize,
    pub selected: usize,
    pub removals: usize,
    pub informative_alignments: usize,
    pub unexplained_alignments: usize,
    pub discarded_alignments: usize,
    /// Generation the full-set chain was resumed from.
    pub resumed_from: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentReport {
    pub component: usize,
    /// Descending by frequency.
    pub paths: Vec<ReportedPath>,
    pub diagnostics: Diagnostics,
}

/// Turn a finished selection into the report handed to the writer.
/// Only paths with frequency strictly above `threshold` are kept.
pub fn assemble(
    component: usize,
    graph: &GraphModel,
    full_chain: &Posterior,
    selection: &Selection,
    threshold: f64,
    resumed_from: Option<usize>,
) -> ComponentReport {
    let freqs = &selection.posterior.frequencies;
    let support = selection.model.expected_support(freqs);

    let mut paths: Vec<ReportedPath> = selection
        .model
        .paths()
        .iter()
        .zip(freqs.iter())
        .zip(support.into_iter())
        .filter(|((_, &f), _)| f > threshold)
        .map(|((path, &frequency), support)| ReportedPath {
            path: path.clone(),
            label: path.label(graph),
            frequency,
            support,
        })
        .collect();
    paths.sort_by(|a, b| {
        b.frequency
            .partial_cmp(&a.frequency)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });

    let diagnostics = Diagnostics {
        criterion: selection.criterion,
        score: selection.score,
        generations: full_chain.generations,
        acceptance_rate: full_chain.acceptance_rate,
        stalls: full_chain.stalls,
        candidates: selection.kept.len() + selection.history.len(),
        selected: paths.len(),
        removals: selection.history.len(),
        informative_alignments: selection.model.n_observations(),
        unexplained_alignments: selection.model.n_unexplained(),
        discarded_alignments: selection.model.n_discarded(),
        resumed_from,
    };

    ComponentReport {
        component,
        paths,
        diagnostics,
    }
}
