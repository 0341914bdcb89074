use fnv::FnvHasher;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::hash::{Hash, Hasher};

use crate::criterion::{Aic, Bic, InformationCriterion, ModelFit};
use crate::observation::ObservationModel;
use crate::path::Path;
use crate::sampler::{
    normalize, CancelToken, ChainState, MetropolisSampler, NoCheckpoint, Posterior,
    SamplerError, SamplerSettings,
};

/// Share of uniform mass mixed into a warm start, so no path begins
/// at exactly zero.
const WARM_START_MIX: f64 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Aic,
    Bic,
    /// Keep every enumerated path.
    Single,
}

impl Default for SelectionMode {
    fn default() -> Self {
        SelectionMode::Aic
    }
}

impl SelectionMode {
    pub fn criterion(&self) -> Option<&'static dyn InformationCriterion> {
        match self {
            SelectionMode::Aic => Some(&Aic),
            SelectionMode::Bic => Some(&Bic),
            SelectionMode::Single => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionSettings {
    pub mode: SelectionMode,
    /// Length of the chain run for each tentative removal.
    pub refine_generations: usize,
    pub stall_threshold: usize,
    pub seed: u64,
}

/// One committed removal.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionStep {
    pub removed: Path,
    pub score_before: f64,
    pub score_after: f64,
    pub n_paths_after: usize,
}

/// The chosen path set and its estimate.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Indices into the full path set.
    pub kept: Vec<usize>,
    pub model: ObservationModel,
    pub posterior: Posterior,
    pub criterion: Option<&'static str>,
    pub score: Option<f64>,
    pub history: Vec<SelectionStep>,
}

#[derive(Debug, Clone)]
struct Candidate {
    kept: Vec<usize>,
    model: ObservationModel,
    posterior: Posterior,
    score: f64,
}

/// Greedy backward elimination over the paths of a full model.
pub struct ModelSelector<'a> {
    full: &'a ObservationModel,
    settings: SelectionSettings,
    cancel: &'a CancelToken,
}

impl<'a> ModelSelector<'a> {
    pub fn new(
        full: &'a ObservationModel,
        settings: SelectionSettings,
        cancel: &'a CancelToken,
    ) -> Self {
        ModelSelector {
            full,
            settings,
            cancel,
        }
    }

    /// Start from the full set's posterior and remove one path at a
    /// time while the criterion strictly improves.
    pub fn select(&self, posterior: Posterior) -> Result<Selection, SamplerError> {
        let all: Vec<usize> = (0..self.full.n_paths()).collect();
        let criterion = match self.settings.mode.criterion() {
            Some(criterion) => criterion,
            None => {
                return Ok(Selection {
                    kept: all,
                    model: self.full.clone(),
                    posterior,
                    criterion: None,
                    score: None,
                    history: Vec::new(),
                })
            }
        };

        let score = self.score(criterion, &posterior, all.len());
        let mut current = Candidate {
            kept: all,
            model: self.full.clone(),
            posterior,
            score,
        };
        info!(
            "{} with {} paths: {:.3}",
            criterion.name(),
            current.kept.len(),
            current.score
        );

        let mut history = Vec::new();
        let mut round = 0;
        while current.kept.len() > 1 {
            round += 1;
            let evaluated = (0..current.kept.len())
                .into_par_iter()
                .map(|pos| self.without(criterion, &current, pos, round))
                .collect::<Result<Vec<_>, _>>()?;

            let mut best: Option<(usize, Candidate)> = None;
            for (pos, candidate) in evaluated.into_iter().enumerate() {
                debug!(
                    "Round {}: without path {}, {} = {:.3}",
                    round,
                    current.kept[pos],
                    criterion.name(),
                    candidate.score
                );
                let better = best
                    .as_ref()
                    .map_or(true, |(_, b)| candidate.score < b.score);
                if better {
                    best = Some((pos, candidate));
                }
            }

            match best {
                Some((pos, candidate)) if candidate.score < current.score => {
                    let removed = current.kept[pos];
                    info!(
                        "Removing path {}: {} {:.3} -> {:.3}",
                        removed,
                        criterion.name(),
                        current.score,
                        candidate.score
                    );
                    history.push(SelectionStep {
                        removed: self.full.paths()[removed].clone(),
                        score_before: current.score,
                        score_after: candidate.score,
                        n_paths_after: candidate.kept.len(),
                    });
                    current = candidate;
                }
                _ => break,
            }
        }

        info!(
            "Kept {} of {} paths after {} removals",
            current.kept.len(),
            self.full.n_paths(),
            history.len()
        );
        Ok(Selection {
            kept: current.kept,
            model: current.model,
            posterior: current.posterior,
            criterion: Some(criterion.name()),
            score: Some(current.score),
            history,
        })
    }

    fn score(
        &self,
        criterion: &dyn InformationCriterion,
        posterior: &Posterior,
        n_paths: usize,
    ) -> f64 {
        criterion.score(&ModelFit {
            log_likelihood: posterior.log_likelihood,
            n_paths,
            n_observations: self.full.n_observations(),
        })
    }

    /// Re-estimate `current` without the path at `pos`, warm-started
    /// from the current mean with the removed mass spread over the
    /// rest.
    fn without(
        &self,
        criterion: &dyn InformationCriterion,
        current: &Candidate,
        pos: usize,
        round: usize,
    ) -> Result<Candidate, SamplerError> {
        let removed = current.kept[pos];
        let kept: Vec<usize> = current
            .kept
            .iter()
            .copied()
            .filter(|&ix| ix != removed)
            .collect();
        let model = self.full.restrict(&kept);

        let mut freqs: Vec<f64> = current
            .posterior
            .frequencies
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != pos)
            .map(|(_, f)| *f)
            .collect();
        normalize(&mut freqs);
        let uniform = 1.0 / freqs.len() as f64;
        if freqs.iter().sum::<f64>() <= 0.0 {
            freqs.iter_mut().for_each(|f| *f = uniform);
        } else {
            freqs
                .iter_mut()
                .for_each(|f| *f = *f * (1.0 - WARM_START_MIX) + uniform * WARM_START_MIX);
        }

        let state = ChainState::new(&model, freqs, self.refine_seed(round, removed))?;
        let refine = self.settings.refine_generations;
        let sampler = MetropolisSampler::new(
            &model,
            SamplerSettings {
                n_generations: refine,
                n_burn: refine / 5,
                checkpoint_interval: 0,
                stall_threshold: self.settings.stall_threshold,
                keep_trace: false,
            },
        );
        let posterior = sampler.run(state, &mut NoCheckpoint, self.cancel)?;
        let score = self.score(criterion, &posterior, kept.len());

        Ok(Candidate {
            kept,
            model,
            posterior,
            score,
        })
    }

    fn refine_seed(&self, round: usize, removed: usize) -> u64 {
        let mut hasher = FnvHasher::default();
        (self.settings.seed, round, removed).hash(&mut hasher);
        hasher.finish()
    }
}
