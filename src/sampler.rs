use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checkpoint::CheckpointError;
use crate::observation::ObservationModel;

const ADAPT_WINDOW: usize = 100;
const TARGET_ACCEPTANCE: f64 = 0.3;
const MIN_STEP: f64 = 1e-4;
const MAX_STEP: f64 = 0.5;
const INITIAL_STEP: f64 = 0.1;

/// Shared flag asking running chains to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initializing,
    BurningIn,
    Sampling,
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerSettings {
    pub n_generations: usize,
    pub n_burn: usize,
    /// Generations between checkpoints once burn-in is over; 0
    /// checkpoints only at the end.
    pub checkpoint_interval: usize,
    /// Consecutive rejections that count as a stall.
    pub stall_threshold: usize,
    /// Keep every post-burn-in frequency vector.
    pub keep_trace: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        SamplerSettings {
            n_generations: 10000,
            n_burn: 1000,
            checkpoint_interval: 1000,
            stall_threshold: 1000,
            keep_trace: false,
        }
    }
}

/// Everything needed to continue a chain exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub generation: usize,
    pub frequencies: Vec<f64>,
    pub log_likelihood: f64,
    pub rng: Xoshiro256PlusPlus,
    pub phase: Phase,
    pub step_size: f64,
    pub accepted: usize,
    pub proposed: usize,
    window_accepted: usize,
    window_proposed: usize,
    /// Running sum of post-burn-in samples.
    pub sample_sum: Vec<f64>,
    pub n_samples: usize,
    pub reject_run: usize,
    pub stalls: usize,
    /// Post-burn-in samples since the chain was last started or
    /// resumed. Not written to checkpoints.
    #[serde(skip)]
    pub trace: Vec<Vec<f64>>,
}

impl ChainState {
    pub fn new(
        model: &ObservationModel,
        frequencies: Vec<f64>,
        seed: u64,
    ) -> Result<Self, SamplerError> {
        let log_likelihood = model.log_likelihood(&frequencies);
        if !log_likelihood.is_finite() {
            return Err(SamplerError::NumericInstability {
                generation: 0,
                frequencies,
                log_likelihood,
            });
        }
        let n = frequencies.len();
        Ok(ChainState {
            generation: 0,
            frequencies,
            log_likelihood,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            phase: Phase::Initializing,
            step_size: INITIAL_STEP,
            accepted: 0,
            proposed: 0,
            window_accepted: 0,
            window_proposed: 0,
            sample_sum: vec![0.0; n],
            n_samples: 0,
            reject_run: 0,
            stalls: 0,
            trace: Vec::new(),
        })
    }

    pub fn uniform(model: &ObservationModel, seed: u64) -> Result<Self, SamplerError> {
        let n = model.n_paths();
        Self::new(model, vec![1.0 / n as f64; n], seed)
    }

    pub fn acceptance_rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

#[derive(Debug)]
pub enum SamplerError {
    /// The likelihood came out NaN or +inf.
    NumericInstability {
        generation: usize,
        frequencies: Vec<f64>,
        log_likelihood: f64,
    },
    Interrupted {
        generation: usize,
    },
    /// The chain state was built for a different number of paths.
    StateMismatch {
        expected: usize,
        found: usize,
    },
    Checkpoint(CheckpointError),
}

impl fmt::Display for SamplerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SamplerError::NumericInstability {
                generation,
                frequencies,
                log_likelihood,
            } => write!(
                f,
                "Non-finite log-likelihood {} at generation {} for frequencies {:?}",
                log_likelihood, generation, frequencies
            ),
            SamplerError::Interrupted { generation } => {
                write!(f, "Sampling interrupted at generation {}", generation)
            }
            SamplerError::StateMismatch { expected, found } => write!(
                f,
                "Chain state holds {} frequencies for {} paths",
                found, expected
            ),
            SamplerError::Checkpoint(err) => write!(f, "Checkpoint failed: {}", err),
        }
    }
}

impl std::error::Error for SamplerError {}

impl From<CheckpointError> for SamplerError {
    fn from(err: CheckpointError) -> Self {
        SamplerError::Checkpoint(err)
    }
}

/// Receives chain snapshots to persist.
pub trait CheckpointSink {
    fn save(&mut self, state: &ChainState) -> Result<(), CheckpointError>;
}

/// Discards every snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCheckpoint;

impl CheckpointSink for NoCheckpoint {
    fn save(&mut self, _state: &ChainState) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Posterior summary of a finished chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Posterior {
    /// Mean of the post-burn-in samples.
    pub frequencies: Vec<f64>,
    pub log_likelihood: f64,
    pub generations: usize,
    pub acceptance_rate: f64,
    pub stalls: usize,
    /// Post-burn-in samples of this run, when tracing is enabled.
    pub trace: Vec<Vec<f64>>,
}

/// Metropolis-Hastings over the frequency simplex of a fixed path set.
pub struct MetropolisSampler<'a> {
    model: &'a ObservationModel,
    settings: SamplerSettings,
}

impl<'a> MetropolisSampler<'a> {
    pub fn new(model: &'a ObservationModel, settings: SamplerSettings) -> Self {
        MetropolisSampler { model, settings }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Advance `state` to `n_generations`, writing checkpoints to
    /// `sink`. On cancellation a chain past burn-in flushes its state
    /// before returning `Interrupted`.
    pub fn run(
        &self,
        mut state: ChainState,
        sink: &mut dyn CheckpointSink,
        cancel: &CancelToken,
    ) -> Result<Posterior, SamplerError> {
        let settings = &self.settings;
        if state.frequencies.len() != self.model.n_paths() {
            return Err(SamplerError::StateMismatch {
                expected: self.model.n_paths(),
                found: state.frequencies.len(),
            });
        }

        if state.phase == Phase::Initializing {
            state.phase = if settings.n_burn > 0 {
                Phase::BurningIn
            } else {
                Phase::Sampling
            };
        }
        if state.generation > 0 {
            debug!(
                "Resuming chain over {} paths at generation {}",
                state.frequencies.len(),
                state.generation
            );
        }

        while state.generation < settings.n_generations {
            if cancel.is_cancelled() {
                if state.phase == Phase::Sampling {
                    sink.save(&state)?;
                }
                info!("Chain interrupted at generation {}", state.generation);
                return Err(SamplerError::Interrupted {
                    generation: state.generation,
                });
            }

            self.step(&mut state)?;
            state.generation += 1;

            if state.generation <= settings.n_burn {
                if state.generation % ADAPT_WINDOW == 0 {
                    adapt_step(&mut state);
                }
                if state.generation == settings.n_burn {
                    state.phase = Phase::Sampling;
                    debug!(
                        "Burn-in done, step size {:.4}, acceptance {:.3}",
                        state.step_size,
                        state.acceptance_rate()
                    );
                }
            } else {
                for (sum, f) in state.sample_sum.iter_mut().zip(state.frequencies.iter()) {
                    *sum += f;
                }
                state.n_samples += 1;
                if settings.keep_trace {
                    let sample = state.frequencies.clone();
                    state.trace.push(sample);
                }
                let since_burn = state.generation - settings.n_burn;
                if settings.checkpoint_interval > 0
                    && since_burn % settings.checkpoint_interval == 0
                    && state.generation < settings.n_generations
                {
                    sink.save(&state)?;
                }
            }
        }

        state.phase = Phase::Exhausted;
        sink.save(&state)?;
        self.summarize(state)
    }

    fn step(&self, state: &mut ChainState) -> Result<(), SamplerError> {
        let n = state.frequencies.len();
        if n < 2 {
            return Ok(());
        }
        state.proposed += 1;
        state.window_proposed += 1;

        let accepted = match propose(state) {
            Some(next) => {
                let ll = self.model.log_likelihood(&next);
                if ll.is_nan() || ll == f64::INFINITY {
                    return Err(SamplerError::NumericInstability {
                        generation: state.generation,
                        frequencies: next,
                        log_likelihood: ll,
                    });
                }
                let u: f64 = state.rng.gen();
                if ll >= state.log_likelihood || u.ln() < ll - state.log_likelihood {
                    state.frequencies = next;
                    state.log_likelihood = ll;
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if accepted {
            state.accepted += 1;
            state.window_accepted += 1;
            state.reject_run = 0;
        } else {
            state.reject_run += 1;
            if state.reject_run == self.settings.stall_threshold {
                state.stalls += 1;
                warn!(
                    "Sampler stall: {} consecutive rejections at generation {}",
                    state.reject_run, state.generation
                );
            }
        }
        Ok(())
    }

    fn summarize(&self, state: ChainState) -> Result<Posterior, SamplerError> {
        let mut frequencies = if state.n_samples > 0 {
            state
                .sample_sum
                .iter()
                .map(|s| s / state.n_samples as f64)
                .collect()
        } else {
            state.frequencies.clone()
        };
        normalize(&mut frequencies);

        let log_likelihood = self.model.log_likelihood(&frequencies);
        if log_likelihood.is_nan() {
            return Err(SamplerError::NumericInstability {
                generation: state.generation,
                frequencies,
                log_likelihood,
            });
        }

        let acceptance_rate = state.acceptance_rate();
        debug!(
            "Chain finished: {} generations, acceptance {:.3}, log-likelihood {:.3}",
            state.generation, acceptance_rate, log_likelihood
        );
        Ok(Posterior {
            frequencies,
            log_likelihood,
            generations: state.generation,
            acceptance_rate,
            stalls: state.stalls,
            trace: state.trace,
        })
    }
}

/// Move a uniform amount of mass between two distinct paths. None if
/// the move would make a frequency negative.
fn propose(state: &mut ChainState) -> Option<Vec<f64>> {
    let n = state.frequencies.len();
    let i = state.rng.gen_range(0..n);
    let mut j = state.rng.gen_range(0..n - 1);
    if j >= i {
        j += 1;
    }
    let s = state.step_size;
    let delta = state.rng.gen_range(-s..s);

    let mut next = state.frequencies.clone();
    next[i] += delta;
    next[j] -= delta;
    if next[i] < 0.0 || next[j] < 0.0 {
        return None;
    }
    normalize(&mut next);
    Some(next)
}

fn adapt_step(state: &mut ChainState) {
    if state.window_proposed > 0 {
        let rate = state.window_accepted as f64 / state.window_proposed as f64;
        let factor = if rate > TARGET_ACCEPTANCE { 1.25 } else { 0.8 };
        state.step_size = (state.step_size * factor).max(MIN_STEP).min(MAX_STEP);
    }
    state.window_accepted = 0;
    state.window_proposed = 0;
}

pub(crate) fn normalize(freqs: &mut [f64]) {
    let total: f64 = freqs.iter().sum();
    if total > 0.0 {
        freqs.iter_mut().for_each(|f| *f /= total);
    }
}
