use serde::{Deserialize, Serialize};

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::aligner::GraphAlignerConfig;
use crate::checkpoint::PreviousRun;
use crate::components::{ComponentSelection, SelectionError};
use crate::enumerate::{Composition, SearchBudget, SearchConstraints, Topology};
use crate::model_selection::{SelectionMode, SelectionSettings};
use crate::observation::{AlignmentFilter, UnexplainedPenalty};
use crate::sampler::SamplerSettings;

#[derive(Debug)]
pub enum ConfigError {
    Invalid(String),
    Selection(SelectionError),
    MissingInput(PathBuf),
    IOError(std::io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
            ConfigError::Selection(err) => write!(f, "{}", err),
            ConfigError::MissingInput(path) => {
                write!(f, "Input file {} does not exist", path.display())
            }
            ConfigError::IOError(err) => write!(f, "IO error: {}", err),
            ConfigError::Json(err) => write!(f, "Malformed configuration: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<SelectionError> for ConfigError {
    fn from(err: SelectionError) -> Self {
        ConfigError::Selection(err)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IOError(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Json(err)
    }
}

fn invalid(msg: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(msg))
}

mod defaults {
    pub fn min_valid_search() -> usize {
        1000
    }
    pub fn max_valid_search() -> usize {
        100_000
    }
    pub fn min_alignment_identity() -> f64 {
        0.85
    }
    pub fn min_alignment_length() -> usize {
        5000
    }
    pub fn n_generations() -> usize {
        10_000
    }
    pub fn n_burn() -> usize {
        1000
    }
    pub fn seed() -> u64 {
        12345
    }
    pub fn processes() -> usize {
        1
    }
    pub fn checkpoint_interval() -> usize {
        1000
    }
    pub fn refine_generations() -> usize {
        2000
    }
    pub fn stall_threshold() -> usize {
        1000
    }
    pub fn max_copy() -> usize {
        8
    }
    pub fn output_dir() -> std::path::PathBuf {
        "./".into()
    }
}

/// Estimator settings. Topology and composition have no default and
/// must always be given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EstimatorConfig {
    pub topology: Topology,
    pub composition: Composition,
    #[serde(default)]
    pub criterion: SelectionMode,
    #[serde(default = "defaults::min_valid_search")]
    pub min_valid_search: usize,
    #[serde(default = "defaults::max_valid_search")]
    pub max_valid_search: usize,
    #[serde(default = "defaults::min_alignment_identity")]
    pub min_alignment_identity: f64,
    #[serde(default = "defaults::min_alignment_length")]
    pub min_alignment_length: usize,
    #[serde(default)]
    pub graph_selection: ComponentSelection,
    #[serde(default = "defaults::n_generations")]
    pub n_generations: usize,
    #[serde(default = "defaults::n_burn")]
    pub n_burn: usize,
    #[serde(default = "defaults::seed")]
    pub seed: u64,
    #[serde(default = "defaults::processes")]
    pub processes: usize,
    #[serde(default)]
    pub out_seq_threshold: f64,
    #[serde(default)]
    pub previous: PreviousRun,
    #[serde(default = "defaults::checkpoint_interval")]
    pub checkpoint_interval: usize,
    #[serde(default = "defaults::refine_generations")]
    pub refine_generations: usize,
    #[serde(default = "defaults::stall_threshold")]
    pub stall_threshold: usize,
    #[serde(default = "defaults::max_copy")]
    pub max_copy: usize,
    #[serde(default)]
    pub unexplained_penalty: UnexplainedPenalty,
    #[serde(default)]
    pub keep_trace: bool,
}

impl EstimatorConfig {
    /// Defaults for everything but the two required constraints.
    pub fn new(topology: Topology, composition: Composition) -> Self {
        EstimatorConfig {
            topology,
            composition,
            criterion: SelectionMode::default(),
            min_valid_search: defaults::min_valid_search(),
            max_valid_search: defaults::max_valid_search(),
            min_alignment_identity: defaults::min_alignment_identity(),
            min_alignment_length: defaults::min_alignment_length(),
            graph_selection: ComponentSelection::default(),
            n_generations: defaults::n_generations(),
            n_burn: defaults::n_burn(),
            seed: defaults::seed(),
            processes: defaults::processes(),
            out_seq_threshold: 0.0,
            previous: PreviousRun::default(),
            checkpoint_interval: defaults::checkpoint_interval(),
            refine_generations: defaults::refine_generations(),
            stall_threshold: defaults::stall_threshold(),
            max_copy: defaults::max_copy(),
            unexplained_penalty: UnexplainedPenalty::default(),
            keep_trace: false,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_valid_search == 0 {
            invalid("min_valid_search must be positive".to_string())?;
        }
        if self.max_valid_search < self.min_valid_search {
            invalid(format!(
                "max_valid_search ({}) is below min_valid_search ({})",
                self.max_valid_search, self.min_valid_search
            ))?;
        }
        if !(0.0..=1.0).contains(&self.min_alignment_identity) {
            invalid(format!(
                "min_alignment_identity {} is outside [0, 1]",
                self.min_alignment_identity
            ))?;
        }
        if self.min_alignment_length < 100 {
            invalid(format!(
                "min_alignment_length {} is below 100",
                self.min_alignment_length
            ))?;
        }
        if !(0.0..=1.0).contains(&self.out_seq_threshold) {
            invalid(format!(
                "out_seq_threshold {} is outside [0, 1]",
                self.out_seq_threshold
            ))?;
        }
        if self.n_burn >= self.n_generations {
            invalid(format!(
                "n_burn ({}) must be below n_generations ({})",
                self.n_burn, self.n_generations
            ))?;
        }
        if self.refine_generations < 5 {
            invalid("refine_generations must be at least 5".to_string())?;
        }
        for (name, value) in [
            ("processes", self.processes),
            ("max_copy", self.max_copy),
            ("stall_threshold", self.stall_threshold),
        ]
        .iter()
        {
            if *value == 0 {
                invalid(format!("{} must be positive", name))?;
            }
        }
        let penalty = match self.unexplained_penalty {
            UnexplainedPenalty::Fixed(p) | UnexplainedPenalty::RelativeToWeakest(p) => p,
        };
        if !penalty.is_finite() || penalty > 0.0 {
            invalid(format!(
                "unexplained penalty {} must be a finite log-probability",
                penalty
            ))?;
        }
        self.graph_selection.check_form()?;
        Ok(())
    }

    pub fn filter(&self) -> AlignmentFilter {
        AlignmentFilter {
            min_identity: self.min_alignment_identity,
            min_length: self.min_alignment_length,
        }
    }

    pub fn constraints(&self) -> SearchConstraints {
        SearchConstraints {
            topology: self.topology,
            composition: self.composition,
        }
    }

    pub fn budget(&self) -> SearchBudget {
        SearchBudget {
            min_valid: self.min_valid_search,
            max_attempts: self.max_valid_search,
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            n_generations: self.n_generations,
            n_burn: self.n_burn,
            checkpoint_interval: self.checkpoint_interval,
            stall_threshold: self.stall_threshold,
            keep_trace: self.keep_trace,
        }
    }

    pub fn selection_settings(&self, seed: u64) -> SelectionSettings {
        SelectionSettings {
            mode: self.criterion,
            refine_generations: self.refine_generations,
            stall_threshold: self.stall_threshold,
            seed,
        }
    }
}

/// Where the read evidence comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    /// Precomputed GAF alignments.
    Alignments(PathBuf),
    /// Long reads to align against the graph first.
    Reads(PathBuf),
}

impl EvidenceSource {
    pub fn path(&self) -> &Path {
        match self {
            EvidenceSource::Alignments(p) | EvidenceSource::Reads(p) => p,
        }
    }
}

/// A complete invocation, as read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub graph: PathBuf,
    pub evidence: EvidenceSource,
    #[serde(default = "defaults::output_dir")]
    pub output_dir: PathBuf,
    /// Defaults to `checkpoints` inside the output directory.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub aligner: GraphAlignerConfig,
    pub estimator: EstimatorConfig,
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = File::open(path.as_ref())?;
        let config: RunConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for input in [self.graph.as_path(), self.evidence.path()].iter() {
            if !input.exists() {
                return Err(ConfigError::MissingInput(input.to_path_buf()));
            }
        }
        self.estimator.validate()
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("checkpoints"))
    }
}
