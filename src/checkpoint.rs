use fnv::FnvHasher;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path as FsPath, PathBuf};

use crate::enumerate::{SearchBudget, SearchConstraints};
use crate::observation::{AlignmentFilter, UnexplainedPenalty};
use crate::path::Path;
use crate::sampler::{ChainState, CheckpointSink};

const SUFFIX: &str = ".checkpoint.json";

/// What to do with checkpoints left by an earlier run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviousRun {
    /// Refuse to start.
    Terminate,
    /// Continue compatible chains.
    Resume,
    /// Delete them and start over.
    Overwrite,
}

impl Default for PreviousRun {
    fn default() -> Self {
        PreviousRun::Terminate
    }
}

#[derive(Debug)]
pub enum CheckpointError {
    /// The checkpoint was written by a run with other inputs.
    Incompatible {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    PreviousRunExists(PathBuf),
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::Incompatible {
                path,
                expected,
                found,
            } => write!(
                f,
                "Checkpoint {} does not match this run (fingerprint {:016x}, expected {:016x})",
                path.display(),
                found,
                expected
            ),
            CheckpointError::PreviousRunExists(dir) => write!(
                f,
                "Checkpoints from a previous run exist in {}",
                dir.display()
            ),
            CheckpointError::Io(err) => write!(f, "IO error: {}", err),
            CheckpointError::Serde(err) => write!(f, "Malformed checkpoint: {}", err),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err)
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::Serde(err)
    }
}

/// The inputs that decide whether a saved chain may be continued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunIdentity {
    pub graph: u64,
    pub evidence: u64,
    pub filter: AlignmentFilter,
    pub constraints: SearchConstraints,
    pub budget: SearchBudget,
    pub max_copy: usize,
    /// Enumeration workers; the candidate set depends on how the
    /// generator is split.
    pub workers: usize,
    pub penalty: UnexplainedPenalty,
    pub n_burn: usize,
    pub seed: u64,
}

impl RunIdentity {
    /// Fingerprint over these inputs and a path set.
    pub fn fingerprint(&self, paths: &[Path]) -> u64 {
        let mut hasher = FnvHasher::default();
        self.graph.hash(&mut hasher);
        self.evidence.hash(&mut hasher);
        self.filter.min_identity.to_bits().hash(&mut hasher);
        self.filter.min_length.hash(&mut hasher);
        self.constraints.hash(&mut hasher);
        self.budget.hash(&mut hasher);
        self.max_copy.hash(&mut hasher);
        self.workers.hash(&mut hasher);
        match self.penalty {
            UnexplainedPenalty::Fixed(p) => (0u8, p.to_bits()).hash(&mut hasher),
            UnexplainedPenalty::RelativeToWeakest(p) => (1u8, p.to_bits()).hash(&mut hasher),
        }
        self.n_burn.hash(&mut hasher);
        self.seed.hash(&mut hasher);
        paths.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Checkpoint {
    pub component: usize,
    pub fingerprint: u64,
    pub paths: Vec<Path>,
    pub state: ChainState,
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    component: usize,
    fingerprint: u64,
    paths: &'a [Path],
    state: &'a ChainState,
}

/// Directory of per-component checkpoint files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    policy: PreviousRun,
}

impl CheckpointStore {
    /// Create the directory if needed and apply `policy` to any
    /// checkpoints already in it.
    pub fn open<P: AsRef<FsPath>>(dir: P, policy: PreviousRun) -> Result<Self, CheckpointError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let existing = list_checkpoints(&dir)?;
        if !existing.is_empty() {
            match policy {
                PreviousRun::Terminate => return Err(CheckpointError::PreviousRunExists(dir)),
                PreviousRun::Overwrite => {
                    for file in existing.iter() {
                        fs::remove_file(file)?;
                    }
                    info!(
                        "Removed {} checkpoints from {}",
                        existing.len(),
                        dir.display()
                    );
                }
                PreviousRun::Resume => {
                    info!(
                        "Found {} checkpoints to resume in {}",
                        existing.len(),
                        dir.display()
                    );
                }
            }
        }

        Ok(CheckpointStore { dir, policy })
    }

    pub fn dir(&self) -> &FsPath {
        &self.dir
    }

    pub fn file_for(&self, component: usize) -> PathBuf {
        self.dir.join(format!("component_{}{}", component, SUFFIX))
    }

    /// The saved chain for `component`, if resuming and one exists.
    /// The stored fingerprint has to match `identity` over the stored
    /// paths.
    pub fn load(
        &self,
        component: usize,
        identity: &RunIdentity,
    ) -> Result<Option<Checkpoint>, CheckpointError> {
        if self.policy != PreviousRun::Resume {
            return Ok(None);
        }
        let path = self.file_for(component);
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(&path)?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;
        let expected = identity.fingerprint(&checkpoint.paths);
        if checkpoint.fingerprint != expected || checkpoint.component != component {
            return Err(CheckpointError::Incompatible {
                path,
                expected,
                found: checkpoint.fingerprint,
            });
        }
        info!(
            "Resuming component {} from generation {}",
            component, checkpoint.state.generation
        );
        Ok(Some(checkpoint))
    }

    /// Write through a temporary file so a crash never leaves a
    /// truncated checkpoint.
    pub fn save(
        &self,
        component: usize,
        fingerprint: u64,
        paths: &[Path],
        state: &ChainState,
    ) -> Result<(), CheckpointError> {
        let target = self.file_for(component);
        let tmp = target.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(
                &mut writer,
                &CheckpointRef {
                    component,
                    fingerprint,
                    paths,
                    state,
                },
            )?;
            writer.flush()?;
        }
        fs::rename(&tmp, &target)?;
        debug!(
            "Checkpoint for component {} at generation {}",
            component, state.generation
        );
        Ok(())
    }

    pub fn sink<'a>(
        &'a self,
        component: usize,
        fingerprint: u64,
        paths: &'a [Path],
    ) -> ComponentSink<'a> {
        ComponentSink {
            store: self,
            component,
            fingerprint,
            paths,
        }
    }
}

/// Saves one component's chain into the store.
pub struct ComponentSink<'a> {
    store: &'a CheckpointStore,
    component: usize,
    fingerprint: u64,
    paths: &'a [Path],
}

impl<'a> CheckpointSink for ComponentSink<'a> {
    fn save(&mut self, state: &ChainState) -> Result<(), CheckpointError> {
        self.store
            .save(self.component, self.fingerprint, self.paths, state)
    }
}

fn list_checkpoints(dir: &FsPath) -> Result<Vec<PathBuf>, CheckpointError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_checkpoint = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(SUFFIX) || n.ends_with(".json.tmp"));
        if is_checkpoint {
            files.push(path);
        }
    }
    if files.iter().any(|f| f.extension().map_or(false, |e| e == "tmp")) {
        warn!("Found partially written checkpoints in {}", dir.display());
    }
    files.sort();
    Ok(files)
}
