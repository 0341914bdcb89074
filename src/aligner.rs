use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::checkpoint::PreviousRun;
use crate::config::EvidenceSource;

/// Name of the alignment file produced from raw reads.
pub const ALIGNMENT_FILE: &str = "alignment.gaf";

/// Settings for the external GraphAligner executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphAlignerConfig {
    pub executable: PathBuf,
    /// Passed through `-x`.
    pub preset: String,
    /// Falls back to the estimator's `processes` when unset.
    pub threads: Option<usize>,
    pub extra_args: Vec<String>,
}

impl Default for GraphAlignerConfig {
    fn default() -> Self {
        GraphAlignerConfig {
            executable: "GraphAligner".into(),
            preset: "vg".to_string(),
            threads: None,
            extra_args: Vec::new(),
        }
    }
}

impl GraphAlignerConfig {
    /// Use `threads` unless a thread count was configured.
    pub fn or_threads(mut self, threads: usize) -> Self {
        self.threads = self.threads.or(Some(threads));
        self
    }
}

/// Aligns long reads to a graph, writing GAF to `output`.
pub trait ReadAligner {
    fn align(&self, graph: &Path, reads: &Path, output: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct GraphAligner {
    config: GraphAlignerConfig,
}

impl GraphAligner {
    pub fn new(config: GraphAlignerConfig) -> Self {
        GraphAligner { config }
    }

    pub fn get_args(&self, graph: &Path, reads: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-g".into(),
            graph.into(),
            "-f".into(),
            reads.into(),
            "-a".into(),
            output.into(),
            "-x".into(),
            self.config.preset.as_str().into(),
            "-t".into(),
            self.config.threads.unwrap_or(1).max(1).to_string().into(),
        ];
        args.extend(self.config.extra_args.iter().map(OsString::from));
        args
    }
}

impl ReadAligner for GraphAligner {
    fn align(&self, graph: &Path, reads: &Path, output: &Path) -> Result<()> {
        let args = self.get_args(graph, reads, output);
        debug!("Running {} {:?}", self.config.executable.display(), args);
        let status = Command::new(&self.config.executable)
            .args(&args)
            .status()
            .with_context(|| {
                format!("Failed to start {}", self.config.executable.display())
            })?;
        if !status.success() {
            bail!(
                "{} exited with {} while aligning {}",
                self.config.executable.display(),
                status,
                reads.display()
            );
        }
        if !output.exists() {
            bail!("{} produced no output at {}", self.config.executable.display(), output.display());
        }
        Ok(())
    }
}

/// The GAF file to read: either the one given, or one produced by
/// aligning the reads into `work_dir`. An alignment file left by an
/// earlier run is reused only when resuming; `Overwrite` realigns and
/// `Terminate` refuses to touch it.
pub fn resolve_alignments(
    source: &EvidenceSource,
    graph: &Path,
    work_dir: &Path,
    previous: PreviousRun,
    aligner: &dyn ReadAligner,
) -> Result<PathBuf> {
    match source {
        EvidenceSource::Alignments(gaf) => Ok(gaf.clone()),
        EvidenceSource::Reads(reads) => {
            std::fs::create_dir_all(work_dir)?;
            let output = work_dir.join(ALIGNMENT_FILE);
            if output.exists() {
                match previous {
                    PreviousRun::Resume => {
                        info!("Reusing alignments in {}", output.display());
                        return Ok(output);
                    }
                    PreviousRun::Overwrite => {
                        info!("Removing alignments of a previous run in {}", output.display());
                        std::fs::remove_file(&output)?;
                    }
                    PreviousRun::Terminate => bail!(
                        "{} exists from a previous run; resume or overwrite it",
                        output.display()
                    ),
                }
            }
            info!("Aligning {} to {}", reads.display(), graph.display());
            aligner.align(graph, reads, &output)?;
            Ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeAligner {
        calls: Cell<usize>,
    }

    impl ReadAligner for FakeAligner {
        fn align(&self, _graph: &Path, _reads: &Path, output: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            std::fs::write(output, "")?;
            Ok(())
        }
    }

    #[test]
    fn graphaligner_arguments() {
        let aligner = GraphAligner::new(GraphAlignerConfig {
            threads: Some(4),
            extra_args: vec!["--seeds-mxm-length".to_string(), "30".to_string()],
            ..Default::default()
        });
        let args = aligner.get_args(Path::new("g.gfa"), Path::new("r.fq"), Path::new("o.gaf"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "-g", "g.gfa", "-f", "r.fq", "-a", "o.gaf", "-x", "vg", "-t", "4",
                "--seeds-mxm-length", "30"
            ]
        );
    }

    #[test]
    fn configured_threads_win_over_processes() {
        let unset = GraphAlignerConfig::default().or_threads(6);
        assert_eq!(unset.threads, Some(6));
        let set = GraphAlignerConfig {
            threads: Some(2),
            ..Default::default()
        }
        .or_threads(6);
        assert_eq!(set.threads, Some(2));
    }

    #[test]
    fn reads_are_aligned_once_when_resuming() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeAligner {
            calls: Cell::new(0),
        };
        let source = EvidenceSource::Reads(dir.path().join("reads.fq"));
        let graph = dir.path().join("g.gfa");

        let gaf =
            resolve_alignments(&source, &graph, dir.path(), PreviousRun::Resume, &fake).unwrap();
        assert_eq!(gaf, dir.path().join(ALIGNMENT_FILE));
        resolve_alignments(&source, &graph, dir.path(), PreviousRun::Resume, &fake).unwrap();
        assert_eq!(fake.calls.get(), 1);

        let given = EvidenceSource::Alignments(PathBuf::from("x.gaf"));
        let gaf =
            resolve_alignments(&given, &graph, dir.path(), PreviousRun::Terminate, &fake).unwrap();
        assert_eq!(gaf, PathBuf::from("x.gaf"));
        assert_eq!(fake.calls.get(), 1);
    }

    #[test]
    fn previous_alignments_follow_policy() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeAligner {
            calls: Cell::new(0),
        };
        let source = EvidenceSource::Reads(dir.path().join("reads.fq"));
        let graph = dir.path().join("g.gfa");
        let stale = dir.path().join(ALIGNMENT_FILE);
        std::fs::write(&stale, "stale").unwrap();

        assert!(
            resolve_alignments(&source, &graph, dir.path(), PreviousRun::Terminate, &fake).is_err()
        );
        assert_eq!(fake.calls.get(), 0);
        assert_eq!(std::fs::read_to_string(&stale).unwrap(), "stale");

        let gaf =
            resolve_alignments(&source, &graph, dir.path(), PreviousRun::Overwrite, &fake).unwrap();
        assert_eq!(fake.calls.get(), 1);
        assert_eq!(std::fs::read_to_string(&gaf).unwrap(), "");
    }

    #[test]
    fn missing_executable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let aligner = GraphAligner::new(GraphAlignerConfig {
            executable: dir.path().join("no-such-aligner"),
            ..Default::default()
        });
        let out = dir.path().join("o.gaf");
        assert!(aligner
            .align(Path::new("g.gfa"), Path::new("r.fq"), &out)
            .is_err());
    }
}
