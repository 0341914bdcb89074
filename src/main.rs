use anyhow::{bail, Context, Result};
use log::{info, warn};

use std::path::PathBuf;

use pathfreq::aligner::{resolve_alignments, GraphAligner};
use pathfreq::checkpoint::CheckpointStore;
use pathfreq::config::RunConfig;
use pathfreq::engine::Estimator;
use pathfreq::gaf::GAFReader;
use pathfreq::parser::{GFAParser, ParserTolerance};
use pathfreq::sampler::CancelToken;
use pathfreq::writer;

/// A token cancelled by the first Ctrl-C, so running chains can flush
/// their checkpoints before the run stops.
fn interrupt_token() -> Result<CancelToken> {
    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, stopping after the current generation");
        handler.cancel();
    })
    .context("Failed to install interrupt handler")?;
    Ok(cancel)
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args: Vec<_> = std::env::args().collect();
    if args.len() != 2 {
        bail!("Usage: {} <run.json>", args[0]);
    }
    let config_path = PathBuf::from(&args[1]);
    let config = RunConfig::from_file(&config_path)
        .with_context(|| format!("Invalid run configuration {}", config_path.display()))?;
    let estimator = &config.estimator;

    let graph = GFAParser::new()
        .parse_file(&config.graph)
        .with_context(|| format!("Failed to read graph {}", config.graph.display()))?;
    info!(
        "Graph has {} contigs, {} edges and {} components",
        graph.contigs().len(),
        graph.edges().len(),
        graph.components().len()
    );

    let aligner = GraphAligner::new(config.aligner.clone().or_threads(estimator.processes));
    let gaf = resolve_alignments(
        &config.evidence,
        &config.graph,
        &config.output_dir,
        estimator.previous,
        &aligner,
    )?;
    let records = GAFReader::with_tolerance(ParserTolerance::IgnoreAll)
        .parse_file(&graph, &gaf)
        .with_context(|| format!("Failed to read alignments {}", gaf.display()))?;
    if records.is_empty() {
        warn!("No usable alignments in {}", gaf.display());
    }

    let store = CheckpointStore::open(config.checkpoint_dir(), estimator.previous)?;
    let outcomes = Estimator::new(&graph, estimator)
        .with_checkpoints(&store)
        .with_cancel(interrupt_token()?)
        .run(&records)?;

    writer::write_results(&config.output_dir, &graph, &outcomes).with_context(|| {
        format!("Failed to write results to {}", config.output_dir.display())
    })?;

    let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
    if failed > 0 && failed == outcomes.len() {
        bail!("All {} selected components failed", failed);
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn sigint_cancels_token() {
        let cancel = interrupt_token().unwrap();
        assert!(!cancel.is_cancelled());
        let status = Command::new("kill")
            .arg("-INT")
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        let start = Instant::now();
        while !cancel.is_cancelled() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(cancel.is_cancelled());
    }
}
