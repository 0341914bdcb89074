use log::info;

use std::fmt::Write;
use std::fs;
use std::path::Path as FsPath;

use crate::engine::ComponentOutcome;
use crate::graph::{GraphModel, Step};
use crate::report::{ComponentReport, ReportedPath};

pub const PATHS_FILE: &str = "paths.gfa";
pub const SUMMARY_FILE: &str = "summary.tsv";

const SUMMARY_HEADER: &str = "component\tstatus\tcriterion\tscore\tcandidates\tselected\tremovals\tgenerations\tacceptance\tstalls\tinformative\tunexplained\tdiscarded\tresumed_from";

pub fn header_string() -> String {
    "H\tVN:Z:1.0".to_string()
}

fn contig_name(graph: &GraphModel, contig: usize) -> String {
    graph
        .contig_name(contig)
        .map(|n| n.to_string())
        .unwrap_or_else(|| contig.to_string())
}

// Write a contig as a sequence-less segment
pub fn write_segment<T: Write>(graph: &GraphModel, contig: usize, stream: &mut T) {
    let name = contig_name(graph, contig);
    let c = graph.contig(contig);
    write!(stream, "S\t{}\t*\tLN:i:{}\tDP:f:{}", name, c.length, c.depth)
        .expect("Error writing segment to stream");
}

pub fn write_link<T: Write>(graph: &GraphModel, from: Step, to: Step, overlap: usize, stream: &mut T) {
    let name = |s: Step| contig_name(graph, s.contig);
    write!(
        stream,
        "L\t{}\t{}\t{}\t{}\t{}M",
        name(from),
        from.orient,
        name(to),
        to.orient,
        overlap
    )
    .expect("Error writing link to stream");
}

// Write a reported path, with its frequency and circularity as tags
pub fn write_path<T: Write>(
    graph: &GraphModel,
    name: &str,
    reported: &ReportedPath,
    stream: &mut T,
) {
    let steps = reported.path.steps();
    write!(stream, "P\t{}\t{}\t", name, reported.label).expect("Error writing path to stream");
    if steps.len() < 2 {
        write!(stream, "*").unwrap();
    }
    steps.windows(2).enumerate().for_each(|(i, w)| {
        if i != 0 {
            write!(stream, ",").unwrap();
        }
        let overlap = graph
            .successors(w[0])
            .iter()
            .find(|(next, _)| *next == w[1])
            .map_or(0, |(_, o)| *o);
        write!(stream, "{}M", overlap).unwrap();
    });
    write!(
        stream,
        "\tFR:f:{:.6}\tCI:i:{}",
        reported.frequency,
        reported.path.is_circular() as u8
    )
    .unwrap();
}

pub fn path_name(component: usize, rank: usize) -> String {
    format!("component{}_path{}", component, rank + 1)
}

/// Segments, links and paths of every successful component.
pub fn paths_gfa_string(graph: &GraphModel, reports: &[&ComponentReport]) -> String {
    let mut result = header_string();
    result.push('\n');

    let mut contigs: Vec<usize> = reports
        .iter()
        .flat_map(|r| r.paths.iter())
        .flat_map(|p| p.path.contigs())
        .collect();
    contigs.sort_unstable();
    contigs.dedup();

    for &contig in contigs.iter() {
        write_segment(graph, contig, &mut result);
        result.push('\n');
    }
    for edge in graph.edges() {
        if contigs.binary_search(&edge.from.contig).is_ok()
            && contigs.binary_search(&edge.to.contig).is_ok()
        {
            write_link(graph, edge.from, edge.to, edge.overlap, &mut result);
            result.push('\n');
        }
    }
    for report in reports.iter() {
        for (rank, reported) in report.paths.iter().enumerate() {
            write_path(graph, &path_name(report.component, rank), reported, &mut result);
            result.push('\n');
        }
    }
    result
}

pub fn write_summary_row<T: Write>(outcome: &ComponentOutcome, stream: &mut T) {
    match &outcome.result {
        Ok(report) => {
            let d = &report.diagnostics;
            let opt = |v: Option<String>| v.unwrap_or_else(|| "*".to_string());
            write!(
                stream,
                "{}\tok\t{}\t{}\t{}\t{}\t{}\t{}\t{:.4}\t{}\t{}\t{}\t{}\t{}",
                report.component,
                d.criterion.unwrap_or("*"),
                opt(d.score.map(|s| format!("{:.4}", s))),
                d.candidates,
                d.selected,
                d.removals,
                d.generations,
                d.acceptance_rate,
                d.stalls,
                d.informative_alignments,
                d.unexplained_alignments,
                d.discarded_alignments,
                opt(d.resumed_from.map(|g| g.to_string())),
            )
            .expect("Error writing summary to stream");
        }
        Err(err) => {
            let message = err.to_string().replace('\t', " ");
            write!(stream, "{}\tfailed: {}", outcome.component, message)
                .expect("Error writing summary to stream");
            for _ in 0..12 {
                write!(stream, "\t*").unwrap();
            }
        }
    }
}

pub fn summary_string(outcomes: &[ComponentOutcome]) -> String {
    let mut result = SUMMARY_HEADER.to_string();
    result.push('\n');
    for outcome in outcomes {
        write_summary_row(outcome, &mut result);
        result.push('\n');
    }
    result
}

/// Write `paths.gfa` and `summary.tsv` into `dir`.
pub fn write_results<P: AsRef<FsPath>>(
    dir: P,
    graph: &GraphModel,
    outcomes: &[ComponentOutcome],
) -> std::io::Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let reports: Vec<&ComponentReport> = outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok())
        .collect();
    fs::write(dir.join(PATHS_FILE), paths_gfa_string(graph, &reports))?;
    fs::write(dir.join(SUMMARY_FILE), summary_string(outcomes))?;
    info!(
        "Wrote {} paths from {} components to {}",
        reports.iter().map(|r| r.paths.len()).sum::<usize>(),
        reports.len(),
        dir.display()
    );
    Ok(())
}
