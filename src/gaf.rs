use bstr::{io::BufReadExt, BString, ByteSlice};
use log::{debug, info, trace};

use nom::{bytes::complete::*, IResult};

use std::fs::File;
use std::io::BufReader;

use crate::graph::{GraphModel, Orientation, Step};
use crate::observation::AlignmentRecord;
use crate::optfields::OptionalFields;
use crate::parser::{
    ParseError, ParseFieldError, ParseFieldResult, ParseResult, ParserTolerance,
};

/// A GAF record, with the path kept as oriented segment names. Only
/// segment-ID paths are supported; rGFA stable intervals are not.
#[derive(Debug, Clone, PartialEq)]
pub struct GAF {
    pub seq_name: BString,
    pub seq_len: usize,
    pub seq_range: (usize, usize),
    pub strand: Orientation,
    pub path: Vec<(Orientation, BString)>,
    pub path_len: usize,
    pub path_range: (usize, usize),
    pub residue_matches: usize,
    pub block_length: usize,
    pub quality: u8,
    pub optional: OptionalFields,
}

impl GAF {
    /// Alignment identity, from the `id:f` tag written by graph
    /// aligners, or residue matches over block length.
    pub fn identity(&self) -> f64 {
        if let Some(id) = self.optional.get(b"id").and_then(|v| v.as_f64()) {
            return id;
        }
        if self.block_length == 0 {
            0.0
        } else {
            self.residue_matches as f64 / self.block_length as f64
        }
    }

    /// Number of path bases covered by the alignment.
    pub fn aligned_length(&self) -> usize {
        self.path_range.1.saturating_sub(self.path_range.0)
    }

    /// Resolve segment names against the graph.
    pub fn to_alignment(&self, graph: &GraphModel) -> ParseFieldResult<AlignmentRecord> {
        let walk = self
            .path
            .iter()
            .map(|(orient, name)| {
                graph
                    .contig_index(name)
                    .map(|ix| Step::new(ix, *orient))
                    .ok_or_else(|| ParseFieldError::UnknownContig(name.to_string()))
            })
            .collect::<ParseFieldResult<Vec<_>>>()?;

        Ok(AlignmentRecord {
            read_name: self.seq_name.clone(),
            identity: self.identity(),
            aligned_length: self.aligned_length(),
            walk,
        })
    }
}

// The steps in a GAF path use '>' and '<' to denote relative strand
fn parse_orient(bytes: &[u8]) -> IResult<&[u8], Orientation> {
    use nom::{branch::alt, combinator::map};
    use Orientation::*;

    let fwd = map(tag(">"), |_| Forward);
    let bwd = map(tag("<"), |_| Backward);
    alt((fwd, bwd))(bytes)
}

fn parse_step(i: &[u8]) -> IResult<&[u8], (Orientation, BString)> {
    let (i, orient) = parse_orient(i)?;
    let (i, name) = is_not("<>: \t\r\n")(i)?;
    Ok((i, (orient, name.into())))
}

pub(crate) fn parse_path(i: &[u8]) -> IResult<&[u8], Vec<(Orientation, BString)>> {
    use nom::{combinator::all_consuming, multi::many1};
    all_consuming(many1(parse_step))(i)
}

fn parse_next<'a, I, T>(input: &mut I, field: &'static str) -> ParseFieldResult<T>
where
    I: Iterator<Item = &'a [u8]>,
    T: std::str::FromStr,
{
    let bytes = input.next().ok_or(ParseFieldError::MissingFields)?;
    bytes
        .to_str()?
        .parse()
        .map_err(|_| ParseFieldError::InvalidField(field))
}

/// Parse a GAF record from a tab-delimited line
pub fn parse_gaf(line: &[u8]) -> ParseFieldResult<GAF> {
    let mut fields = line.split_str(b"\t");

    let seq_name = fields.next().ok_or(ParseFieldError::MissingFields)?.into();
    let seq_len = parse_next(&mut fields, "query length")?;
    let seq_start = parse_next(&mut fields, "query start")?;
    let seq_end = parse_next(&mut fields, "query end")?;
    let strand = Orientation::parse_error(
        fields
            .next()
            .and_then(Orientation::from_bytes_plus_minus),
    )?;

    let path_bytes = fields.next().ok_or(ParseFieldError::MissingFields)?;
    let (_, path) =
        parse_path(path_bytes).map_err(|_| ParseFieldError::InvalidField("path"))?;

    let path_len = parse_next(&mut fields, "path length")?;
    let path_start = parse_next(&mut fields, "path start")?;
    let path_end = parse_next(&mut fields, "path end")?;
    let residue_matches = parse_next(&mut fields, "residue matches")?;
    let block_length = parse_next(&mut fields, "block length")?;
    let quality = parse_next(&mut fields, "mapping quality")?;
    let optional = OptionalFields::parse(fields);

    Ok(GAF {
        seq_name,
        seq_len,
        seq_range: (seq_start, seq_end),
        strand,
        path,
        path_len,
        path_range: (path_start, path_end),
        residue_matches,
        block_length,
        quality,
        optional,
    })
}

/// Reads GAF files into alignment records against a loaded graph.
#[derive(Default, Debug, Clone)]
pub struct GAFReader {
    tolerance: ParserTolerance,
}

impl GAFReader {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_tolerance(tolerance: ParserTolerance) -> Self {
        GAFReader { tolerance }
    }

    fn read_line(
        &self,
        graph: &GraphModel,
        line: &[u8],
    ) -> ParseResult<AlignmentRecord> {
        let line = line.trim_end_with(|c| c == '\n' || c == '\r');
        if line.is_empty() {
            return Err(ParseError::EmptyLine);
        }
        parse_gaf(line)
            .and_then(|gaf| gaf.to_alignment(graph))
            .map_err(|err| ParseError::invalid_line(err, line))
    }

    fn push_line(
        &self,
        graph: &GraphModel,
        records: &mut Vec<AlignmentRecord>,
        line: &[u8],
    ) -> ParseResult<()> {
        match self.read_line(graph, line) {
            Ok(record) => records.push(record),
            Err(err) if err.can_safely_continue(&self.tolerance) => {
                trace!("Skipping alignment line: {}", err);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    pub fn parse_lines<I>(
        &self,
        graph: &GraphModel,
        lines: I,
    ) -> ParseResult<Vec<AlignmentRecord>>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut records = Vec::new();
        for line in lines {
            self.push_line(graph, &mut records, line.as_ref())?;
        }
        debug!("Parsed {} alignment records", records.len());
        Ok(records)
    }

    pub fn parse_file<P: AsRef<std::path::Path>>(
        &self,
        graph: &GraphModel,
        path: P,
    ) -> ParseResult<Vec<AlignmentRecord>> {
        let file = File::open(path.as_ref())?;
        let mut records = Vec::new();
        for line in BufReader::new(file).byte_lines() {
            self.push_line(graph, &mut records, &line?)?;
        }
        info!(
            "Read {} alignment records from {}",
            records.len(),
            path.as_ref().display()
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    fn two_contig_graph() -> GraphModel {
        let mut builder = GraphBuilder::new();
        builder.add_contig("s1", 100, 10.0).unwrap();
        builder.add_contig("s2", 200, 10.0).unwrap();
        builder
            .add_edge(Step::forward(0), Step::backward(1), 0)
            .unwrap();
        builder.build()
    }

    #[test]
    fn parse_gaf_steps() {
        use Orientation::*;

        let (i, step) = parse_step(b">s1<s2").unwrap();
        assert_eq!(b"<s2", i);
        assert_eq!((Forward, BString::from("s1")), step);

        let (_, path) = parse_path(b">s1<segmentid>s3").unwrap();
        assert_eq!(
            path,
            vec![
                (Forward, BString::from("s1")),
                (Backward, BString::from("segmentid")),
                (Forward, BString::from("s3"))
            ]
        );

        // stable ids and intervals are rejected
        assert!(parse_path(b"chr1").is_err());
        assert!(parse_path(b">chr1:5-8").is_err());
    }

    #[test]
    fn parse_gaf_line() {
        let line = b"read1\t6000\t10\t5990\t+\t>s1<s2\t300\t20\t280\t240\t260\t60\tid:f:0.95";
        let gaf = parse_gaf(line).unwrap();
        assert_eq!(gaf.seq_name, "read1");
        assert_eq!(gaf.seq_range, (10, 5990));
        assert_eq!(gaf.path_range, (20, 280));
        assert_eq!(gaf.aligned_length(), 260);
        assert_eq!(gaf.identity(), 0.95);
        assert_eq!(gaf.quality, 60);
    }

    #[test]
    fn identity_falls_back_to_matches() {
        let line = b"r\t100\t0\t100\t-\t>s1\t100\t0\t100\t90\t100\t0";
        let gaf = parse_gaf(line).unwrap();
        assert!((gaf.identity() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn records_resolve_against_graph() {
        let graph = two_contig_graph();
        let input = "r1\t300\t0\t300\t+\t>s1<s2\t300\t0\t300\t290\t300\t60\n\
                     r2\t300\t0\t300\t+\t>s1>unknown\t300\t0\t300\t290\t300\t60\n";

        let strict = GAFReader::new();
        assert!(strict.parse_lines(&graph, input.lines()).is_err());

        let lenient = GAFReader::with_tolerance(ParserTolerance::IgnoreAll);
        let records = lenient.parse_lines(&graph, input.lines()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].walk, vec![Step::forward(0), Step::backward(1)]);
        assert_eq!(records[0].aligned_length, 300);
    }
}
