mod error;

pub use self::error::*;

use bstr::{io::BufReadExt, BString, ByteSlice};
use lazy_static::lazy_static;
use log::{debug, info, trace};
use regex::bytes::Regex;

use std::fs::File;
use std::io::BufReader;

use crate::graph::{GraphBuilder, GraphModel, Orientation, Step};
use crate::optfields::OptionalFields;

/// Depth tags, in order of preference. The first two hold a mean
/// depth; the rest hold total counts that are divided by the length.
const DEPTH_TAGS: [&[u8; 2]; 5] = [b"DP", b"dp", b"KC", b"RC", b"FC"];

/// A GFA segment line reduced to what the estimator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentLine {
    pub name: BString,
    pub length: usize,
    pub depth: f64,
}

/// A GFA link line; the overlap is the number of reference bases the
/// overlap CIGAR consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkLine {
    pub from_segment: BString,
    pub from_orient: Orientation,
    pub to_segment: BString,
    pub to_orient: Orientation,
    pub overlap: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GFALine {
    Segment(SegmentLine),
    Link(LinkLine),
    /// Header, comment, path, walk and containment lines are valid
    /// GFA but carry nothing the estimator uses.
    Ignored,
}

/// Reads GFA1 segment and link lines into a `GraphModel`.
#[derive(Default, Debug, Clone)]
pub struct GFAParser {
    tolerance: ParserTolerance,
}

impl GFAParser {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_tolerance(tolerance: ParserTolerance) -> Self {
        GFAParser { tolerance }
    }

    pub fn parse_gfa_line(&self, line: &[u8]) -> ParseResult<GFALine> {
        let line = line.trim_end_with(|c| c == '\n' || c == '\r');
        if line.is_empty() {
            return Err(ParseError::EmptyLine);
        }
        let mut fields = line.split_str(b"\t");
        let hdr = fields.next().ok_or(ParseError::EmptyLine)?;

        let result = match hdr {
            b"S" => parse_segment(fields).map(GFALine::Segment),
            b"L" => parse_link(fields).map(GFALine::Link),
            b"H" | b"P" | b"C" | b"W" => Ok(GFALine::Ignored),
            _ if hdr.starts_with(b"#") => Ok(GFALine::Ignored),
            _ => return Err(ParseError::UnknownLineType),
        };

        result.map_err(|err| ParseError::invalid_line(err, line))
    }

    pub fn parse_lines<I>(&self, lines: I) -> ParseResult<GraphModel>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut acc = GraphAccumulator::default();
        for line in lines {
            self.accumulate(&mut acc, line.as_ref())?;
        }
        self.finish(acc)
    }

    pub fn parse_file<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> ParseResult<GraphModel> {
        let file = File::open(path.as_ref())?;
        let mut acc = GraphAccumulator::default();
        for line in BufReader::new(file).byte_lines() {
            self.accumulate(&mut acc, &line?)?;
        }
        debug!("Read graph file {}", path.as_ref().display());
        self.finish(acc)
    }

    fn accumulate(
        &self,
        acc: &mut GraphAccumulator,
        line: &[u8],
    ) -> ParseResult<()> {
        match self.parse_gfa_line(line) {
            Ok(GFALine::Segment(seg)) => {
                acc.builder.add_contig(&seg.name, seg.length, seg.depth)?;
            }
            Ok(GFALine::Link(link)) => acc.links.push((link, BString::from(line))),
            Ok(GFALine::Ignored) => (),
            Err(err) if err.can_safely_continue(&self.tolerance) => {
                trace!("Skipping graph line: {}", err);
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn finish(&self, acc: GraphAccumulator) -> ParseResult<GraphModel> {
        let GraphAccumulator { mut builder, links } = acc;
        let mut skipped = 0;

        for (link, raw) in links {
            let lookup = |name: &BString| {
                builder.contig_index(name).ok_or_else(|| {
                    ParseFieldError::UnknownContig(name.to_string())
                })
            };
            let resolved = lookup(&link.from_segment)
                .and_then(|from| lookup(&link.to_segment).map(|to| (from, to)));
            match resolved {
                Ok((from, to)) => builder.add_edge(
                    Step::new(from, link.from_orient),
                    Step::new(to, link.to_orient),
                    link.overlap,
                )?,
                Err(field_err) => {
                    let err = ParseError::invalid_line(field_err, &raw);
                    if !err.can_safely_continue(&self.tolerance) {
                        return Err(err);
                    }
                    skipped += 1;
                }
            }
        }

        let graph = builder.build();
        info!(
            "Loaded graph with {} contigs, {} links, {} components",
            graph.contigs().len(),
            graph.edges().len(),
            graph.components().len()
        );
        if skipped > 0 {
            info!("Skipped {} links to undeclared contigs", skipped);
        }
        Ok(graph)
    }
}

#[derive(Default)]
struct GraphAccumulator {
    builder: GraphBuilder,
    links: Vec<(LinkLine, BString)>,
}

fn parse_name(input: &[u8]) -> ParseFieldResult<BString> {
    lazy_static! {
        static ref RE: Regex = Regex::new(r"(?-u)^[!-)+-<>-~][!-~]*$").unwrap();
    }
    if RE.is_match(input) {
        Ok(BString::from(input))
    } else {
        Err(ParseFieldError::InvalidField("name"))
    }
}

fn parse_orient(input: Option<&[u8]>) -> ParseFieldResult<Orientation> {
    let input = input.ok_or(ParseFieldError::MissingFields)?;
    Orientation::parse_error(Orientation::from_bytes_plus_minus(input))
}

fn parse_segment<'a, I>(mut fields: I) -> ParseFieldResult<SegmentLine>
where
    I: Iterator<Item = &'a [u8]>,
{
    let name = parse_name(fields.next().ok_or(ParseFieldError::MissingFields)?)?;
    let sequence = fields.next().ok_or(ParseFieldError::MissingFields)?;
    let optional = OptionalFields::parse(fields);

    let length = match optional.get(b"LN").and_then(|v| v.as_int()) {
        Some(len) if len >= 0 => len as usize,
        Some(_) => return Err(ParseFieldError::InvalidField("LN")),
        None if sequence != b"*" => sequence.len(),
        None => return Err(ParseFieldError::InvalidField("LN")),
    };

    let depth = match optional.first_number(&DEPTH_TAGS) {
        Some((tag, dp)) if tag == b"DP" || tag == b"dp" => dp,
        Some((_, count)) if length > 0 => count / length as f64,
        _ => 1.0,
    };
    if !depth.is_finite() || depth < 0.0 {
        return Err(ParseFieldError::InvalidField("depth"));
    }

    Ok(SegmentLine {
        name,
        length,
        depth,
    })
}

fn parse_link<'a, I>(mut fields: I) -> ParseFieldResult<LinkLine>
where
    I: Iterator<Item = &'a [u8]>,
{
    let from_segment =
        parse_name(fields.next().ok_or(ParseFieldError::MissingFields)?)?;
    let from_orient = parse_orient(fields.next())?;
    let to_segment =
        parse_name(fields.next().ok_or(ParseFieldError::MissingFields)?)?;
    let to_orient = parse_orient(fields.next())?;
    let overlap = match fields.next() {
        Some(ov) => parse_overlap(ov)?,
        None => 0,
    };

    Ok(LinkLine {
        from_segment,
        from_orient,
        to_segment,
        to_orient,
        overlap,
    })
}

/// Length of an overlap CIGAR on the reference, "*" being none.
pub(crate) fn parse_overlap(input: &[u8]) -> ParseFieldResult<usize> {
    use nom::{
        character::complete::{digit1, one_of},
        combinator::{all_consuming, map_res},
        multi::many1,
        sequence::pair,
        IResult,
    };

    if input == b"*" {
        return Ok(0);
    }

    let op_len = map_res(digit1, |bs: &[u8]| {
        std::str::from_utf8(bs)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or(())
    });
    let result: IResult<&[u8], Vec<(usize, char)>> =
        all_consuming(many1(pair(op_len, one_of("MIDNSHP=X"))))(input);

    let (_, ops) = result.map_err(|_| ParseFieldError::InvalidField("overlap"))?;
    Ok(ops
        .into_iter()
        .filter(|(_, op)| "MDN=X".contains(*op))
        .map(|(len, _)| len)
        .sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIL_GFA: &str = "H\tVN:Z:1.0
S\tctg1\t*\tLN:i:1000\tDP:f:30.0
S\tctg2\tACGTACGTAC\tKC:i:200
S\tctg3\t*\tLN:i:400\tdp:f:60
L\tctg1\t+\tctg2\t-\t5M
L\tctg2\t-\tctg3\t+\t*
L\tctg3\t+\tctg1\t+\t2M1I3M
P\tp1\tctg1+,ctg2-\t5M
";

    #[test]
    fn can_parse_segment() {
        let parser = GFAParser::new();
        let line = parser
            .parse_gfa_line(b"S\t11\tACCTT\tLN:i:123\tRC:i:246")
            .unwrap();
        assert_eq!(
            line,
            GFALine::Segment(SegmentLine {
                name: "11".into(),
                length: 123,
                depth: 2.0,
            })
        );
    }

    #[test]
    fn can_parse_link() {
        let parser = GFAParser::new();
        let line = parser.parse_gfa_line(b"L\t11\t+\t12\t-\t4M").unwrap();
        assert_eq!(
            line,
            GFALine::Link(LinkLine {
                from_segment: "11".into(),
                from_orient: Orientation::Forward,
                to_segment: "12".into(),
                to_orient: Orientation::Backward,
                overlap: 4,
            })
        );
    }

    #[test]
    fn overlap_cigars() {
        assert_eq!(parse_overlap(b"*").unwrap(), 0);
        assert_eq!(parse_overlap(b"10M").unwrap(), 10);
        assert_eq!(parse_overlap(b"2M1I3M2D").unwrap(), 7);
        assert!(parse_overlap(b"M10").is_err());
        assert!(parse_overlap(b"10M3").is_err());
    }

    #[test]
    fn segment_without_length_is_invalid() {
        let parser = GFAParser::new();
        let err = parser.parse_gfa_line(b"S\tx\t*\tDP:f:3.0").unwrap_err();
        assert!(matches!(err, ParseError::InvalidLine(_, _)));
    }

    #[test]
    fn can_parse_gfa_lines() {
        let parser = GFAParser::new();
        let graph = parser.parse_lines(LIL_GFA.lines()).unwrap();

        assert_eq!(graph.contigs().len(), 3);
        assert_eq!(graph.edges().len(), 3);
        assert_eq!(graph.components().len(), 1);

        let c1 = graph.contig_index("ctg1").unwrap();
        let c2 = graph.contig_index("ctg2").unwrap();
        let c3 = graph.contig_index("ctg3").unwrap();
        assert_eq!(graph.contig(c1).depth, 30.0);
        assert_eq!(graph.contig(c2).length, 10);
        assert_eq!(graph.contig(c2).depth, 20.0);
        assert_eq!(graph.contig(c3).depth, 60.0);

        assert!(graph.has_edge(Step::forward(c1), Step::backward(c2)));
        assert!(graph.has_edge(Step::forward(c2), Step::backward(c1)));
        assert!(graph.has_edge(Step::backward(c2), Step::forward(c3)));
    }

    #[test]
    fn tolerance_controls_bad_lines() {
        let input = "S\ta\t*\tLN:i:10\nX\tweird\nL\ta\t+\tb\t+\t0M\n";

        let safe = GFAParser::new();
        assert!(safe.parse_lines(input.lines()).is_err());

        let lenient = GFAParser::with_tolerance(ParserTolerance::IgnoreAll);
        let graph = lenient.parse_lines(input.lines()).unwrap();
        assert_eq!(graph.contigs().len(), 1);
        assert_eq!(graph.edges().len(), 0);

        let pedantic = GFAParser::with_tolerance(ParserTolerance::Pedantic);
        assert!(pedantic.parse_lines("\nS\ta\t*\tLN:i:1".lines()).is_err());
    }

    #[test]
    fn can_parse_gfa_file() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LIL_GFA.as_bytes()).unwrap();

        let graph = GFAParser::new().parse_file(file.path()).unwrap();
        assert_eq!(graph.contigs().len(), 3);
        assert_eq!(graph.components()[0].contigs, vec![0, 1, 2]);
    }
}
