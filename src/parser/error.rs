use std::{error, fmt};

use bstr::ByteSlice;

use crate::graph::GraphError;

pub type ParseFieldResult<T> = Result<T, ParseFieldError>;
pub type ParseResult<T> = Result<T, ParseError>;

/// How strictly malformed input lines are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserTolerance {
    /// Skip every line that fails to parse.
    IgnoreAll,
    /// Skip empty lines and unknown line types, fail on the rest.
    Safe,
    /// Fail on anything unexpected.
    Pedantic,
}

impl Default for ParserTolerance {
    fn default() -> Self {
        Self::Safe
    }
}

#[derive(Debug, Clone)]
pub enum ParseFieldError {
    /// A bytestring couldn't be parsed as a bytestring, can happen
    /// when the contents aren't UTF8.
    Utf8Error,
    /// A field couldn't be parsed into the correct type
    ParseFromStringError,
    /// Attempted to parse an orientation that wasn't + or -.
    OrientationError,
    /// A required field was incorrectly formatted. Includes the field
    /// name.
    InvalidField(&'static str),
    /// A line refers to a contig that was never declared.
    UnknownContig(String),
    MissingFields,
}

macro_rules! impl_many_from {
    ($to:ty, ($from:ty, $out:expr)) => (
        impl From<$from> for $to {
            fn from(_: $from) -> Self {
                $out
            }
        }
    );
    ($to:ty, ($from:ty, $out:expr), $(($f:ty, $o:expr)),* $(,)?) => (
        impl_many_from!($to, ($from, $out));
        impl_many_from!($to, $(($f, $o)),*);
    );
}

impl_many_from!(
    ParseFieldError,
    (std::str::Utf8Error, ParseFieldError::Utf8Error),
    (bstr::Utf8Error, ParseFieldError::Utf8Error),
    (
        std::num::ParseIntError,
        ParseFieldError::ParseFromStringError
    ),
    (
        std::num::ParseFloatError,
        ParseFieldError::ParseFromStringError
    )
);

impl fmt::Display for ParseFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ParseFieldError as PFE;
        match self {
            PFE::Utf8Error => {
                write!(f, "Failed to parse a bytestring as a UTF-8 string")
            }
            PFE::ParseFromStringError => {
                write!(f, "Failed to parse a field from a string")
            }
            PFE::OrientationError => {
                write!(f, "Failed to parse an orientation character")
            }
            PFE::InvalidField(field) => {
                write!(f, "Failed to parse field `{}`", field)
            }
            PFE::UnknownContig(name) => {
                write!(f, "Reference to undeclared contig `{}`", name)
            }
            PFE::MissingFields => write!(f, "Line is missing required fields"),
        }
    }
}

impl error::Error for ParseFieldError {}

/// Type encapsulating the different kinds of graph and alignment
/// parsing errors
#[derive(Debug)]
pub enum ParseError {
    /// The line type was something other than the ones the reader
    /// handles. Ignored unless parsing pedantically.
    UnknownLineType,
    /// Tried to parse an empty line. Can be ignored.
    EmptyLine,
    /// A line couldn't be parsed. Includes the problem line and a
    /// variant describing the error.
    InvalidLine(ParseFieldError, String),
    /// The parsed lines don't form a consistent graph.
    Graph(GraphError),
    /// Wrapper for an IO error.
    IOError(std::io::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ParseError as PE;
        match self {
            PE::UnknownLineType => write!(f, "Line type was not recognized"),
            PE::EmptyLine => write!(f, "Line was empty"),
            PE::InvalidLine(field_err, line) => {
                write!(f, "Failed to parse line {}, error: {}", line, field_err)
            }
            PE::Graph(err) => write!(f, "Inconsistent graph: {}", err),
            PE::IOError(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl From<std::io::Error> for ParseError {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err)
    }
}

impl From<GraphError> for ParseError {
    #[inline]
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

impl error::Error for ParseError {}

impl ParseError {
    #[inline]
    pub(crate) fn invalid_line(error: ParseFieldError, line: &[u8]) -> Self {
        let mut dest = String::new();
        line.to_str_lossy_into(&mut dest);
        Self::InvalidLine(error, dest)
    }

    #[inline]
    pub fn can_safely_continue(&self, tol: &ParserTolerance) -> bool {
        use ParserTolerance as Tol;
        match tol {
            Tol::IgnoreAll => !matches!(self, ParseError::IOError(_)),
            Tol::Safe => matches!(
                self,
                ParseError::EmptyLine | ParseError::UnknownLineType
            ),
            Tol::Pedantic => false,
        }
    }
}
