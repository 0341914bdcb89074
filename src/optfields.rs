use bstr::{BString, ByteSlice};

use lazy_static::lazy_static;
use regex::bytes::Regex;

/// An optional field a la SAM, restricted to the value types the
/// graph and alignment readers look at.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub struct OptField {
    pub tag: [u8; 2],
    pub value: OptFieldVal,
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum OptFieldVal {
    A(u8),
    Int(i64),
    Float(f64),
    Z(BString),
}

impl OptFieldVal {
    /// Numeric view of the value; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OptFieldVal::Int(i) => Some(*i as f64),
            OptFieldVal::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            OptFieldVal::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl OptField {
    /// Parses an optional field from a bytestring in the format
    /// <TAG>:<TYPE>:<VALUE>. Types other than A, i, f and Z are
    /// skipped by returning None.
    pub fn parse(input: &[u8]) -> Option<Self> {
        lazy_static! {
            static ref RE_TAG: Regex =
                Regex::new(r"(?-u)^[A-Za-z][A-Za-z0-9]$").unwrap();
            static ref RE_CHAR: Regex = Regex::new(r"(?-u)[!-~]").unwrap();
            static ref RE_INT: Regex = Regex::new(r"(?-u)^[-+]?[0-9]+$").unwrap();
            static ref RE_FLOAT: Regex =
                Regex::new(r"(?-u)^[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?$")
                    .unwrap();
            static ref RE_STRING: Regex = Regex::new(r"(?-u)[ !-~]+").unwrap();
        }

        use OptFieldVal::*;

        if input.len() < 5 || input[2] != b':' || input[4] != b':' {
            return None;
        }

        let o_tag = &input[0..=1];
        if !RE_TAG.is_match(o_tag) {
            return None;
        }

        let o_contents = &input[5..];
        let number = |re: &Regex| {
            let s = o_contents.to_str().ok()?;
            if re.is_match(o_contents) {
                Some(s)
            } else {
                None
            }
        };

        let o_val = match input[3] {
            b'A' => RE_CHAR.find(o_contents).map(|s| s.as_bytes()[0]).map(A),
            b'i' => number(&RE_INT).and_then(|s| s.parse().ok()).map(Int),
            b'f' => number(&RE_FLOAT).and_then(|s| s.parse().ok()).map(Float),
            b'Z' => RE_STRING
                .find(o_contents)
                .map(|s| s.as_bytes().into())
                .map(Z),
            _ => None,
        }?;

        Some(OptField {
            tag: [o_tag[0], o_tag[1]],
            value: o_val,
        })
    }
}

/// The optional fields of one line, in input order.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct OptionalFields(pub Vec<OptField>);

impl OptionalFields {
    pub fn parse<I>(input: I) -> Self
    where
        I: Iterator,
        I::Item: AsRef<[u8]>,
    {
        OptionalFields(input.filter_map(|f| OptField::parse(f.as_ref())).collect())
    }

    pub fn get(&self, tag: &[u8; 2]) -> Option<&OptFieldVal> {
        self.0.iter().find(|o| &o.tag == tag).map(|o| &o.value)
    }

    /// The first of `tags` present with a numeric value.
    pub fn first_number<'t>(
        &self,
        tags: &[&'t [u8; 2]],
    ) -> Option<(&'t [u8; 2], f64)> {
        tags.iter()
            .find_map(|tag| self.get(tag).and_then(|v| v.as_f64()).map(|v| (*tag, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_typed_fields() {
        use OptFieldVal::*;
        let fields = ["LN:i:1234", "dp:f:31.5", "XA:A:q", "Zz:Z:some text"];
        let opts = OptionalFields::parse(fields.iter().map(|f| f.as_bytes()));
        assert_eq!(opts.get(b"LN"), Some(&Int(1234)));
        assert_eq!(opts.get(b"dp"), Some(&Float(31.5)));
        assert_eq!(opts.get(b"XA"), Some(&A(b'q')));
        assert_eq!(opts.get(b"Zz"), Some(&Z("some text".into())));
        assert_eq!(opts.get(b"KC"), None);
    }

    #[test]
    fn malformed_fields_are_skipped() {
        assert_eq!(OptField::parse(b"LN:i:12x"), None);
        assert_eq!(OptField::parse(b"LN-i:12"), None);
        assert_eq!(OptField::parse(b"1N:i:12"), None);
        assert_eq!(OptField::parse(b"BB:B:i,1,2"), None);
        assert_eq!(OptField::parse(b"id"), None);
    }

    #[test]
    fn first_number_respects_priority() {
        let fields = ["KC:i:300", "DP:f:2.5"];
        let opts = OptionalFields::parse(fields.iter().map(|f| f.as_bytes()));
        let (tag, v) = opts.first_number(&[b"DP", b"KC"]).unwrap();
        assert_eq!(tag, b"DP");
        assert_eq!(v, 2.5);
    }
}
