use serde::{Deserialize, Serialize};

use super::Orientation;

/// One oriented visit of a contig, identified by its dense index in
/// the graph.
#[derive(
    Default,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Step {
    pub contig: usize,
    pub orient: Orientation,
}

impl Step {
    #[inline]
    pub fn new(contig: usize, orient: Orientation) -> Self {
        Step { contig, orient }
    }

    #[inline]
    pub fn forward(contig: usize) -> Self {
        Step::new(contig, Orientation::Forward)
    }

    #[inline]
    pub fn backward(contig: usize) -> Self {
        Step::new(contig, Orientation::Backward)
    }

    /// The same contig traversed on the opposite strand
    #[inline]
    pub fn flip(self) -> Self {
        Step::new(self.contig, self.orient.flip())
    }

    /// Index into per-step tables, two slots per contig.
    #[inline]
    pub(crate) fn slot(self) -> usize {
        self.contig * 2 + self.orient.is_reverse() as usize
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.contig, self.orient)
    }
}

/// Reverse-complement a walk: reverse the order and flip every step.
pub fn reverse_walk(walk: &[Step]) -> Vec<Step> {
    walk.iter().rev().map(|s| s.flip()).collect()
}
