use log::info;
use serde::{Deserialize, Serialize};

use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::graph::{Component, GraphModel};

/// Which components, ranked by descending weight, to analyze.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ComponentSelection {
    /// The single component at this rank.
    Rank(usize),
    /// Ranks `start..end`.
    Range(usize, usize),
    /// The smallest top-ranked prefix holding at least this fraction
    /// of the total weight.
    WeightRatio(f64),
}

impl Default for ComponentSelection {
    fn default() -> Self {
        ComponentSelection::Rank(0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionError {
    InvalidSelectionSpec(String),
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::InvalidSelectionSpec(msg) => {
                write!(f, "Invalid component selection: {}", msg)
            }
        }
    }
}

impl std::error::Error for SelectionError {}

fn invalid<T>(msg: String) -> Result<T, SelectionError> {
    Err(SelectionError::InvalidSelectionSpec(msg))
}

impl FromStr for ComponentSelection {
    type Err = SelectionError;

    /// `"3"` is a rank, `"0,4"` a range, and anything with a decimal
    /// point a weight ratio.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parse_rank = |t: &str| {
            t.trim()
                .parse::<usize>()
                .map_err(|_| SelectionError::InvalidSelectionSpec(s.to_string()))
        };

        let selection = if let Some(comma) = s.find(',') {
            ComponentSelection::Range(parse_rank(&s[..comma])?, parse_rank(&s[comma + 1..])?)
        } else if s.contains('.') {
            let ratio = s
                .parse::<f64>()
                .map_err(|_| SelectionError::InvalidSelectionSpec(s.to_string()))?;
            ComponentSelection::WeightRatio(ratio)
        } else {
            ComponentSelection::Rank(parse_rank(s)?)
        };
        selection.check_form()?;
        Ok(selection)
    }
}

impl fmt::Display for ComponentSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentSelection::Rank(r) => write!(f, "{}", r),
            ComponentSelection::Range(s, e) => write!(f, "{},{}", s, e),
            ComponentSelection::WeightRatio(r) => write!(f, "{:?}", r),
        }
    }
}

impl TryFrom<String> for ComponentSelection {
    type Error = SelectionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ComponentSelection> for String {
    fn from(sel: ComponentSelection) -> Self {
        sel.to_string()
    }
}

impl ComponentSelection {
    /// Checks that don't need the graph.
    pub fn check_form(&self) -> Result<(), SelectionError> {
        match *self {
            ComponentSelection::Range(start, end) if start >= end => {
                invalid(format!("empty range {}..{}", start, end))
            }
            ComponentSelection::WeightRatio(r) if !(r > 0.0 && r <= 1.0) => {
                invalid(format!("weight ratio {} is outside (0, 1]", r))
            }
            _ => Ok(()),
        }
    }

    /// The selected components, heaviest first.
    pub fn select<'a>(&self, graph: &'a GraphModel) -> Result<Vec<&'a Component>, SelectionError> {
        self.check_form()?;
        let ranked = rank_components(graph);
        let n = ranked.len();

        let selected: Vec<&Component> = match *self {
            ComponentSelection::Rank(r) => {
                if r >= n {
                    return invalid(format!("rank {} but the graph has {} components", r, n));
                }
                vec![ranked[r]]
            }
            ComponentSelection::Range(start, end) => {
                if end > n {
                    return invalid(format!(
                        "range {}..{} but the graph has {} components",
                        start, end, n
                    ));
                }
                ranked[start..end].to_vec()
            }
            ComponentSelection::WeightRatio(ratio) => {
                if n == 0 {
                    return invalid("the graph has no components".to_string());
                }
                let total: f64 = ranked.iter().map(|c| c.weight).sum();
                if total <= 0.0 {
                    vec![ranked[0]]
                } else {
                    let mut cumulative = 0.0;
                    let mut take = 0;
                    for comp in ranked.iter() {
                        cumulative += comp.weight;
                        take += 1;
                        if cumulative / total >= ratio {
                            break;
                        }
                    }
                    ranked[..take].to_vec()
                }
            }
        };

        info!(
            "Selected {} of {} components ({})",
            selected.len(),
            n,
            self
        );
        Ok(selected)
    }
}

/// Components sorted by descending weight, ties by ascending id.
pub fn rank_components(graph: &GraphModel) -> Vec<&Component> {
    let mut ranked: Vec<&Component> = graph.components().iter().collect();
    ranked.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;

    /// Three isolated contigs with weights 5, 10 and 1.
    fn weighted_graph() -> GraphModel {
        let mut builder = GraphBuilder::new();
        builder.add_contig("mid", 5, 1.0).unwrap();
        builder.add_contig("big", 10, 1.0).unwrap();
        builder.add_contig("small", 1, 1.0).unwrap();
        builder.build()
    }

    fn ids(comps: &[&Component]) -> Vec<usize> {
        comps.iter().map(|c| c.id).collect()
    }

    #[test]
    fn parse_selection_strings() {
        use ComponentSelection::*;
        assert_eq!("2".parse::<ComponentSelection>().unwrap(), Rank(2));
        assert_eq!("0,3".parse::<ComponentSelection>().unwrap(), Range(0, 3));
        assert_eq!("0.7".parse::<ComponentSelection>().unwrap(), WeightRatio(0.7));
        assert!("1.5".parse::<ComponentSelection>().is_err());
        assert!("0.0".parse::<ComponentSelection>().is_err());
        assert!("3,3".parse::<ComponentSelection>().is_err());
        assert!("x".parse::<ComponentSelection>().is_err());
    }

    #[test]
    fn serde_uses_text_form() {
        let sel: ComponentSelection = serde_json::from_str("\"0,2\"").unwrap();
        assert_eq!(sel, ComponentSelection::Range(0, 2));
        assert_eq!(serde_json::to_string(&sel).unwrap(), "\"0,2\"");
        let ratio = ComponentSelection::WeightRatio(0.5);
        assert_eq!(serde_json::to_string(&ratio).unwrap(), "\"0.5\"");
        assert!(serde_json::from_str::<ComponentSelection>("\"2.0\"").is_err());
    }

    #[test]
    fn ranking_is_by_weight() {
        let graph = weighted_graph();
        assert_eq!(ids(&rank_components(&graph)), vec![1, 0, 2]);
        let top = ComponentSelection::Rank(0).select(&graph).unwrap();
        assert_eq!(ids(&top), vec![1]);
        let range = ComponentSelection::Range(1, 3).select(&graph).unwrap();
        assert_eq!(ids(&range), vec![0, 2]);
    }

    #[test]
    fn ratio_takes_minimal_prefix() {
        let graph = weighted_graph();
        let sel = ComponentSelection::WeightRatio(0.7).select(&graph).unwrap();
        assert_eq!(ids(&sel), vec![1, 0]);
        let sel = ComponentSelection::WeightRatio(0.6).select(&graph).unwrap();
        assert_eq!(ids(&sel), vec![1]);
        let sel = ComponentSelection::WeightRatio(1.0).select(&graph).unwrap();
        assert_eq!(sel.len(), 3);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let graph = weighted_graph();
        assert!(ComponentSelection::Rank(3).select(&graph).is_err());
        assert!(ComponentSelection::Range(1, 4).select(&graph).is_err());
        assert!(ComponentSelection::WeightRatio(1.2).select(&graph).is_err());
    }

    #[test]
    fn zero_weight_ratio_takes_top() {
        let mut builder = GraphBuilder::new();
        builder.add_contig("a", 10, 0.0).unwrap();
        builder.add_contig("b", 10, 0.0).unwrap();
        let graph = builder.build();
        let sel = ComponentSelection::WeightRatio(0.9).select(&graph).unwrap();
        assert_eq!(ids(&sel), vec![0]);
    }
}
