pub mod name_map;
pub mod orientation;
pub mod step;

pub use self::name_map::NameMap;
pub use self::orientation::*;
pub use self::step::*;

use bstr::BStr;
use fnv::{FnvHashSet, FnvHasher};

use std::hash::{Hash, Hasher};

/// This module defines the in-memory assembly graph the estimator
/// works on: contigs, oriented edges and connected components.

/// A contig (graph node). Names live in the graph's `NameMap`, the
/// contig is addressed by its index.
#[derive(Debug, Clone, PartialEq)]
pub struct Contig {
    pub length: usize,
    pub depth: f64,
}

/// An adjacency between two oriented contig ends: leaving `from` and
/// entering `to`. Every edge has an implied reverse-complement twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: Step,
    pub to: Step,
    pub overlap: usize,
}

impl Edge {
    pub fn new(from: Step, to: Step, overlap: usize) -> Self {
        Edge { from, to, overlap }
    }

    /// The same adjacency read on the opposite strand
    pub fn reverse(&self) -> Self {
        Edge::new(self.to.flip(), self.from.flip(), self.overlap)
    }
}

/// A maximal connected set of contigs, ignoring orientation.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    /// Stable identifier; components are numbered in order of their
    /// lowest contig index.
    pub id: usize,
    /// Member contigs, ascending.
    pub contigs: Vec<usize>,
    /// Σ length × depth over the members.
    pub weight: f64,
}

impl Component {
    pub fn contains(&self, contig: usize) -> bool {
        self.contigs.binary_search(&contig).is_ok()
    }
}

#[derive(Debug, Clone)]
pub enum GraphError {
    UnknownContig(usize),
    DuplicateContig(String),
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::UnknownContig(ix) => {
                write!(f, "Edge refers to unknown contig index {}", ix)
            }
            GraphError::DuplicateContig(name) => {
                write!(f, "Contig `{}` was declared twice", name)
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Incrementally collects contigs and edges, then computes the
/// adjacency tables and components in `build`.
#[derive(Default, Debug, Clone)]
pub struct GraphBuilder {
    names: NameMap,
    contigs: Vec<Contig>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add_contig<N: AsRef<[u8]>>(
        &mut self,
        name: N,
        length: usize,
        depth: f64,
    ) -> Result<usize, GraphError> {
        let (ix, inserted) = self.names.get_or_insert(name.as_ref());
        if !inserted {
            let name = String::from_utf8_lossy(name.as_ref()).into_owned();
            return Err(GraphError::DuplicateContig(name));
        }
        self.contigs.push(Contig { length, depth });
        Ok(ix)
    }

    pub fn contig_index<N: AsRef<[u8]>>(&self, name: N) -> Option<usize> {
        self.names.map_name(name)
    }

    pub fn add_edge(
        &mut self,
        from: Step,
        to: Step,
        overlap: usize,
    ) -> Result<(), GraphError> {
        for step in [from, to].iter() {
            if step.contig >= self.contigs.len() {
                return Err(GraphError::UnknownContig(step.contig));
            }
        }
        self.edges.push(Edge::new(from, to, overlap));
        Ok(())
    }

    pub fn build(self) -> GraphModel {
        GraphModel::from_parts(self.names, self.contigs, self.edges)
    }
}

/// The assembly graph. Immutable once built; components are computed
/// at construction.
#[derive(Debug, Clone)]
pub struct GraphModel {
    names: NameMap,
    contigs: Vec<Contig>,
    edges: Vec<Edge>,
    /// successors[step.slot()] = (next step, overlap), sorted, with
    /// both strands of every edge present.
    successors: Vec<Vec<(Step, usize)>>,
    components: Vec<Component>,
    component_of: Vec<usize>,
}

impl GraphModel {
    fn from_parts(names: NameMap, contigs: Vec<Contig>, edges: Vec<Edge>) -> Self {
        let mut successors: Vec<Vec<(Step, usize)>> =
            vec![Vec::new(); contigs.len() * 2];

        let mut seen: FnvHashSet<(Step, Step)> = FnvHashSet::default();
        for edge in edges.iter() {
            for e in [*edge, edge.reverse()].iter() {
                if seen.insert((e.from, e.to)) {
                    successors[e.from.slot()].push((e.to, e.overlap));
                }
            }
        }
        successors.iter_mut().for_each(|s| s.sort());

        let (components, component_of) = find_components(&contigs, &successors);

        GraphModel {
            names,
            contigs,
            edges,
            successors,
            components,
            component_of,
        }
    }

    pub fn contigs(&self) -> &[Contig] {
        &self.contigs
    }

    pub fn contig(&self, ix: usize) -> &Contig {
        &self.contigs[ix]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn names(&self) -> &NameMap {
        &self.names
    }

    pub fn contig_index<N: AsRef<[u8]>>(&self, name: N) -> Option<usize> {
        self.names.map_name(name)
    }

    pub fn contig_name(&self, ix: usize) -> Option<&BStr> {
        self.names.inverse_map_name(ix)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_of(&self, contig: usize) -> Option<&Component> {
        self.component_of
            .get(contig)
            .map(|&c| &self.components[c])
    }

    /// Steps that may directly follow `step`.
    pub fn successors(&self, step: Step) -> &[(Step, usize)] {
        self.successors
            .get(step.slot())
            .map(|s| s.as_slice())
            .unwrap_or(&[])
    }

    /// Whether leaving `from` can enter `to`, on either strand of a
    /// declared edge.
    pub fn has_edge(&self, from: Step, to: Step) -> bool {
        self.successors(from).iter().any(|(s, _)| *s == to)
    }

    /// Hash over the contigs and edges, used to detect whether a
    /// checkpoint was produced from the same graph.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        for (ix, contig) in self.contigs.iter().enumerate() {
            self.names.inverse_map_name(ix).hash(&mut hasher);
            contig.length.hash(&mut hasher);
            contig.depth.to_bits().hash(&mut hasher);
        }
        for edge in self.edges.iter() {
            edge.hash(&mut hasher);
        }
        hasher.finish()
    }
}

fn find_components(
    contigs: &[Contig],
    successors: &[Vec<(Step, usize)>],
) -> (Vec<Component>, Vec<usize>) {
    let unassigned = usize::MAX;
    let mut component_of = vec![unassigned; contigs.len()];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in 0..contigs.len() {
        if component_of[start] != unassigned {
            continue;
        }
        let id = components.len();
        let mut members = Vec::new();
        component_of[start] = id;
        stack.push(start);

        while let Some(contig) = stack.pop() {
            members.push(contig);
            let neighbours = successors[contig * 2]
                .iter()
                .chain(successors[contig * 2 + 1].iter());
            for (next, _) in neighbours {
                if component_of[next.contig] == unassigned {
                    component_of[next.contig] = id;
                    stack.push(next.contig);
                }
            }
        }

        members.sort_unstable();
        let weight = members
            .iter()
            .map(|&c| contigs[c].length as f64 * contigs[c].depth)
            .sum();
        components.push(Component {
            id,
            contigs: members,
            weight,
        });
    }

    (components, component_of)
}
