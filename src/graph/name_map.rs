use bstr::{BStr, BString, ByteSlice};

use fnv::FnvHashMap;

/// Bidirectional map between contig names as found in the input
/// files and the dense indices used everywhere else.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct NameMap {
    pub(crate) name_map: FnvHashMap<BString, usize>,
    pub(crate) inverse_map: Vec<BString>,
}

impl NameMap {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.inverse_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse_map.is_empty()
    }

    /// Returns the index of `name`, inserting it if it's new. The
    /// second element is true if the name was inserted.
    pub fn get_or_insert<N: AsRef<[u8]>>(&mut self, name: N) -> (usize, bool) {
        let name = name.as_ref();
        if let Some(ix) = self.name_map.get(name.as_bstr()) {
            (*ix, false)
        } else {
            let ix = self.inverse_map.len();
            let name = BString::from(name);
            self.name_map.insert(name.clone(), ix);
            self.inverse_map.push(name);
            (ix, true)
        }
    }

    pub fn map_name<N: AsRef<[u8]>>(&self, name: N) -> Option<usize> {
        self.name_map.get(name.as_ref().as_bstr()).copied()
    }

    pub fn inverse_map_name(&self, id: usize) -> Option<&'_ BStr> {
        self.inverse_map.get(id).map(|bs| bs.as_bstr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut map = NameMap::new();
        assert_eq!(map.get_or_insert("utg1"), (0, true));
        assert_eq!(map.get_or_insert("utg2"), (1, true));
        assert_eq!(map.get_or_insert("utg1"), (0, false));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn names_round_trip() {
        let mut map = NameMap::new();
        for name in &["a", "b", "c"] {
            map.get_or_insert(name);
        }
        for name in &["a", "b", "c"] {
            let ix = map.map_name(name).unwrap();
            assert_eq!(map.inverse_map_name(ix).unwrap(), name.as_bytes());
        }
        assert_eq!(map.map_name("missing"), None);
        assert_eq!(map.inverse_map_name(3), None);
    }
}
