//! The (core, symbol) index.
//!
//! For each state-set core and symbol this keeps two vectors of dotted-rule
//! indexes within the core: *predictions* (the symbol sits right after the
//! dot) and *completions* (the symbol is the LHS and the dot is at the
//! end). Scanning a terminal, completing a nonterminal and the forest
//! back-traversal are all lookups here. Finished vectors are interned by
//! content so recurring vectors share one allocation.

use std::collections::HashSet;
use std::hash::BuildHasherDefault;
use std::rc::Rc;

use fnv::{FnvHashMap, FnvHasher};

use crate::sets::CoreId;
use crate::symbols::SymbolId;

type FnvHashSet<T> = HashSet<T, BuildHasherDefault<FnvHasher>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u32);

#[derive(Debug)]
enum Vect {
    /// Still growing: the owning core is being expanded.
    Open(Vec<u32>),
    /// Interned by content once the core froze.
    Frozen(Rc<[u32]>),
}

impl Vect {
    fn ids(&self) -> &[u32] {
        match self {
            Vect::Open(v) => v,
            Vect::Frozen(v) => v,
        }
    }

    fn push(&mut self, id: u32) {
        match self {
            Vect::Open(v) => v.push(id),
            Vect::Frozen(_) => unreachable!("pushing into a frozen vector"),
        }
    }
}

#[derive(Debug)]
struct Entry {
    predictions: Vect,
    completions: Vect,
}

#[derive(Debug, Default)]
pub(crate) struct CoreSymbIndex {
    table: FnvHashMap<(CoreId, SymbolId), EntryId>,
    entries: Vec<Entry>,
    /// Content-interning pool for frozen vectors.
    interned: FnvHashSet<Rc<[u32]>>,
    /// Entries created since the last freeze.
    fresh: Vec<EntryId>,
}

impl CoreSymbIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, core: CoreId, symb: SymbolId) -> Option<EntryId> {
        self.table.get(&(core, symb)).copied()
    }

    /// Find the entry for (core, symb), creating an empty one if missing.
    /// The bool is true when the entry was created by this call.
    pub fn find_or_new(&mut self, core: CoreId, symb: SymbolId) -> (EntryId, bool) {
        if let Some(&id) = self.table.get(&(core, symb)) {
            return (id, false);
        }
        let id = EntryId(self.entries.len() as u32);
        self.entries.push(Entry {
            predictions: Vect::Open(Vec::new()),
            completions: Vect::Open(Vec::new()),
        });
        self.table.insert((core, symb), id);
        self.fresh.push(id);
        (id, true)
    }

    pub fn predictions(&self, entry: EntryId) -> &[u32] {
        self.entries[entry.0 as usize].predictions.ids()
    }

    pub fn completions(&self, entry: EntryId) -> &[u32] {
        self.entries[entry.0 as usize].completions.ids()
    }

    pub fn add_prediction(&mut self, entry: EntryId, dotted_rule_idx: u32) {
        self.entries[entry.0 as usize].predictions.push(dotted_rule_idx);
    }

    pub fn add_completion(&mut self, entry: EntryId, dotted_rule_idx: u32) {
        self.entries[entry.0 as usize].completions.push(dotted_rule_idx);
    }

    /// Intern the vectors of all entries created since the last freeze.
    /// Called when a fresh core has finished expanding.
    pub fn freeze_new(&mut self) {
        for id in std::mem::take(&mut self.fresh) {
            let entry = &mut self.entries[id.0 as usize];
            entry.predictions = Vect::Frozen(Self::intern_vect(&mut self.interned, entry.predictions.ids()));
            entry.completions = Vect::Frozen(Self::intern_vect(&mut self.interned, entry.completions.ids()));
        }
    }

    fn intern_vect(pool: &mut FnvHashSet<Rc<[u32]>>, ids: &[u32]) -> Rc<[u32]> {
        if let Some(existing) = pool.get(ids) {
            return existing.clone();
        }
        let rc: Rc<[u32]> = ids.into();
        pool.insert(rc.clone());
        rc
    }

    pub fn num_pairs(&self) -> usize {
        self.entries.len()
    }

    pub fn num_unique_vects(&self) -> usize {
        self.interned.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_intern_by_content() {
        let mut idx = CoreSymbIndex::new();
        let (e1, created) = idx.find_or_new(CoreId(0), SymbolId(5));
        assert!(created);
        idx.add_prediction(e1, 1);
        idx.add_prediction(e1, 2);
        idx.freeze_new();

        let (e2, created) = idx.find_or_new(CoreId(1), SymbolId(5));
        assert!(created);
        idx.add_prediction(e2, 1);
        idx.add_prediction(e2, 2);
        idx.add_completion(e2, 7);
        idx.freeze_new();

        assert_eq!(idx.predictions(e1), &[1, 2]);
        assert_eq!(idx.predictions(e2), &[1, 2]);
        assert_eq!(idx.completions(e2), &[7]);
        // [1,2] shared, [] shared, [7] distinct
        assert_eq!(idx.num_unique_vects(), 3);
        assert_eq!(idx.find(CoreId(0), SymbolId(5)), Some(e1));
        assert_eq!(idx.find(CoreId(0), SymbolId(6)), None);
    }
}
