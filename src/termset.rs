//! Interned bitsets over terminal ids.
//!
//! FIRST/FOLLOW sets, dotted-rule lookaheads and dynamic-lookahead contexts
//! are all sets of terminals. They get compared and OR-ed constantly, so they
//! are stored as plain word arrays and interned by content: equal sets share
//! one id and comparisons collapse to an id check.

use fnv::FnvHashMap;

const WORD_BITS: usize = u64::BITS as usize;

/// Id of an interned terminal set inside a [`TermSetStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TermSetId(pub(crate) u32);

impl TermSetId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A set of terminals, indexed by dense `term_id` (0..num_terminals).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermSet {
    words: Vec<u64>,
}

impl TermSet {
    /// An empty set sized for `num_terminals` terminals.
    pub fn new(num_terminals: usize) -> Self {
        Self { words: vec![0; num_terminals.div_ceil(WORD_BITS)] }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Put every terminal in the set.
    pub fn fill(&mut self, num_terminals: usize) {
        self.words.fill(!0);
        // mask off the bits past num_terminals so content interning stays exact
        let tail = num_terminals % WORD_BITS;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    pub fn copy_from(&mut self, other: &TermSet) {
        self.words.copy_from_slice(&other.words);
    }

    /// OR `other` into `self`; true if `self` changed.
    pub fn or_with(&mut self, other: &TermSet) -> bool {
        let mut changed = false;
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            let merged = *dst | *src;
            changed |= merged != *dst;
            *dst = merged;
        }
        changed
    }

    /// Set the bit for `term_id`; true if it was not set before.
    pub fn set_bit(&mut self, term_id: u32) -> bool {
        let (word, mask) = Self::locate(term_id);
        let was = self.words[word] & mask != 0;
        self.words[word] |= mask;
        !was
    }

    /// Clear the bit for `term_id`; true if it was set before.
    pub fn clear_bit(&mut self, term_id: u32) -> bool {
        let (word, mask) = Self::locate(term_id);
        let was = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        was
    }

    pub fn test(&self, term_id: u32) -> bool {
        let (word, mask) = Self::locate(term_id);
        self.words[word] & mask != 0
    }

    fn locate(term_id: u32) -> (usize, u64) {
        let i = term_id as usize;
        (i / WORD_BITS, 1u64 << (i % WORD_BITS))
    }

    /// Iterate the terminal ids in the set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &w)| {
            (0..WORD_BITS).filter_map(move |b| {
                if w & (1u64 << b) != 0 {
                    Some((wi * WORD_BITS + b) as u32)
                } else {
                    None
                }
            })
        })
    }
}

/// Owns every interned terminal set. Ids are dense and stable.
#[derive(Debug, Default)]
pub struct TermSetStore {
    sets: Vec<TermSet>,
    table: FnvHashMap<TermSet, TermSetId>,
}

impl TermSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert-or-find. Returns the id and whether the set already existed
    /// (so callers that build sets in a scratch buffer know they may keep
    /// reusing the buffer).
    pub fn intern(&mut self, set: &TermSet) -> (TermSetId, bool) {
        if let Some(&id) = self.table.get(set) {
            return (id, true);
        }
        let id = TermSetId(self.sets.len() as u32);
        self.sets.push(set.clone());
        self.table.insert(set.clone(), id);
        (id, false)
    }

    pub fn get(&self, id: TermSetId) -> &TermSet {
        &self.sets[id.index()]
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_ops() {
        let mut s = TermSet::new(70);
        assert!(s.set_bit(0));
        assert!(s.set_bit(69));
        assert!(!s.set_bit(69));
        assert!(s.test(0));
        assert!(s.test(69));
        assert!(!s.test(33));
        assert!(s.clear_bit(0));
        assert!(!s.clear_bit(0));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![69]);
    }

    #[test]
    fn or_reports_change() {
        let mut a = TermSet::new(8);
        let mut b = TermSet::new(8);
        b.set_bit(3);
        assert!(a.or_with(&b));
        assert!(!a.or_with(&b));
        assert!(a.test(3));
    }

    #[test]
    fn fill_masks_tail() {
        let mut a = TermSet::new(5);
        a.fill(5);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn interning_shares_ids() {
        let mut store = TermSetStore::new();
        let mut a = TermSet::new(16);
        a.set_bit(2);
        let (id1, existed1) = store.intern(&a);
        assert!(!existed1);
        let mut b = TermSet::new(16);
        b.set_bit(2);
        let (id2, existed2) = store.intern(&b);
        assert!(existed2);
        assert_eq!(id1, id2);
        b.set_bit(9);
        let (id3, _) = store.intern(&b);
        assert_ne!(id1, id3);
        assert_eq!(store.len(), 2);
    }
}
