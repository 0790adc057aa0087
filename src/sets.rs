//! State-set machinery: interned set cores, interned matched-length
//! vectors, and the (core, matched-lengths) tuples that give every realized
//! Earley set a canonical identity.
//!
//! A core is the dotted-rule list of a set without the matched lengths, so
//! it can recur at many input positions; matched-length vectors recur too.
//! Both are interned separately and the pair is interned again, which makes
//! set identity a cheap id comparison and bounds memory on long inputs.
//!
//! Core layout invariant: started dotted rules first (their matched lengths
//! live in the set), then predicted dotted rules whose matched length is
//! inherited from a parent started rule, then purely initial predictions
//! whose matched length is implicitly zero.

use fnv::FnvHashMap;

use crate::dotted::DottedRuleId;
use crate::symbols::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CoreId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MatchedLengthsId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StateSetId(pub(crate) u32);

#[derive(Debug)]
pub(crate) struct StateSetCore {
    /// The terminal whose shift produced this core; None for set 0.
    pub term: Option<SymbolId>,
    /// Started rules, then parented predictions, then initial predictions.
    pub dotted_rules: Vec<DottedRuleId>,
    pub num_started: usize,
    /// Dotted rules below this index have a defined matched length.
    pub num_all_matched_lengths: usize,
    /// For indexes in `num_started..num_all_matched_lengths`: the started
    /// rule whose matched length the predicted rule inherits.
    pub parent_ids: Vec<u32>,
}

impl StateSetCore {
    fn new(term: Option<SymbolId>, started: Vec<DottedRuleId>) -> Self {
        let n = started.len();
        Self {
            term,
            dotted_rules: started,
            num_started: n,
            num_all_matched_lengths: n,
            parent_ids: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dotted_rules.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StateSet {
    pub core: CoreId,
    pub lengths: MatchedLengthsId,
}

/// All interning tables plus the buffers of the set under construction.
#[derive(Debug, Default)]
pub(crate) struct StateSetPool {
    cores: Vec<StateSetCore>,
    core_table: FnvHashMap<Vec<DottedRuleId>, CoreId>,
    length_vecs: Vec<Vec<u32>>,
    lengths_table: FnvHashMap<Vec<u32>, MatchedLengthsId>,
    sets: Vec<StateSet>,
    set_table: FnvHashMap<(CoreId, MatchedLengthsId), StateSetId>,

    new_started: Vec<DottedRuleId>,
    new_lengths: Vec<u32>,

    /// (dotted rule, matched length) membership, cleared O(1) by bumping
    /// the generation.
    dedupe: Vec<Vec<u32>>,
    generation: u32,

    pub num_parent_ids: usize,
}

impl StateSetPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn core(&self, id: CoreId) -> &StateSetCore {
        &self.cores[id.0 as usize]
    }

    pub fn set(&self, id: StateSetId) -> StateSet {
        self.sets[id.0 as usize]
    }

    pub fn lengths(&self, id: MatchedLengthsId) -> &[u32] {
        &self.length_vecs[id.0 as usize]
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    pub fn num_length_vecs(&self) -> usize {
        self.length_vecs.len()
    }

    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Matched length of the dotted rule at `idx` within `set`'s core:
    /// stored for started rules, inherited through the parent index for
    /// parented predictions, zero for initial predictions.
    pub fn matched_length(&self, set: StateSetId, idx: usize) -> u32 {
        let s = self.sets[set.0 as usize];
        let core = &self.cores[s.core.0 as usize];
        if idx >= core.num_all_matched_lengths {
            0
        } else if idx < core.num_started {
            self.length_vecs[s.lengths.0 as usize][idx]
        } else {
            let parent = core.parent_ids[idx - core.num_started] as usize;
            self.length_vecs[s.lengths.0 as usize][parent]
        }
    }

    /// Start accumulating started dotted rules for a new set.
    pub fn begin_new_set(&mut self) {
        self.new_started.clear();
        self.new_lengths.clear();
    }

    pub fn add_started(&mut self, dr: DottedRuleId, matched_length: u32) {
        self.new_started.push(dr);
        self.new_lengths.push(matched_length);
    }

    pub fn num_new_started(&self) -> usize {
        self.new_started.len()
    }

    pub fn new_started_at(&self, i: usize) -> (DottedRuleId, u32) {
        (self.new_started[i], self.new_lengths[i])
    }

    /// Intern the matched lengths, the core and the (core, lengths) pair.
    /// Returns the set id and whether the core is fresh (and so still needs
    /// expanding).
    pub fn commit(&mut self, term: Option<SymbolId>) -> (StateSetId, bool) {
        let lengths_id = match self.lengths_table.get(&self.new_lengths) {
            Some(&id) => id,
            None => {
                let id = MatchedLengthsId(self.length_vecs.len() as u32);
                self.length_vecs.push(self.new_lengths.clone());
                self.lengths_table.insert(self.new_lengths.clone(), id);
                id
            }
        };
        let (core_id, fresh_core) = match self.core_table.get(&self.new_started) {
            Some(&id) => (id, false),
            None => {
                let id = CoreId(self.cores.len() as u32);
                self.cores.push(StateSetCore::new(term, self.new_started.clone()));
                self.core_table.insert(self.new_started.clone(), id);
                (id, true)
            }
        };
        let set_id = match self.set_table.get(&(core_id, lengths_id)) {
            Some(&id) => id,
            None => {
                let id = StateSetId(self.sets.len() as u32);
                self.sets.push(StateSet { core: core_id, lengths: lengths_id });
                self.set_table.insert((core_id, lengths_id), id);
                id
            }
        };
        (set_id, fresh_core)
    }

    /// Add a predicted dotted rule whose matched length is inherited from
    /// the started rule at `parent`. Duplicate (rule, parent) pairs are
    /// dropped because the core-symbol index is formed from these entries.
    pub fn core_add_parented(&mut self, core: CoreId, dr: DottedRuleId, parent: u32) {
        let c = &mut self.cores[core.0 as usize];
        for i in c.num_started..c.num_all_matched_lengths {
            if c.dotted_rules[i] == dr && c.parent_ids[i - c.num_started] == parent {
                return;
            }
        }
        debug_assert_eq!(c.num_all_matched_lengths, c.len());
        c.dotted_rules.push(dr);
        c.parent_ids.push(parent);
        c.num_all_matched_lengths += 1;
        self.num_parent_ids += 1;
    }

    /// Add an initial (matched length zero) prediction, once per rule.
    pub fn core_add_initial(&mut self, core: CoreId, dr: DottedRuleId) {
        let c = &mut self.cores[core.0 as usize];
        if c.dotted_rules[c.num_started..].contains(&dr) {
            return;
        }
        c.dotted_rules.push(dr);
    }

    /// Swap an initial prediction for its context-refined version
    /// (dynamic-lookahead expansion pass).
    pub fn core_replace_dotted_rule(&mut self, core: CoreId, idx: usize, dr: DottedRuleId) {
        let c = &mut self.cores[core.0 as usize];
        debug_assert!(idx >= c.num_all_matched_lengths);
        c.dotted_rules[idx] = dr;
    }

    pub fn clear_dedupe(&mut self) {
        self.generation += 1;
    }

    /// Membership test-and-insert for (dotted rule, matched length) in the
    /// current generation. True if the pair was already present.
    pub fn test_and_set_dedupe(&mut self, dr: DottedRuleId, matched_length: u32) -> bool {
        let id = dr.index();
        if self.dedupe.len() <= id {
            self.dedupe.resize_with(id + 1, Vec::new);
        }
        let row = &mut self.dedupe[id];
        let ml = matched_length as usize;
        if row.len() <= ml {
            row.resize(ml + 1, 0);
        }
        if row[ml] == self.generation {
            return true;
        }
        row[ml] = self.generation;
        false
    }
}
