//! The rule store.
//!
//! A rule keeps its LHS, the RHS symbol sequence, the opaque mark
//! characters supplied by the caller, and its translation: an optional
//! abstract-node name with a cost, plus a per-position order array saying
//! where each RHS translation lands among the abstract node's children
//! (-1 drops the position).

use smol_str::SmolStr;

use crate::symbols::SymbolId;

/// Reserved translation index meaning "emit a nil child here".
pub const TRANSLATE_NIL: i32 = i32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleId(pub(crate) u32);

impl RuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub struct Rule {
    pub num: RuleId,
    pub lhs: SymbolId,
    pub rhs: Vec<SymbolId>,
    /// Rule-level mark character. Opaque to the engine; copied onto
    /// abstract nodes for the caller.
    pub mark: char,
    /// Per-RHS-position marks, same length as `rhs`.
    pub marks: Vec<char>,
    /// Abstract node name, if the translation creates one.
    pub anode: Option<SmolStr>,
    pub anode_cost: i32,
    /// For each RHS position, the child slot its translation occupies,
    /// or -1 when the translation is dropped.
    pub order: Vec<i32>,
    /// Number of child slots in the translation.
    pub trans_len: i32,
    /// Index of this rule's LHS in the imaginary flat array of all rule
    /// symbols; `rule_start_offset + dot` is the dotted-rule pool slot.
    pub rule_start_offset: usize,
}

impl Rule {
    pub fn rhs_len(&self) -> usize {
        self.rhs.len()
    }
}

#[derive(Debug, Default)]
pub struct RuleStore {
    rules: Vec<Rule>,
    /// Summary RHS length over all rules, maintained for slot offsets.
    n_rhs_total: usize,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new rule with empty RHS and a drop-everything translation.
    /// RHS symbols are appended with [`RuleStore::add_rhs_symbol`].
    pub fn start_rule(&mut self, lhs: SymbolId, anode: Option<SmolStr>, anode_cost: i32) -> RuleId {
        let num = RuleId(self.rules.len() as u32);
        let rule_start_offset = self.n_rhs_total + self.rules.len();
        self.rules.push(Rule {
            num,
            lhs,
            rhs: Vec::new(),
            mark: '\0',
            marks: Vec::new(),
            anode,
            anode_cost,
            order: Vec::new(),
            trans_len: 0,
            rule_start_offset,
        });
        num
    }

    pub fn add_rhs_symbol(&mut self, rule: RuleId, symb: SymbolId) {
        let r = &mut self.rules[rule.index()];
        r.rhs.push(symb);
        r.order.push(-1);
        r.marks.push('\0');
        self.n_rhs_total += 1;
    }

    pub fn get(&self, id: RuleId) -> &Rule {
        &self.rules[id.index()]
    }

    pub fn get_mut(&mut self, id: RuleId) -> &mut Rule {
        &mut self.rules[id.index()]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Size of the dotted-rule slot space: one slot per RHS position plus
    /// one end-of-rule slot per rule.
    pub fn dotted_slots(&self) -> usize {
        self.n_rhs_total + self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;

    #[test]
    fn offsets_index_a_flat_slot_space() {
        let mut symbs = SymbolTable::new();
        let a = symbs.add_terminal("a", 97);
        let s = symbs.add_nonterm("S");

        let mut rules = RuleStore::new();
        let r0 = rules.start_rule(s, None, 0);
        rules.add_rhs_symbol(r0, a);
        rules.add_rhs_symbol(r0, a);
        let r1 = rules.start_rule(s, None, 0);
        rules.add_rhs_symbol(r1, a);

        assert_eq!(rules.get(r0).rule_start_offset, 0);
        // r0 occupies slots 0..=2 (dot positions 0, 1, 2)
        assert_eq!(rules.get(r1).rule_start_offset, 3);
        assert_eq!(rules.dotted_slots(), 5);
        assert_eq!(rules.get(r1).order, vec![-1]);
    }
}
