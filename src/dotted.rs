//! The dotted-rule pool.
//!
//! A dotted rule is (rule, dot position, lookahead context), interned so
//! each triple exists once per parse run and compares by id. The pool is
//! indexed by `(context, rule_start_offset + dot)`, an O(1) probe. Each
//! dotted rule precomputes its lookahead set and whether the RHS tail from
//! the dot onward is all-nullable (`empty_tail_p`), which drives the
//! combined shift-and-complete step of the engine.

use crate::grammar::Grammar;
use crate::rules::RuleId;
use crate::symbols::SymbolKind;
use crate::termset::{TermSet, TermSetId, TermSetStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DottedRuleId(pub(crate) u32);

impl DottedRuleId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub(crate) struct DottedRule {
    pub id: DottedRuleId,
    pub rule: RuleId,
    pub dot: usize,
    /// Id of the context terminal set (dynamic lookahead only; 0 otherwise).
    pub context: u32,
    /// FIRST(tail), extended by FOLLOW(lhs) at lookahead level 1 or by the
    /// context set at level 2 when the tail is nullable. Lives in the
    /// run-local terminal-set store.
    pub lookahead: TermSetId,
    /// True iff every RHS symbol from the dot onward can derive empty.
    pub empty_tail_p: bool,
}

/// Run-local interning pool; ids are dense and increase monotonically.
#[derive(Debug, Default)]
pub(crate) struct DottedRulePool {
    all: Vec<DottedRule>,
    /// `by_slot[context][rule_start_offset + dot]`
    by_slot: Vec<Vec<Option<DottedRuleId>>>,
    slots: usize,
}

impl DottedRulePool {
    pub fn new(g: &Grammar) -> Self {
        Self { all: Vec::new(), by_slot: Vec::new(), slots: g.rules.dotted_slots() }
    }

    pub fn get(&self, id: DottedRuleId) -> &DottedRule {
        &self.all[id.index()]
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Find or create the dotted rule (rule, dot, context).
    pub fn intern(
        &mut self,
        g: &Grammar,
        run_sets: &mut TermSetStore,
        rule: RuleId,
        dot: usize,
        context: u32,
    ) -> DottedRuleId {
        let ctx = context as usize;
        if self.by_slot.len() <= ctx {
            let slots = self.slots;
            self.by_slot.resize_with(ctx + 1, || vec![None; slots]);
        }
        let slot = g.rules.get(rule).rule_start_offset + dot;
        if let Some(id) = self.by_slot[ctx][slot] {
            return id;
        }

        let (lookahead, empty_tail_p) = compute_lookahead(g, run_sets, rule, dot, context);
        let id = DottedRuleId(self.all.len() as u32);
        self.all.push(DottedRule { id, rule, dot, context, lookahead, empty_tail_p });
        self.by_slot[ctx][slot] = Some(id);
        id
    }
}

/// Walk the RHS from the dot, OR-ing FIRST of each symbol, stopping at the
/// first non-nullable one. A walk that falls off the end marks the tail
/// nullable and extends the lookahead per the lookahead level.
fn compute_lookahead(
    g: &Grammar,
    run_sets: &mut TermSetStore,
    rule: RuleId,
    dot: usize,
    context: u32,
) -> (TermSetId, bool) {
    let level = g.lookahead_level;
    let r = g.rules.get(rule);
    let mut la = TermSet::new(g.symbs.num_terminals());
    let mut tail_empty = true;
    for &symb in &r.rhs[dot..] {
        let s = g.symbs.get(symb);
        if level != 0 {
            match &s.kind {
                SymbolKind::Terminal { term_id, .. } => {
                    la.set_bit(*term_id);
                }
                SymbolKind::Nonterminal { first, .. } => {
                    la.or_with(g.term_sets.get(first.expect("analysis ran")));
                }
            }
        }
        if !s.empty_p {
            tail_empty = false;
            break;
        }
    }
    if tail_empty {
        if level == 1 {
            let follow = match &g.symbs.get(r.lhs).kind {
                SymbolKind::Nonterminal { follow, .. } => follow.expect("analysis ran"),
                SymbolKind::Terminal { .. } => unreachable!("rule LHS is a terminal"),
            };
            la.or_with(g.term_sets.get(follow));
        } else if level > 1 {
            la.or_with(run_sets.get(TermSetId(context)));
        }
    }
    let (id, _) = run_sets.intern(&la);
    (id, tail_empty)
}
