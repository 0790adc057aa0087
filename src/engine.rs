//! The Earley engine.
//!
//! State set 0 is seeded from the axiom rules; every input token then runs
//! one combined scan/complete/predict step producing the next state set.
//! A (set, terminal, lookahead) goto cache short-circuits the step when an
//! identical transition was built before and its origin sets still match.
//! An unexpected token hands control to the error-recovery search.

use std::error::Error;
use std::fmt;

use fnv::FnvHashMap;
use log::{debug, trace};

use crate::coreindex::{CoreSymbIndex, EntryId};
use crate::dotted::DottedRulePool;
use crate::forest::{self, Forest};
use crate::grammar::Grammar;
use crate::sets::{CoreId, StateSetId, StateSetPool};
use crate::symbols::SymbolId;
use crate::termset::{TermSet, TermSetStore};

/// Goto results remembered per (set, terminal, lookahead) key. A tunable
/// constant; three entries catch nearly all reuse in practice.
pub(crate) const MAX_CACHED_GOTO_RESULTS: usize = 3;

/// One input token: a terminal code plus an opaque attribute the caller can
/// recover from terminal nodes of the forest (byte offsets, typically).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub code: i32,
    pub attr: usize,
}

/// Yields input tokens; `None` ends the input. Returning `None` early is
/// the cooperative way to cancel a run.
pub trait TokenSource {
    fn read_token(&mut self) -> Option<Token>;
}

/// The default token source: Unicode codepoints straight from a string,
/// attributed with their byte offsets.
#[derive(Debug)]
pub struct Utf8Tokens<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Utf8Tokens<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl TokenSource for Utf8Tokens<'_> {
    fn read_token(&mut self) -> Option<Token> {
        let ch = self.text[self.pos..].chars().next()?;
        let attr = self.pos;
        self.pos += ch.len_utf8();
        Some(Token { code: ch as i32, attr })
    }
}

/// Errors that stop a parse before any state set is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The grammar was never read successfully.
    UndefinedOrBadGrammar,
    /// A token code with no declared terminal, at this input offset.
    InvalidTokenCode { offset: usize, code: i32 },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedOrBadGrammar => write!(f, "undefined or bad grammar"),
            Self::InvalidTokenCode { offset, code } => {
                write!(f, "invalid token code {code} at offset {offset}")
            }
        }
    }
}

impl Error for ParseError {}

/// Passed to the syntax-error callback. `ignored` and `recovered` describe
/// the recovery span (token index, attribute); both are `None` when error
/// recovery is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxErrorEvent {
    pub err_tok: usize,
    pub err_attr: usize,
    pub ignored: Option<(usize, usize)>,
    pub recovered: Option<(usize, usize)>,
}

/// What a finished parse hands back: the forest (absent only when a syntax
/// error stopped an unrecovered parse) and the ambiguity flag, which is
/// reported even when only one parse was built.
#[derive(Debug)]
pub struct ParseOutcome {
    pub forest: Option<Forest>,
    pub ambiguous: bool,
}

type ErrorCallback<'g> = Box<dyn FnMut(&SyntaxErrorEvent) + 'g>;

/// One parse over one token stream. Holds all run-local state; the grammar
/// is only read. Distinct runs over one grammar may live on distinct
/// threads.
pub struct ParseRun<'g> {
    grammar: &'g Grammar,
    on_error: Option<ErrorCallback<'g>>,
}

impl<'g> ParseRun<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar, on_error: None }
    }

    /// Install the syntax-error callback. Without one, errors are logged.
    pub fn on_syntax_error(&mut self, f: impl FnMut(&SyntaxErrorEvent) + 'g) {
        self.on_error = Some(Box::new(f));
    }

    /// Parse the token stream. Syntax errors go through the callback: with
    /// error recovery on, parsing resumes past the reported span; with it
    /// off, the callback fires once and the outcome carries no forest.
    pub fn parse(&mut self, tokens: &mut dyn TokenSource) -> Result<ParseOutcome, ParseError> {
        if self.grammar.is_undefined() {
            return Err(ParseError::UndefinedOrBadGrammar);
        }
        let mut cb = self.on_error.take();
        let outcome = {
            let mut ps = ParseState::new(self.grammar, cb.as_deref_mut());
            match ps.read_input(tokens) {
                Ok(()) => {
                    ps.perform_parse();
                    let mut ambiguous = false;
                    let forest = forest::build_parse_tree(&ps, &mut ambiguous);
                    ps.log_statistics(ambiguous);
                    Ok(ParseOutcome { forest, ambiguous })
                }
                Err(e) => Err(e),
            }
        };
        self.on_error = cb;
        outcome
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct InputToken {
    pub symb: SymbolId,
    pub attr: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct GotoEntry {
    /// Saved goto sets with the state-set index they were built from,
    /// overwritten in rotation.
    results: [Option<(StateSetId, usize)>; MAX_CACHED_GOTO_RESULTS],
    curr: usize,
}

/// Everything mutable during one parse.
pub(crate) struct ParseState<'g, 'cb> {
    pub g: &'g Grammar,
    on_error: Option<&'cb mut (dyn FnMut(&SyntaxErrorEvent) + 'g)>,

    pub input: Vec<InputToken>,
    pub tok_i: usize,
    pub set_k: usize,
    pub state_sets: Vec<StateSetId>,

    pub dotted: DottedRulePool,
    pub pool: StateSetPool,
    pub index: CoreSymbIndex,
    /// Lookahead and context sets of this run (FIRST/FOLLOW stay in the
    /// grammar's own store).
    pub run_sets: TermSetStore,

    goto_cache: FnvHashMap<(StateSetId, SymbolId, i32), GotoEntry>,
    pub n_goto_successes: usize,

    // Error-recovery bookkeeping, driven from recovery.rs.
    pub recovery_start_set_k: usize,
    pub recovery_start_tok_i: usize,
    pub back_state_set_frontier: usize,
    pub original_last_state_set_el: isize,
    pub original_tail: Vec<StateSetId>,
    pub recovery_state_stack: Vec<crate::recovery::RecoveryState>,
}

impl<'g, 'cb> ParseState<'g, 'cb> {
    pub fn new(g: &'g Grammar, on_error: Option<&'cb mut (dyn FnMut(&SyntaxErrorEvent) + 'g)>) -> Self {
        Self {
            g,
            on_error,
            input: Vec::new(),
            tok_i: 0,
            set_k: 0,
            state_sets: Vec::new(),
            dotted: DottedRulePool::new(g),
            pool: StateSetPool::new(),
            index: CoreSymbIndex::new(),
            run_sets: TermSetStore::new(),
            goto_cache: FnvHashMap::default(),
            n_goto_successes: 0,
            recovery_start_set_k: 0,
            recovery_start_tok_i: 0,
            back_state_set_frontier: 0,
            original_last_state_set_el: -1,
            original_tail: Vec::new(),
            recovery_state_stack: Vec::new(),
        }
    }

    pub(crate) fn report_syntax_error(&mut self, ev: SyntaxErrorEvent) {
        match &mut self.on_error {
            Some(cb) => cb(&ev),
            None => log::error!(
                "syntax error on token {} (attr {}), ignored {:?}, recovered {:?}",
                ev.err_tok,
                ev.err_attr,
                ev.ignored,
                ev.recovered
            ),
        }
    }

    /// Pull every token, map codes to terminals, and append the end marker.
    fn read_input(&mut self, tokens: &mut dyn TokenSource) -> Result<(), ParseError> {
        while let Some(tok) = tokens.read_token() {
            let symb = self
                .g
                .symbs
                .find_by_code(tok.code)
                .ok_or(ParseError::InvalidTokenCode { offset: self.input.len(), code: tok.code })?;
            self.input.push(InputToken { symb, attr: tok.attr });
        }
        let end_marker = self.g.end_marker.expect("grammar is defined");
        self.input.push(InputToken { symb: end_marker, attr: 0 });
        Ok(())
    }

    pub(crate) fn put_state_set(&mut self, k: usize, set: StateSetId) {
        if self.state_sets.len() <= k {
            self.state_sets.resize(k + 1, set);
        }
        self.state_sets[k] = set;
    }

    /// Build state set 0 from the axiom rules and expand it.
    fn build_start_set(&mut self) {
        let g = self.g;
        self.pool.begin_new_set();
        let context = 0;
        if g.lookahead_level > 1 {
            // The empty context always has id 0 in the run store.
            let empty = TermSet::new(g.symbs.num_terminals());
            let (id, _) = self.run_sets.intern(&empty);
            debug_assert_eq!(id.index(), 0);
        }
        let axiom = g.axiom.expect("grammar is defined");
        for &rule in g.symbs.get(axiom).lhs_rules() {
            let dr = self.dotted.intern(g, &mut self.run_sets, rule, 0, context);
            self.pool.add_started(dr, 0);
        }
        let (set, fresh_core) = self.pool.commit(None);
        debug_assert!(fresh_core);
        let core = self.pool.set(set).core;
        self.expand_new_set(core);
        self.put_state_set(0, set);
    }

    /// Add the predicted dotted rules of a freshly interned core and build
    /// its (core, symbol) prediction/completion vectors.
    fn expand_new_set(&mut self, core: CoreId) {
        let g = self.g;

        // Predictions inherited through nullable symbols: for each started
        // rule, advance the dot over the run of nullable RHS symbols; each
        // shifted rule keeps the parent's matched length.
        let num_started = self.pool.core(core).num_started;
        for parent in 0..num_started {
            let dr_id = self.pool.core(core).dotted_rules[parent];
            let (rule, dot, context) = {
                let dr = self.dotted.get(dr_id);
                (dr.rule, dr.dot, dr.context)
            };
            let rhs_len = g.rules.get(rule).rhs_len();
            let mut j = dot;
            while j < rhs_len {
                let symb = g.rules.get(rule).rhs[j];
                if !g.symbs.get(symb).empty_p {
                    break;
                }
                let new_dr = self.dotted.intern(g, &mut self.run_sets, rule, j + 1, context);
                self.pool.core_add_parented(core, new_dr, parent as u32);
                j += 1;
            }
        }

        // Prediction vectors; initial dotted rules for predicted
        // nonterminals. The core grows while we walk it.
        let mut i = 0;
        while i < self.pool.core(core).len() {
            let dr_id = self.pool.core(core).dotted_rules[i];
            let (rule, dot) = {
                let dr = self.dotted.get(dr_id);
                (dr.rule, dr.dot)
            };
            if dot < g.rules.get(rule).rhs_len() {
                let symb = g.rules.get(rule).rhs[dot];
                let (entry, created) = self.index.find_or_new(core, symb);
                if created && !g.symbs.get(symb).is_terminal() {
                    for &nt_rule in g.symbs.get(symb).lhs_rules() {
                        let initial = self.dotted.intern(g, &mut self.run_sets, nt_rule, 0, 0);
                        self.pool.core_add_initial(core, initial);
                        trace!("predicted dotted rule {}", initial.0);
                    }
                }
                self.index.add_prediction(entry, i as u32);

                if g.symbs.get(symb).empty_p && i >= self.pool.core(core).num_all_matched_lengths {
                    let shifted = self.dotted.intern(g, &mut self.run_sets, rule, dot + 1, 0);
                    self.pool.core_add_initial(core, shifted);
                    trace!("shifted-over-nullable dotted rule {}", shifted.0);
                }
            }
            i += 1;
        }

        // Completion vectors.
        for i in 0..self.pool.core(core).len() {
            let dr_id = self.pool.core(core).dotted_rules[i];
            let (rule, dot) = {
                let dr = self.dotted.get(dr_id);
                (dr.rule, dr.dot)
            };
            if dot == g.rules.get(rule).rhs_len() {
                let lhs = g.rules.get(rule).lhs;
                let (entry, _) = self.index.find_or_new(core, lhs);
                self.index.add_completion(entry, i as u32);
            }
        }

        // Dynamic lookahead: initial dotted rules start with the empty
        // context; recompute each context as the OR of the shifted
        // predictions' lookaheads until nothing changes.
        if g.lookahead_level > 1 {
            let mut context_set = TermSet::new(g.symbs.num_terminals());
            loop {
                let mut changed = false;
                let lo = self.pool.core(core).num_all_matched_lengths;
                let hi = self.pool.core(core).len();
                for i in lo..hi {
                    let old_id = self.pool.core(core).dotted_rules[i];
                    let (rule, dot) = {
                        let dr = self.dotted.get(old_id);
                        (dr.rule, dr.dot)
                    };
                    let lhs = g.rules.get(rule).lhs;
                    context_set.clear();
                    if let Some(entry) = self.index.find(core, lhs) {
                        for &pred_idx in self.index.predictions(entry).to_vec().iter() {
                            let pred_id = self.pool.core(core).dotted_rules[pred_idx as usize];
                            let (p_rule, p_dot, p_ctx) = {
                                let p = self.dotted.get(pred_id);
                                (p.rule, p.dot, p.context)
                            };
                            let shifted =
                                self.dotted.intern(g, &mut self.run_sets, p_rule, p_dot + 1, p_ctx);
                            let la = self.dotted.get(shifted).lookahead;
                            context_set.or_with(self.run_sets.get(la));
                        }
                    }
                    let (context, _) = self.run_sets.intern(&context_set);
                    let refined =
                        self.dotted.intern(g, &mut self.run_sets, rule, dot, context.0 as u32);
                    if refined != old_id {
                        self.pool.core_replace_dotted_rule(core, i, refined);
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
            }
        }

        self.index.freeze_new();
    }

    /// The combined scan/complete/predict step: shift the predictions of
    /// (set, entry), chase completions of nullable-tail results, then
    /// commit (and expand, if the core is new). `shift_symb` is the symbol
    /// whose shift this is, recorded on fresh cores for the recovery
    /// search. Lookahead filtering is skipped when `next_term` is absent.
    pub(crate) fn complete_and_predict(
        &mut self,
        set: StateSetId,
        entry: EntryId,
        shift_symb: SymbolId,
        next_term: Option<SymbolId>,
    ) -> StateSetId {
        let g = self.g;
        let lookahead_term_id = next_term.map(|s| g.symbs.get(s).term_id() as i32).unwrap_or(-1);
        let local_level = if lookahead_term_id < 0 { 0 } else { g.lookahead_level };
        let term_error_id = g.term_error_id;

        let set_core = self.pool.set(set).core;
        self.pool.begin_new_set();
        self.pool.clear_dedupe();

        let predictions = self.index.predictions(entry).to_vec();
        for dr_idx in predictions {
            let dr_id = self.pool.core(set_core).dotted_rules[dr_idx as usize];
            let (rule, dot, context) = {
                let dr = self.dotted.get(dr_id);
                (dr.rule, dr.dot, dr.context)
            };
            let new_dr = self.dotted.intern(g, &mut self.run_sets, rule, dot + 1, context);
            if local_level != 0 {
                let la = self.run_sets.get(self.dotted.get(new_dr).lookahead);
                if !la.test(lookahead_term_id as u32) && !la.test(term_error_id) {
                    continue;
                }
            }
            let matched_length = self.pool.matched_length(set, dr_idx as usize) + 1;
            if !self.pool.test_and_set_dedupe(new_dr, matched_length) {
                self.pool.add_started(new_dr, matched_length);
            }
        }

        // Every added rule whose tail derives empty is also complete:
        // shift its LHS in the origin set, chaining matched lengths. New
        // entries keep the loop going.
        let mut i = 0;
        while i < self.pool.num_new_started() {
            let (new_dr_id, new_matched_length) = self.pool.new_started_at(i);
            i += 1;
            if !self.dotted.get(new_dr_id).empty_tail_p {
                continue;
            }
            let place = self.set_k + 1 - new_matched_length as usize;
            let prev_set = self.state_sets[place];
            let prev_core = self.pool.set(prev_set).core;
            let lhs = g.rules.get(self.dotted.get(new_dr_id).rule).lhs;
            let prev_entry = match self.index.find(prev_core, lhs) {
                Some(e) => e,
                None => {
                    debug_assert_eq!(Some(lhs), g.axiom);
                    continue;
                }
            };
            let predictions = self.index.predictions(prev_entry).to_vec();
            for dr_idx in predictions {
                let dr_id = self.pool.core(prev_core).dotted_rules[dr_idx as usize];
                let (rule, dot, context) = {
                    let dr = self.dotted.get(dr_id);
                    (dr.rule, dr.dot, dr.context)
                };
                let new_dr = self.dotted.intern(g, &mut self.run_sets, rule, dot + 1, context);
                if local_level != 0 {
                    let la = self.run_sets.get(self.dotted.get(new_dr).lookahead);
                    if !la.test(lookahead_term_id as u32) && !la.test(term_error_id) {
                        continue;
                    }
                }
                let matched_length =
                    self.pool.matched_length(prev_set, dr_idx as usize) + new_matched_length;
                if !self.pool.test_and_set_dedupe(new_dr, matched_length) {
                    self.pool.add_started(new_dr, matched_length);
                }
            }
        }

        let (new_set, fresh_core) = self.pool.commit(Some(shift_symb));
        if fresh_core {
            let core = self.pool.set(new_set).core;
            self.expand_new_set(core);
        }
        new_set
    }

    /// Consult the goto cache; a hit is only reused when the origin sets
    /// of all its started rules with matched length > 1 still match.
    fn cached_goto(&mut self, key: (StateSetId, SymbolId, i32)) -> Option<StateSetId> {
        let entry = self.goto_cache.get(&key).copied()?;
        for slot in entry.results.iter() {
            let (set, place) = match slot {
                Some(pair) => *pair,
                None => break,
            };
            if self.check_cached_transition_set(set, place) {
                self.n_goto_successes += 1;
                return Some(set);
            }
        }
        None
    }

    fn check_cached_transition_set(&self, set: StateSetId, place: usize) -> bool {
        let s = self.pool.set(set);
        let lengths = self.pool.lengths(s.lengths);
        for i in (0..self.pool.core(s.core).num_started).rev() {
            let dist = lengths[i] as usize;
            if dist <= 1 {
                // origin sets of distance-one rules are the same by construction
                continue;
            }
            if self.state_sets[self.set_k + 1 - dist] != self.state_sets[place + 1 - dist] {
                return false;
            }
        }
        true
    }

    fn save_cached_goto(&mut self, key: (StateSetId, SymbolId, i32), new_set: StateSetId) {
        let place = self.set_k;
        let entry = self.goto_cache.entry(key).or_default();
        entry.results[entry.curr] = Some((new_set, place));
        entry.curr = (entry.curr + 1) % MAX_CACHED_GOTO_RESULTS;
    }

    /// The main loop over input tokens.
    fn perform_parse(&mut self) {
        self.recovery_init();
        self.build_start_set();
        debug!("begin parse, {} tokens", self.input.len());

        self.tok_i = 0;
        self.set_k = 0;
        while self.tok_i < self.input.len() {
            let terminal = self.input[self.tok_i].symb;
            let next_term = if self.g.lookahead_level != 0 && self.tok_i + 1 < self.input.len() {
                Some(self.input[self.tok_i + 1].symb)
            } else {
                None
            };
            trace!(
                "scan input[{}] = {} at set {}",
                self.tok_i,
                self.g.symbs.repr(terminal),
                self.set_k
            );

            let set = self.state_sets[self.set_k];
            let lookahead_code =
                next_term.map(|s| self.g.symbs.get(s).term_id() as i32).unwrap_or(-1);
            let key = (set, terminal, lookahead_code);

            let mut new_set = self.cached_goto(key);
            if new_set.is_none() {
                let core = self.pool.set(set).core;
                match self.index.find(core, terminal) {
                    None => {
                        // No transition on this terminal: syntax error.
                        match self.try_to_recover() {
                            RecoverOutcome::Recovered => {
                                self.tok_i += 1;
                                continue;
                            }
                            RecoverOutcome::Stopped => break,
                        }
                    }
                    Some(entry) => {
                        let built = self.complete_and_predict(set, entry, terminal, next_term);
                        self.save_cached_goto(key, built);
                        new_set = Some(built);
                    }
                }
            }

            let new_set = new_set.expect("either cached or freshly built");
            self.set_k += 1;
            self.put_state_set(self.set_k, new_set);
            self.tok_i += 1;
        }
        debug!("end parse");
    }

    fn log_statistics(&self, ambiguous: bool) {
        debug!(
            "{}parse statistics: {} terminals, {} nonterms, {} rules",
            if ambiguous { "AMBIGUOUS " } else { "" },
            self.g.symbs.num_terminals(),
            self.g.symbs.num_nonterminals(),
            self.g.rules.len()
        );
        debug!(
            "  {} tokens, {} unique dotted rules, {} terminal sets",
            self.input.len(),
            self.dotted.len(),
            self.run_sets.len()
        );
        debug!(
            "  {} set cores, {} matched-length vecs, {} sets, {} parent indexes",
            self.pool.num_cores(),
            self.pool.num_length_vecs(),
            self.pool.num_sets(),
            self.pool.num_parent_ids
        );
        debug!(
            "  {} (core, symbol) pairs, {} unique vectors, {} goto successes",
            self.index.num_pairs(),
            self.index.num_unique_vects(),
            self.n_goto_successes
        );
    }
}

pub(crate) enum RecoverOutcome {
    /// Recovery succeeded; continue scanning from the restored position.
    Recovered,
    /// Recovery is disabled; the error was reported once, stop parsing.
    Stopped,
}
