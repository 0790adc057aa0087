//! The grammar object and its reader.
//!
//! A grammar is fed by a [`GrammarSource`]: first every terminal (name and
//! code), then every rule (LHS, RHS names, optional abstract-node
//! translation, mark characters). Nonterminals are created on first use.
//! Reading injects the canonical start rule `$S : <start> $eof` ahead of
//! everything else and an `$S : error $eof` recovery rule after, then runs
//! the analyzer (reachability, derivability, loops, FIRST/FOLLOW) and
//! closes the terminal table.
//!
//! A grammar that read successfully is immutable apart from the option
//! setters and may be shared by concurrent parse runs; each run only reads
//! the grammar-derived tables.

use std::error::Error;
use std::fmt;

use itertools::Itertools;
use log::debug;
use smol_str::SmolStr;

use crate::analysis;
use crate::rules::{RuleId, RuleStore, TRANSLATE_NIL};
use crate::symbols::{SymbolId, SymbolKind, SymbolTable};
use crate::termset::TermSetStore;

pub(crate) const AXIOM_NAME: &str = "$S";
pub(crate) const END_MARKER_NAME: &str = "$eof";
pub(crate) const TERM_ERROR_NAME: &str = "error";

pub(crate) const END_MARKER_CODE: i32 = -1;
pub(crate) const TERM_ERROR_CODE: i32 = -2;

const DEFAULT_RECOVERY_TOKEN_MATCHES: i32 = 3;

/// Errors surfaced while reading a grammar description. A failed read
/// leaves the grammar undefined; parsing with it reports
/// [`crate::ParseError::UndefinedOrBadGrammar`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    /// A reserved name (`$S`, `$eof`, `error`) was declared by the caller.
    FixedNameUsage(SmolStr),
    RepeatedTermDecl(SmolStr),
    NegativeTermCode(SmolStr, i32),
    RepeatedTermCode(SmolStr, i32),
    NoRules,
    TermInRuleLhs(SmolStr),
    /// Two translation slots without an abstract node to hold them.
    IncorrectTranslation(SmolStr),
    NegativeCost(SmolStr),
    IncorrectSymbolNumber(SmolStr, i32),
    RepeatedSymbolNumber(SmolStr, i32),
    UnaccessibleNonTerm(SmolStr),
    NonTermDerivation(SmolStr),
    LoopNonTerm(SmolStr),
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedNameUsage(name) => write!(f, "do not use fixed name `{name}`"),
            Self::RepeatedTermDecl(name) => write!(f, "repeated declaration of term `{name}`"),
            Self::NegativeTermCode(name, code) => {
                write!(f, "term `{name}` has negative code {code}")
            }
            Self::RepeatedTermCode(name, code) => {
                write!(f, "repeated code {code} in term `{name}`")
            }
            Self::NoRules => write!(f, "grammar does not contain rules"),
            Self::TermInRuleLhs(name) => {
                write!(f, "term `{name}` in the left hand side of rule")
            }
            Self::IncorrectTranslation(lhs) => {
                write!(f, "rule for `{lhs}` has incorrect translation")
            }
            Self::NegativeCost(lhs) => {
                write!(f, "translation for `{lhs}` has negative cost")
            }
            Self::IncorrectSymbolNumber(lhs, n) => {
                write!(f, "translation symbol number {n} in rule for `{lhs}` is out of range")
            }
            Self::RepeatedSymbolNumber(lhs, n) => {
                write!(f, "repeated translation symbol number {n} in rule for `{lhs}`")
            }
            Self::UnaccessibleNonTerm(name) => {
                write!(f, "nonterm `{name}` is not accessible from axiom")
            }
            Self::NonTermDerivation(name) => {
                write!(f, "nonterm `{name}` does not derive any term string")
            }
            Self::LoopNonTerm(name) => {
                write!(f, "nonterm `{name}` can derive only itself (grammar with loops)")
            }
        }
    }
}

impl Error for GrammarError {}

/// One terminal declaration: external name plus its unique nonnegative code.
#[derive(Debug, Clone)]
pub struct TerminalDef {
    pub name: SmolStr,
    pub code: i32,
}

/// One rule as delivered by a [`GrammarSource`].
///
/// `transl` lists, per translation slot, the RHS index whose translation
/// fills that slot; [`TRANSLATE_NIL`] emits a nil child and a negative
/// element terminates the list early. An empty list (or one terminated
/// immediately) makes the whole translation a nil node. Without `anode`,
/// at most one slot is allowed: the rule translates to that symbol's
/// translation.
#[derive(Debug, Clone, Default)]
pub struct RuleDef {
    pub lhs: SmolStr,
    pub rhs: Vec<SmolStr>,
    pub anode: Option<SmolStr>,
    pub anode_cost: i32,
    pub transl: Vec<i32>,
    /// Rule-level mark character, opaque to the engine ('\0' = none).
    pub mark: char,
    /// Per-RHS mark characters, opaque to the engine.
    pub marks: Vec<char>,
}

/// Supplies terminals and then rules to [`Grammar::read_grammar`].
/// All terminals are requested before the first rule.
pub trait GrammarSource {
    fn next_terminal(&mut self) -> Option<TerminalDef>;
    fn next_rule(&mut self) -> Option<RuleDef>;
}

/// A plain in-memory [`GrammarSource`]: declared terminals and rules held
/// in vectors and replayed in order. Front-ends lower their surface syntax
/// into one of these.
#[derive(Debug, Default)]
pub struct DescGrammar {
    terminals: Vec<TerminalDef>,
    rules: Vec<RuleDef>,
    next_term: usize,
    next_rule: usize,
}

impl DescGrammar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminal(&mut self, name: &str, code: i32) -> &mut Self {
        self.terminals.push(TerminalDef { name: SmolStr::new(name), code });
        self
    }

    /// A rule whose translation is nil.
    pub fn rule(&mut self, lhs: &str, rhs: &[&str]) -> &mut Self {
        self.def(RuleDef {
            lhs: SmolStr::new(lhs),
            rhs: rhs.iter().map(SmolStr::new).collect(),
            ..RuleDef::default()
        })
    }

    /// A rule translating to the translation of RHS position `idx`.
    pub fn pass_rule(&mut self, lhs: &str, rhs: &[&str], idx: i32) -> &mut Self {
        self.def(RuleDef {
            lhs: SmolStr::new(lhs),
            rhs: rhs.iter().map(SmolStr::new).collect(),
            transl: vec![idx],
            ..RuleDef::default()
        })
    }

    /// A rule building abstract node `anode` with the given cost, its
    /// children drawn from the RHS positions in `transl`.
    pub fn anode_rule(
        &mut self,
        lhs: &str,
        rhs: &[&str],
        anode: &str,
        cost: i32,
        transl: &[i32],
    ) -> &mut Self {
        self.def(RuleDef {
            lhs: SmolStr::new(lhs),
            rhs: rhs.iter().map(SmolStr::new).collect(),
            anode: Some(SmolStr::new(anode)),
            anode_cost: cost,
            transl: transl.to_vec(),
            ..RuleDef::default()
        })
    }

    /// Add a fully spelled-out rule definition.
    pub fn def(&mut self, def: RuleDef) -> &mut Self {
        self.rules.push(def);
        self
    }
}

impl GrammarSource for DescGrammar {
    fn next_terminal(&mut self) -> Option<TerminalDef> {
        let def = self.terminals.get(self.next_term)?.clone();
        self.next_term += 1;
        Some(def)
    }

    fn next_rule(&mut self) -> Option<RuleDef> {
        let def = self.rules.get(self.next_rule)?.clone();
        self.next_rule += 1;
        Some(def)
    }
}

/// A compiled grammar: symbol table, rule store, analysis results, and the
/// parser options. Owned separately from any parse run and shareable
/// read-only between runs.
#[derive(Debug)]
pub struct Grammar {
    pub(crate) symbs: SymbolTable,
    pub(crate) rules: RuleStore,
    pub(crate) term_sets: TermSetStore,

    pub(crate) axiom: Option<SymbolId>,
    pub(crate) end_marker: Option<SymbolId>,
    pub(crate) term_error: Option<SymbolId>,
    pub(crate) term_error_id: u32,

    undefined_p: bool,

    pub(crate) lookahead_level: i32,
    pub(crate) recovery_token_matches: i32,
    pub(crate) one_parse_p: bool,
    pub(crate) cost_p: bool,
    pub(crate) error_recovery_p: bool,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar {
    pub fn new() -> Self {
        Self {
            symbs: SymbolTable::new(),
            rules: RuleStore::new(),
            term_sets: TermSetStore::new(),
            axiom: None,
            end_marker: None,
            term_error: None,
            term_error_id: 0,
            undefined_p: true,
            lookahead_level: 1,
            recovery_token_matches: DEFAULT_RECOVERY_TOKEN_MATCHES,
            one_parse_p: true,
            cost_p: false,
            error_recovery_p: true,
        }
    }

    /// 0 = no lookahead, 1 = static (FOLLOW), 2 = dynamic contexts.
    /// Out-of-range levels are clamped. Returns the previous level.
    pub fn set_lookahead_level(&mut self, level: i32) -> i32 {
        let old = self.lookahead_level;
        self.lookahead_level = level.clamp(0, 2);
        old
    }

    /// Build only the first parse (default). Returns the previous value.
    pub fn set_one_parse(&mut self, flag: bool) -> bool {
        std::mem::replace(&mut self.one_parse_p, flag)
    }

    /// Keep only cost-minimal alternatives of an ambiguous parse.
    pub fn set_cost(&mut self, flag: bool) -> bool {
        std::mem::replace(&mut self.cost_p, flag)
    }

    /// Recover from syntax errors instead of stopping (default on).
    pub fn set_error_recovery(&mut self, flag: bool) -> bool {
        std::mem::replace(&mut self.error_recovery_p, flag)
    }

    /// How many subsequent tokens must shift cleanly before an error
    /// recovery counts as successful. Returns the previous value.
    pub fn set_recovery_match(&mut self, n_tokens: i32) -> i32 {
        std::mem::replace(&mut self.recovery_token_matches, n_tokens)
    }

    pub fn is_undefined(&self) -> bool {
        self.undefined_p
    }

    fn clear(&mut self) {
        self.symbs = SymbolTable::new();
        self.rules = RuleStore::new();
        self.term_sets = TermSetStore::new();
        self.axiom = None;
        self.end_marker = None;
        self.term_error = None;
        self.term_error_id = 0;
        self.undefined_p = true;
    }

    /// Start a rule and register it with its LHS nonterminal.
    fn new_rule(&mut self, lhs: SymbolId, anode: Option<SmolStr>, anode_cost: i32) -> RuleId {
        let id = self.rules.start_rule(lhs, anode, anode_cost);
        match &mut self.symbs.get_mut(lhs).kind {
            SymbolKind::Nonterminal { rules, .. } => rules.push(id),
            SymbolKind::Terminal { .. } => unreachable!("rule LHS is a terminal"),
        }
        id
    }

    fn find_or_add_nonterm(&mut self, name: &str) -> SymbolId {
        match self.symbs.find_by_repr(name) {
            Some(id) => id,
            None => self.symbs.add_nonterm(name),
        }
    }

    /// Read terminals and rules from `source` and compile the grammar.
    /// With `strict` every nonterminal must be reachable and derive some
    /// terminal string; otherwise only the axiom's derivability is
    /// enforced. Loops are always rejected.
    pub fn read_grammar(
        &mut self,
        source: &mut dyn GrammarSource,
        strict: bool,
    ) -> Result<(), GrammarError> {
        self.clear();
        match self.read_grammar_body(source, strict) {
            Ok(()) => {
                self.undefined_p = false;
                Ok(())
            }
            Err(e) => {
                // Partial state rolls back to "undefined".
                self.clear();
                Err(e)
            }
        }
    }

    fn read_grammar_body(
        &mut self,
        source: &mut dyn GrammarSource,
        strict: bool,
    ) -> Result<(), GrammarError> {
        while let Some(term) = source.next_terminal() {
            if term.code < 0 {
                return Err(GrammarError::NegativeTermCode(term.name, term.code));
            }
            if self.symbs.find_by_repr(&term.name).is_some() {
                return Err(GrammarError::RepeatedTermDecl(term.name));
            }
            if self.symbs.find_by_code(term.code).is_some() {
                return Err(GrammarError::RepeatedTermCode(term.name, term.code));
            }
            self.symbs.add_terminal(&term.name, term.code);
        }

        if self.symbs.find_by_repr(TERM_ERROR_NAME).is_some() {
            return Err(GrammarError::FixedNameUsage(SmolStr::new(TERM_ERROR_NAME)));
        }
        let term_error = self.symbs.add_terminal(TERM_ERROR_NAME, TERM_ERROR_CODE);
        self.term_error = Some(term_error);
        self.term_error_id = self.symbs.get(term_error).term_id();

        let mut start = None;
        while let Some(def) = source.next_rule() {
            let lhs = self.find_or_add_nonterm(&def.lhs);
            if self.symbs.get(lhs).is_terminal() {
                return Err(GrammarError::TermInRuleLhs(def.lhs));
            }
            if def.anode.is_none()
                && def.transl.len() >= 2
                && def.transl[0] >= 0
                && def.transl[1] >= 0
            {
                return Err(GrammarError::IncorrectTranslation(def.lhs));
            }
            if def.anode.is_some() && def.anode_cost < 0 {
                return Err(GrammarError::NegativeCost(def.lhs));
            }
            if self.axiom.is_none() {
                // The canonical start rule is created on the first user rule
                // so that it gets rule number 0.
                start = Some(lhs);
                if self.symbs.find_by_repr(AXIOM_NAME).is_some() {
                    return Err(GrammarError::FixedNameUsage(SmolStr::new(AXIOM_NAME)));
                }
                let axiom = self.symbs.add_nonterm(AXIOM_NAME);
                self.axiom = Some(axiom);
                if self.symbs.find_by_repr(END_MARKER_NAME).is_some() {
                    return Err(GrammarError::FixedNameUsage(SmolStr::new(END_MARKER_NAME)));
                }
                debug_assert!(self.symbs.find_by_code(END_MARKER_CODE).is_none());
                let end_marker = self.symbs.add_terminal(END_MARKER_NAME, END_MARKER_CODE);
                self.end_marker = Some(end_marker);

                let start_rule = self.new_rule(axiom, None, 0);
                self.rules.add_rhs_symbol(start_rule, lhs);
                self.rules.add_rhs_symbol(start_rule, end_marker);
                let r = self.rules.get_mut(start_rule);
                r.order[0] = 0;
                r.trans_len = 1;
            }
            let cost = if def.anode.is_some() { def.anode_cost } else { 0 };
            let rule = self.new_rule(lhs, def.anode.clone(), cost);
            for name in &def.rhs {
                let symb = self.find_or_add_nonterm(name);
                self.rules.add_rhs_symbol(rule, symb);
            }
            {
                let r = self.rules.get_mut(rule);
                r.mark = def.mark;
                for (slot, &m) in r.marks.iter_mut().zip(def.marks.iter()) {
                    *slot = m;
                }
            }
            let rhs_len = def.rhs.len() as i32;
            for (i, &el) in def.transl.iter().enumerate() {
                if el < 0 {
                    break;
                }
                if el >= rhs_len {
                    if el != TRANSLATE_NIL {
                        return Err(GrammarError::IncorrectSymbolNumber(def.lhs, el));
                    }
                    self.rules.get_mut(rule).trans_len += 1;
                } else if self.rules.get(rule).order[el as usize] >= 0 {
                    return Err(GrammarError::RepeatedSymbolNumber(def.lhs, el));
                } else {
                    let r = self.rules.get_mut(rule);
                    r.order[el as usize] = i as i32;
                    r.trans_len += 1;
                }
            }
        }

        let axiom = self.axiom.ok_or(GrammarError::NoRules)?;
        let start = start.expect("start symbol recorded with axiom");

        // Add `$S : error $eof` unless the start symbol already has an
        // error-leading alternative.
        let has_error_rule = self
            .symbs
            .get(start)
            .lhs_rules()
            .iter()
            .any(|&r| self.rules.get(r).rhs.first() == Some(&term_error));
        if !has_error_rule {
            let end_marker = self.end_marker.expect("end marker exists");
            let rule = self.new_rule(axiom, None, 0);
            self.rules.add_rhs_symbol(rule, term_error);
            self.rules.add_rhs_symbol(rule, end_marker);
        }

        analysis::check_grammar(self, strict)?;
        self.symbs.finish_adding_terminals();

        if log::log_enabled!(log::Level::Debug) {
            for rule in self.rules.iter() {
                if !self.symbs.repr(rule.lhs).starts_with('$') {
                    debug!("rule: {}", self.rule_text(rule.num));
                }
            }
        }
        Ok(())
    }

    /// `lhs : rhs...` for logs and diagnostics.
    pub(crate) fn rule_text(&self, rule: RuleId) -> String {
        let r = self.rules.get(rule);
        let rhs = r.rhs.iter().map(|&s| self.symbs.repr(s).as_str()).join(" ");
        format!("{} : {}", self.symbs.repr(r.lhs), rhs)
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for rule in self.rules.iter() {
            writeln!(f, "{}.", self.rule_text(rule.num))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ab_desc() -> DescGrammar {
        let mut d = DescGrammar::new();
        d.terminal("a", 97).terminal("b", 98);
        d.rule("S", &["a", "b"]);
        d
    }

    #[test]
    fn reads_a_small_grammar() {
        let mut g = Grammar::new();
        g.read_grammar(&mut ab_desc(), true).unwrap();
        assert!(!g.is_undefined());
        // user terminals + error + $eof
        assert_eq!(g.symbs.num_terminals(), 4);
        // S, $S
        assert_eq!(g.symbs.num_nonterminals(), 2);
        // $S : S $eof, S : a b, $S : error $eof
        assert_eq!(g.rules.len(), 3);
        let axiom = g.axiom.unwrap();
        assert_eq!(g.symbs.get(axiom).lhs_rules().len(), 2);
    }

    #[test]
    fn start_rule_gets_number_zero() {
        let mut g = Grammar::new();
        g.read_grammar(&mut ab_desc(), true).unwrap();
        let first = g.rules.get(crate::rules::RuleId(0));
        assert_eq!(first.lhs, g.axiom.unwrap());
        assert_eq!(first.trans_len, 1);
        assert_eq!(first.order[0], 0);
    }

    #[test]
    fn rejects_reserved_names() {
        let mut g = Grammar::new();
        let mut d = DescGrammar::new();
        d.terminal("error", 1);
        d.rule("S", &["error"]);
        assert_eq!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::FixedNameUsage(SmolStr::new("error")))
        );
        assert!(g.is_undefined());
    }

    #[test]
    fn rejects_bad_terminals() {
        let mut g = Grammar::new();
        let mut d = DescGrammar::new();
        d.terminal("a", -5);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::NegativeTermCode(_, -5))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1).terminal("a", 2);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::RepeatedTermDecl(_))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1).terminal("b", 1);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::RepeatedTermCode(_, 1))
        ));
    }

    #[test]
    fn rejects_terminal_lhs_and_empty_grammars() {
        let mut g = Grammar::new();
        let mut d = DescGrammar::new();
        d.terminal("a", 1);
        d.rule("a", &[]);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::TermInRuleLhs(_))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1);
        assert_eq!(g.read_grammar(&mut d, false), Err(GrammarError::NoRules));
    }

    #[test]
    fn rejects_bad_translations() {
        let mut g = Grammar::new();
        let mut d = DescGrammar::new();
        d.terminal("a", 1).terminal("b", 2);
        // two slots but no abstract node
        d.def(RuleDef {
            lhs: SmolStr::new("S"),
            rhs: vec![SmolStr::new("a"), SmolStr::new("b")],
            transl: vec![0, 1],
            ..RuleDef::default()
        });
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::IncorrectTranslation(_))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1);
        d.anode_rule("S", &["a"], "node", -1, &[0]);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::NegativeCost(_))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1);
        d.anode_rule("S", &["a"], "node", 0, &[4]);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::IncorrectSymbolNumber(_, 4))
        ));

        let mut d = DescGrammar::new();
        d.terminal("a", 1).terminal("b", 2);
        d.anode_rule("S", &["a", "b"], "node", 0, &[0, 0]);
        assert!(matches!(
            g.read_grammar(&mut d, false),
            Err(GrammarError::RepeatedSymbolNumber(_, 0))
        ));
    }

    #[test]
    fn nil_translation_slots_count() {
        let mut g = Grammar::new();
        let mut d = DescGrammar::new();
        d.terminal("a", 1);
        d.anode_rule("S", &["a"], "node", 0, &[0, TRANSLATE_NIL]);
        g.read_grammar(&mut d, true).unwrap();
        let s = g.symbs.find_by_repr("S").unwrap();
        let rule = g.symbs.get(s).lhs_rules()[0];
        assert_eq!(g.rules.get(rule).trans_len, 2);
    }
}
