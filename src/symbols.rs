//! The symbol table: interned terminals and nonterminals.
//!
//! Terminals carry a caller-chosen integer code (for character-level
//! grammars these are typically codepoints) plus a dense `term_id` used to
//! index terminal bitsets. Nonterminals carry their rules and the analysis
//! results (FIRST/FOLLOW, loop flag). Lookup happens by repr while reading
//! a grammar and by code on every input token, so both maps are kept; once
//! terminal declarations are closed, a dense code→symbol vector replaces
//! the code map when the code range is compact.

use fnv::FnvHashMap;
use smol_str::SmolStr;

use crate::rules::RuleId;
use crate::termset::TermSetId;

/// Codes spanning more than this never get a dense translation vector;
/// lookups fall back to the hash map.
pub(crate) const MAX_CODE_TRANS_VECT_SIZE: i64 = 200_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub(crate) u32);

impl SymbolId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
pub enum SymbolKind {
    Terminal {
        /// Caller-chosen code; unique. Negative codes are reserved
        /// (`$eof` is -1, `error` is -2).
        code: i32,
        /// Dense 0..num_terminals id, used as the bit index in terminal sets.
        term_id: u32,
    },
    Nonterminal {
        /// Every rule with this symbol as LHS, in declaration order.
        rules: Vec<RuleId>,
        nonterm_id: u32,
        /// True if the nonterminal can derive only itself.
        loop_p: bool,
        first: Option<TermSetId>,
        follow: Option<TermSetId>,
    },
}

#[derive(Debug)]
pub struct Symbol {
    pub id: SymbolId,
    pub repr: SmolStr,
    pub kind: SymbolKind,
    /// Reachable from the axiom.
    pub access_p: bool,
    /// Derives at least one terminal string.
    pub derivation_p: bool,
    /// Can derive the empty string (always false for terminals).
    pub empty_p: bool,
}

impl Symbol {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, SymbolKind::Terminal { .. })
    }

    pub fn term_id(&self) -> u32 {
        match self.kind {
            SymbolKind::Terminal { term_id, .. } => term_id,
            SymbolKind::Nonterminal { .. } => panic!("term_id of nonterminal {}", self.repr),
        }
    }

    pub fn code(&self) -> i32 {
        match self.kind {
            SymbolKind::Terminal { code, .. } => code,
            SymbolKind::Nonterminal { .. } => panic!("code of nonterminal {}", self.repr),
        }
    }

    pub fn lhs_rules(&self) -> &[RuleId] {
        match &self.kind {
            SymbolKind::Nonterminal { rules, .. } => rules,
            SymbolKind::Terminal { .. } => &[],
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    terminals: Vec<SymbolId>,
    nonterminals: Vec<SymbolId>,
    by_repr: FnvHashMap<SmolStr, SymbolId>,
    by_code: FnvHashMap<i32, SymbolId>,
    /// Dense code→symbol translation, built by `finish_adding_terminals`
    /// when the code range is below `MAX_CODE_TRANS_VECT_SIZE`.
    code_vect: Option<CodeVect>,
}

#[derive(Debug)]
struct CodeVect {
    start: i32,
    table: Vec<Option<SymbolId>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_repr(&self, repr: &str) -> Option<SymbolId> {
        self.by_repr.get(repr).copied()
    }

    pub fn find_by_code(&self, code: i32) -> Option<SymbolId> {
        if let Some(v) = &self.code_vect {
            let i = code as i64 - v.start as i64;
            if i < 0 || i >= v.table.len() as i64 {
                return None;
            }
            return v.table[i as usize];
        }
        self.by_code.get(&code).copied()
    }

    /// Add a terminal. The caller has already rejected duplicate reprs,
    /// duplicate codes, and negative user codes.
    pub fn add_terminal(&mut self, name: &str, code: i32) -> SymbolId {
        debug_assert!(self.find_by_repr(name).is_none());
        debug_assert!(self.find_by_code(code).is_none());
        let id = SymbolId(self.symbols.len() as u32);
        let term_id = self.terminals.len() as u32;
        let repr = SmolStr::new(name);
        self.symbols.push(Symbol {
            id,
            repr: repr.clone(),
            kind: SymbolKind::Terminal { code, term_id },
            access_p: false,
            derivation_p: true,
            empty_p: false,
        });
        self.terminals.push(id);
        self.by_repr.insert(repr, id);
        self.by_code.insert(code, id);
        id
    }

    pub fn add_nonterm(&mut self, name: &str) -> SymbolId {
        debug_assert!(self.find_by_repr(name).is_none());
        let id = SymbolId(self.symbols.len() as u32);
        let nonterm_id = self.nonterminals.len() as u32;
        let repr = SmolStr::new(name);
        self.symbols.push(Symbol {
            id,
            repr: repr.clone(),
            kind: SymbolKind::Nonterminal {
                rules: Vec::new(),
                nonterm_id,
                loop_p: false,
                first: None,
                follow: None,
            },
            access_p: false,
            derivation_p: false,
            empty_p: false,
        });
        self.nonterminals.push(id);
        self.by_repr.insert(repr, id);
        id
    }

    /// Close terminal declarations. When the code range is compact the
    /// dense translation vector takes over code lookups.
    pub fn finish_adding_terminals(&mut self) {
        let mut min_code = i32::MAX;
        let mut max_code = i32::MIN;
        for &t in &self.terminals {
            let code = self.symbols[t.index()].code();
            min_code = min_code.min(code);
            max_code = max_code.max(code);
        }
        debug_assert!(!self.terminals.is_empty());
        if max_code as i64 - min_code as i64 >= MAX_CODE_TRANS_VECT_SIZE {
            return;
        }
        let len = (max_code as i64 - min_code as i64 + 1) as usize;
        let mut table = vec![None; len];
        for &t in &self.terminals {
            let code = self.symbols[t.index()].code();
            table[(code - min_code) as usize] = Some(t);
        }
        self.code_vect = Some(CodeVect { start: min_code, table });
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn repr(&self, id: SymbolId) -> &SmolStr {
        &self.symbols[id.index()].repr
    }

    pub fn num_terminals(&self) -> usize {
        self.terminals.len()
    }

    pub fn num_nonterminals(&self) -> usize {
        self.nonterminals.len()
    }

    pub fn num_symbols(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn terminals(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.terminals.iter().copied()
    }

    pub fn nonterminals(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.nonterminals.iter().copied()
    }
}
