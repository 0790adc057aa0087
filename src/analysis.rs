//! Grammar analysis: nullability, reachability, derivability, loop
//! detection, and FIRST/FOLLOW sets. Everything is computed by saturation
//! to a fixed point over the rules, then written back onto the symbols.

use crate::grammar::{Grammar, GrammarError};
use crate::symbols::SymbolKind;
use crate::termset::TermSet;

/// Flags `empty_p`, `access_p` and `derivation_p` for every symbol.
fn set_empty_access_derives(g: &mut Grammar) {
    let n = g.symbs.num_symbols();
    let mut empty = vec![false; n];
    let mut derives = vec![false; n];
    let mut access = vec![false; n];
    for s in g.symbs.symbols() {
        derives[s.id.index()] = s.is_terminal();
    }
    access[g.axiom.expect("axiom exists").index()] = true;

    let mut changed = true;
    while changed {
        changed = false;
        for nt in g.symbs.nonterminals().collect::<Vec<_>>() {
            for &rule in g.symbs.get(nt).lhs_rules() {
                let mut empty_p = true;
                let mut derivation_p = true;
                for &rhs_symb in &g.rules.get(rule).rhs {
                    if access[nt.index()] && !access[rhs_symb.index()] {
                        access[rhs_symb.index()] = true;
                        changed = true;
                    }
                    empty_p &= empty[rhs_symb.index()];
                    derivation_p &= derives[rhs_symb.index()];
                }
                if empty_p && !empty[nt.index()] {
                    empty[nt.index()] = true;
                    changed = true;
                }
                if derivation_p && !derives[nt.index()] {
                    derives[nt.index()] = true;
                    changed = true;
                }
            }
        }
    }

    for i in 0..n {
        let s = g.symbs.get_mut(crate::symbols::SymbolId(i as u32));
        s.empty_p = empty[i];
        s.derivation_p = derives[i];
        s.access_p = access[i];
    }
}

/// Flags `loop_p`: a nonterminal that can derive only itself. Seeded with
/// the minimal criterion (it appears in some rule whose other RHS symbols
/// are all nullable), then shrunk until stable.
fn set_loop_p(g: &mut Grammar) {
    let n = g.symbs.num_symbols();
    let mut loop_p = vec![false; n];

    for rule in g.rules.iter() {
        for (i, &symb) in rule.rhs.iter().enumerate() {
            if g.symbs.get(symb).is_terminal() {
                continue;
            }
            let rest_empty = rule
                .rhs
                .iter()
                .enumerate()
                .all(|(j, &other)| j == i || g.symbs.get(other).empty_p);
            if rest_empty {
                loop_p[symb.index()] = true;
            }
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for lhs in g.symbs.nonterminals().collect::<Vec<_>>() {
            if !loop_p[lhs.index()] {
                continue;
            }
            let mut still_loops = false;
            for &rule in g.symbs.get(lhs).lhs_rules() {
                let r = g.rules.get(rule);
                for (j, &symb) in r.rhs.iter().enumerate() {
                    if g.symbs.get(symb).is_terminal() || !loop_p[symb.index()] {
                        continue;
                    }
                    let rest_empty = r
                        .rhs
                        .iter()
                        .enumerate()
                        .all(|(k, &other)| k == j || g.symbs.get(other).empty_p);
                    if rest_empty {
                        still_loops = true;
                    }
                }
            }
            if !still_loops {
                loop_p[lhs.index()] = false;
                changed = true;
            }
        }
    }

    for nt in g.symbs.nonterminals().collect::<Vec<_>>() {
        if let SymbolKind::Nonterminal { loop_p: flag, .. } = &mut g.symbs.get_mut(nt).kind {
            *flag = loop_p[nt.index()];
        }
    }
}

/// OR `sets[src]` into `sets[dst]` within one slice; true if changed.
fn or_into(sets: &mut [TermSet], dst: usize, src: usize) -> bool {
    if dst == src {
        return false;
    }
    let (a, b) = if dst < src {
        let (left, right) = sets.split_at_mut(src);
        (&mut left[dst], &right[0])
    } else {
        let (left, right) = sets.split_at_mut(dst);
        (&mut right[0], &left[src])
    };
    a.or_with(b)
}

/// FIRST and FOLLOW for every nonterminal, standard CFG saturation with
/// FIRST propagating through nullable suffixes into FOLLOW. The finished
/// sets are interned in the grammar's terminal-set store.
fn create_first_follow_sets(g: &mut Grammar) {
    let num_terminals = g.symbs.num_terminals();
    let num_nonterms = g.symbs.num_nonterminals();
    let mut first: Vec<TermSet> = (0..num_nonterms).map(|_| TermSet::new(num_terminals)).collect();
    let mut follow: Vec<TermSet> = (0..num_nonterms).map(|_| TermSet::new(num_terminals)).collect();

    let nonterm_id = |g: &Grammar, s: crate::symbols::SymbolId| -> usize {
        match &g.symbs.get(s).kind {
            SymbolKind::Nonterminal { nonterm_id, .. } => *nonterm_id as usize,
            SymbolKind::Terminal { .. } => unreachable!(),
        }
    };

    let mut changed = true;
    while changed {
        changed = false;
        for lhs in g.symbs.nonterminals().collect::<Vec<_>>() {
            let ni = nonterm_id(g, lhs);
            for &rule in g.symbs.get(lhs).lhs_rules() {
                let rhs = g.rules.get(rule).rhs.clone();
                let mut first_continues = true;
                for (j, &rhs_symb) in rhs.iter().enumerate() {
                    let s = g.symbs.get(rhs_symb);
                    if s.is_terminal() {
                        if first_continues {
                            changed |= first[ni].set_bit(s.term_id());
                        }
                    } else {
                        let nj = nonterm_id(g, rhs_symb);
                        if first_continues {
                            changed |= or_into(&mut first, ni, nj);
                        }
                        // FIRST of the tail flows into this symbol's FOLLOW,
                        // through nullable successors.
                        let mut k = j + 1;
                        while k < rhs.len() {
                            let next = g.symbs.get(rhs[k]);
                            if next.is_terminal() {
                                changed |= follow[nj].set_bit(next.term_id());
                            } else {
                                let nk = nonterm_id(g, rhs[k]);
                                let (f, fo) = (&first[nk], &mut follow[nj]);
                                changed |= fo.or_with(f);
                            }
                            if !next.empty_p {
                                break;
                            }
                            k += 1;
                        }
                        if k == rhs.len() {
                            changed |= or_into(&mut follow, nj, ni);
                        }
                    }
                    if !g.symbs.get(rhs_symb).empty_p {
                        first_continues = false;
                    }
                }
            }
        }
    }

    for nt in g.symbs.nonterminals().collect::<Vec<_>>() {
        let ni = nonterm_id(g, nt);
        let (first_id, _) = g.term_sets.intern(&first[ni]);
        let (follow_id, _) = g.term_sets.intern(&follow[ni]);
        if let SymbolKind::Nonterminal { first, follow, .. } = &mut g.symbs.get_mut(nt).kind {
            *first = Some(first_id);
            *follow = Some(follow_id);
        }
    }
}

/// Run the whole analysis and validate the grammar. With `strict`, every
/// nonterminal must derive a terminal string and be reachable; otherwise
/// only the axiom's derivability is checked. Loops are always rejected.
pub(crate) fn check_grammar(g: &mut Grammar, strict: bool) -> Result<(), GrammarError> {
    set_empty_access_derives(g);
    set_loop_p(g);

    if strict {
        for nt in g.symbs.nonterminals().collect::<Vec<_>>() {
            let s = g.symbs.get(nt);
            if !s.derivation_p {
                return Err(GrammarError::NonTermDerivation(s.repr.clone()));
            }
            if !s.access_p {
                return Err(GrammarError::UnaccessibleNonTerm(s.repr.clone()));
            }
        }
    } else {
        let axiom = g.symbs.get(g.axiom.expect("axiom exists"));
        if !axiom.derivation_p {
            return Err(GrammarError::NonTermDerivation(axiom.repr.clone()));
        }
    }
    for nt in g.symbs.nonterminals().collect::<Vec<_>>() {
        let s = g.symbs.get(nt);
        if let SymbolKind::Nonterminal { loop_p: true, .. } = s.kind {
            return Err(GrammarError::LoopNonTerm(s.repr.clone()));
        }
    }

    create_first_follow_sets(g);
    Ok(())
}
