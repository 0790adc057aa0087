//! Forest-level behavior: ambiguity reporting, alternative chains, shared
//! subtrees, cost-minimal selection, and the two-pass disposer.

use yaffle::{DescGrammar, Forest, Grammar, ParseRun, TreeNode, Utf8Tokens};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// S : a | a — the smallest ambiguous grammar.
fn doubled_desc() -> DescGrammar {
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32);
    d.anode_rule("S", &["a"], "one", 0, &[0]);
    d.anode_rule("S", &["a"], "two", 0, &[0]);
    d
}

fn parse(g: &Grammar, input: &str) -> (Forest, bool) {
    let mut run = ParseRun::new(g);
    let outcome = run.parse(&mut Utf8Tokens::new(input)).unwrap();
    (outcome.forest.expect("parse succeeds"), outcome.ambiguous)
}

fn anode_name(forest: &Forest, id: yaffle::NodeId) -> String {
    match forest.node(id) {
        TreeNode::Anode { name, .. } => name.to_string(),
        other => panic!("expected an abstract node, got {other:?}"),
    }
}

#[test]
fn ambiguity_is_flagged_even_for_one_parse() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut doubled_desc(), true).unwrap();
    let (forest, ambiguous) = parse(&g, "a");
    assert!(ambiguous);
    // one-parse mode: a single tree, no alt nodes
    assert!(!forest.is_ambiguous());
    assert_eq!(anode_name(&forest, forest.root), "one");
}

#[test]
fn all_parses_build_an_alt_chain() {
    init();
    let mut g = Grammar::new();
    g.set_one_parse(false);
    g.read_grammar(&mut doubled_desc(), true).unwrap();
    let (forest, ambiguous) = parse(&g, "a");
    assert!(ambiguous);
    assert!(forest.is_ambiguous());

    let alts = forest.alternatives(forest.root);
    assert_eq!(alts.len(), 2);
    let mut names: Vec<String> = alts.iter().map(|&a| anode_name(&forest, a)).collect();
    names.sort();
    assert_eq!(names, ["one", "two"]);
}

#[test]
fn ambiguous_nullable_split_parses() {
    init();
    // S : A A x.  A : a | .  "ax" can put the `a` in either slot.
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32).terminal("x", 'x' as i32);
    d.anode_rule("S", &["A", "A", "x"], "s", 0, &[0, 1]);
    d.pass_rule("A", &["a"], 0);
    d.rule("A", &[]);
    let mut g = Grammar::new();
    g.set_one_parse(false);
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse(&g, "ax");
    assert!(ambiguous);
    assert!(forest.is_ambiguous());
    // both splits survive: s('a' nil) and s(nil 'a')
    let rendered = forest.to_string();
    assert!(rendered.contains("alt{"), "got {rendered}");
}

#[test]
fn shared_terminals_are_disposed_once() {
    init();
    let mut g = Grammar::new();
    g.set_one_parse(false);
    g.read_grammar(&mut doubled_desc(), true).unwrap();
    let (forest, _) = parse(&g, "a");

    // Both alternatives reference the same shared terminal node.
    let mut calls = Vec::new();
    forest.dispose(|code, _mark, _attr| calls.push(code));
    assert_eq!(calls, vec!['a' as i32]);
}

#[test]
fn dispose_visits_every_kept_terminal() {
    init();
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32);
    d.anode_rule("S", &["S", "a"], "cat", 0, &[0, 1]);
    d.pass_rule("S", &["a"], 0);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let (forest, _) = parse(&g, "aaaaa");

    let mut count = 0;
    forest.dispose(|_code, _mark, _attr| count += 1);
    assert_eq!(count, 5);
}

#[test]
fn cost_flag_selects_the_cheap_parse() {
    init();
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32);
    d.anode_rule("S", &["a"], "dear", 5, &[0]);
    d.anode_rule("S", &["a"], "cheap", 1, &[0]);
    let mut g = Grammar::new();
    g.set_cost(true);
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse(&g, "a");
    assert!(ambiguous);
    assert!(!forest.is_ambiguous(), "only the minimal parse survives");
    assert_eq!(anode_name(&forest, forest.root), "cheap");
    match forest.node(forest.root) {
        TreeNode::Anode { cost, .. } => assert_eq!(*cost, 1),
        _ => unreachable!(),
    }
}

#[test]
fn cost_propagates_through_children() {
    init();
    // Inner ambiguity decides the outer winner: wrap(cheap) costs 3,
    // wrap(dear) costs 7, flat costs 4.
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32);
    d.anode_rule("S", &["I"], "wrap", 2, &[0]);
    d.anode_rule("S", &["a"], "flat", 4, &[0]);
    d.anode_rule("I", &["a"], "dear", 5, &[0]);
    d.anode_rule("I", &["a"], "cheap", 1, &[0]);
    let mut g = Grammar::new();
    g.set_cost(true);
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse(&g, "a");
    assert!(ambiguous);
    assert_eq!(anode_name(&forest, forest.root), "wrap");
    match forest.node(forest.root) {
        TreeNode::Anode { cost, .. } => assert_eq!(*cost, 3),
        _ => unreachable!(),
    }
    let inner = forest.children(forest.root).next().unwrap();
    assert_eq!(anode_name(&forest, inner), "cheap");
}

#[test]
fn terminal_attrs_carry_input_offsets() {
    init();
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32).terminal("b", 'b' as i32);
    d.anode_rule("S", &["a", "b"], "s", 0, &[0, 1]);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let (forest, _) = parse(&g, "ab");
    let attrs: Vec<usize> = forest
        .children(forest.root)
        .map(|c| match forest.node(c) {
            TreeNode::Term { attr, .. } => *attr,
            other => panic!("expected terminal, got {other:?}"),
        })
        .collect();
    assert_eq!(attrs, vec![0, 1]);
}
