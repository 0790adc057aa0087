//! End-to-end parses over the public API: the expression grammar, nullable
//! rules, nesting, lookahead levels, and long inputs that exercise the
//! goto cache and set-core reuse.

use yaffle::{DescGrammar, Forest, Grammar, ParseRun, TreeNode, Utf8Tokens};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// E : E + T | T.  T : T * F | F.  F : ( E ) | x.
/// Abstract nodes on the operator rules, pass-through everywhere else.
fn expr_desc() -> DescGrammar {
    let mut d = DescGrammar::new();
    for ch in "x+*()".chars() {
        d.terminal(&ch.to_string(), ch as i32);
    }
    d.anode_rule("E", &["E", "+", "T"], "plus", 0, &[0, 2]);
    d.pass_rule("E", &["T"], 0);
    d.anode_rule("T", &["T", "*", "F"], "times", 0, &[0, 2]);
    d.pass_rule("T", &["F"], 0);
    d.pass_rule("F", &["(", "E", ")"], 1);
    d.pass_rule("F", &["x"], 0);
    d
}

fn parse_to_forest(g: &Grammar, input: &str) -> (Option<Forest>, bool) {
    let mut run = ParseRun::new(g);
    let outcome = run.parse(&mut Utf8Tokens::new(input)).unwrap();
    (outcome.forest, outcome.ambiguous)
}

/// Terminal leaves of the chosen parse, left to right.
fn leaves(forest: &Forest) -> Vec<char> {
    fn walk(forest: &Forest, id: yaffle::NodeId, out: &mut Vec<char>) {
        match forest.node(id) {
            TreeNode::Nil | TreeNode::Error => {}
            TreeNode::Term { code, .. } => out.push(char::from_u32(*code as u32).unwrap()),
            TreeNode::Anode { .. } => {
                for child in forest.children(id) {
                    walk(forest, child, out);
                }
            }
            TreeNode::Alt { .. } => walk(forest, forest.alternatives(id)[0], out),
        }
    }
    let mut out = Vec::new();
    walk(forest, forest.root, &mut out);
    out
}

#[test]
fn precedence_shapes_the_tree() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut expr_desc(), true).unwrap();
    let (forest, ambiguous) = parse_to_forest(&g, "x+x*x");
    assert!(!ambiguous);
    // left-associative + over *: times nests under plus
    assert_eq!(forest.unwrap().to_string(), "plus('x' times('x' 'x'))");
}

#[test]
fn parenthesized_input_round_trips() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut expr_desc(), true).unwrap();
    let (forest, ambiguous) = parse_to_forest(&g, "(x+x)*(x*x)");
    assert!(!ambiguous);
    // dropped translations aside, leaves come back in input order
    assert_eq!(leaves(&forest.unwrap()), vec!['x', 'x', 'x', 'x']);
}

#[test]
fn rejects_unknown_token_codes() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut expr_desc(), true).unwrap();
    let mut run = ParseRun::new(&g);
    let err = run.parse(&mut Utf8Tokens::new("x+q")).unwrap_err();
    assert_eq!(err, yaffle::ParseError::InvalidTokenCode { offset: 2, code: 'q' as i32 });
}

#[test]
fn undefined_grammar_is_refused() {
    init();
    let g = Grammar::new();
    let mut run = ParseRun::new(&g);
    assert_eq!(
        run.parse(&mut Utf8Tokens::new("x")).unwrap_err(),
        yaffle::ParseError::UndefinedOrBadGrammar
    );
}

#[test]
fn nullable_symbol_becomes_nil_child() {
    init();
    // S : A B.  A : .  B : b.
    let mut d = DescGrammar::new();
    d.terminal("b", 'b' as i32);
    d.anode_rule("S", &["A", "B"], "s", 0, &[0, 1]);
    d.rule("A", &[]);
    d.pass_rule("B", &["b"], 0);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse_to_forest(&g, "b");
    assert!(!ambiguous);
    assert_eq!(forest.unwrap().to_string(), "s(nil 'b')");
}

#[test]
fn nested_nullable_parentheses() {
    init();
    // S : ( S ) | .
    let mut d = DescGrammar::new();
    d.terminal("(", '(' as i32).terminal(")", ')' as i32);
    d.anode_rule("S", &["(", "S", ")"], "wrap", 0, &[1]);
    d.rule("S", &[]);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse_to_forest(&g, "((()))");
    assert!(!ambiguous);
    assert_eq!(forest.unwrap().to_string(), "wrap(wrap(wrap(nil)))");
}

#[test]
fn empty_input_on_a_nullable_grammar() {
    init();
    let mut d = DescGrammar::new();
    d.terminal("(", '(' as i32).terminal(")", ')' as i32);
    d.anode_rule("S", &["(", "S", ")"], "wrap", 0, &[1]);
    d.rule("S", &[]);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let (forest, ambiguous) = parse_to_forest(&g, "");
    assert!(!ambiguous);
    assert_eq!(forest.unwrap().to_string(), "nil");
}

#[test]
fn lookahead_levels_agree() {
    init();
    for level in 0..=2 {
        let mut g = Grammar::new();
        g.set_lookahead_level(level);
        g.read_grammar(&mut expr_desc(), true).unwrap();
        let (forest, ambiguous) = parse_to_forest(&g, "x*(x+x)*x");
        assert!(!ambiguous, "level {level}");
        assert_eq!(
            forest.unwrap().to_string(),
            "times(times('x' plus('x' 'x')) 'x')",
            "level {level}"
        );
    }
}

#[test]
fn long_repetitive_input_reuses_sets() {
    init();
    // S : S P | P.  P : ( a ).  The set built inside each group recurs,
    // which is what the goto cache and core interning feed on.
    let mut d = DescGrammar::new();
    d.terminal("(", '(' as i32).terminal(")", ')' as i32).terminal("a", 'a' as i32);
    d.anode_rule("S", &["S", "P"], "seq", 0, &[0, 1]);
    d.pass_rule("S", &["P"], 0);
    d.anode_rule("P", &["(", "a", ")"], "p", 0, &[1]);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();

    let input = "(a)".repeat(120);
    let (forest, ambiguous) = parse_to_forest(&g, &input);
    assert!(!ambiguous);
    let forest = forest.unwrap();
    assert_eq!(leaves(&forest), vec!['a'; 120]);
}

#[test]
fn left_recursive_accumulation_round_trips() {
    init();
    // S : S a | a, keeping every terminal in the translation.
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32);
    d.anode_rule("S", &["S", "a"], "cat", 0, &[0, 1]);
    d.pass_rule("S", &["a"], 0);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();
    let n = 60;
    let (forest, ambiguous) = parse_to_forest(&g, &"a".repeat(n));
    assert!(!ambiguous);
    assert_eq!(leaves(&forest.unwrap()), vec!['a'; n]);
}

#[test]
fn grammar_is_shareable_across_threads() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut expr_desc(), true).unwrap();
    let g = &g;
    std::thread::scope(|scope| {
        for input in ["x+x", "x*x+x", "(x)", "x+x*(x+x)"] {
            scope.spawn(move || {
                let mut run = ParseRun::new(g);
                let outcome = run.parse(&mut Utf8Tokens::new(input)).unwrap();
                assert!(outcome.forest.is_some(), "input {input}");
                assert!(!outcome.ambiguous);
            });
        }
    });
}
