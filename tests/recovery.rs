//! Error recovery: minimal-cost resynchronization, the syntax-error
//! callback contract, and the no-recovery mode.

use std::cell::RefCell;
use std::rc::Rc;

use yaffle::{DescGrammar, Grammar, ParseRun, SyntaxErrorEvent, Utf8Tokens};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The expression grammar with a recovery production `T : error x`,
/// letting a botched term resynchronize on its trailing `x`.
fn expr_desc_with_recovery() -> DescGrammar {
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
    d.anode_rule("T", &["error", "x"], "fixup", 0, &[0, 1]);
    d
}

fn events_collector() -> (Rc<RefCell<Vec<SyntaxErrorEvent>>>, impl FnMut(&SyntaxErrorEvent)) {
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    (events, move |ev: &SyntaxErrorEvent| sink.borrow_mut().push(*ev))
}

#[test]
fn minimal_cost_recovery_resumes_after_one_token() {
    init();
    let mut g = Grammar::new();
    g.set_recovery_match(2);
    g.read_grammar(&mut expr_desc_with_recovery(), true).unwrap();

    let (events, cb) = events_collector();
    let mut run = ParseRun::new(&g);
    run.on_syntax_error(cb);
    let outcome = run.parse(&mut Utf8Tokens::new("x+*x")).unwrap();

    assert!(outcome.forest.is_some(), "recovery lets the parse finish");
    let events = events.borrow();
    assert_eq!(events.len(), 1, "syntax_error fires exactly once");
    let ev = events[0];
    // the error is detected at `*` (token 2), exactly `*` is ignored, and
    // parsing resumes at the following `x` (token 3)
    assert_eq!(ev.err_tok, 2);
    assert_eq!(ev.err_attr, 2);
    assert_eq!(ev.ignored, Some((2, 2)));
    assert_eq!(ev.recovered, Some((3, 3)));
}

#[test]
fn recovered_tree_holds_an_error_node() {
    init();
    let mut g = Grammar::new();
    g.set_recovery_match(2);
    g.read_grammar(&mut expr_desc_with_recovery(), true).unwrap();

    let mut run = ParseRun::new(&g);
    run.on_syntax_error(|_| {});
    let outcome = run.parse(&mut Utf8Tokens::new("x+*x")).unwrap();
    let forest = outcome.forest.unwrap();
    assert_eq!(forest.to_string(), "plus('x' fixup(error 'x'))");
}

#[test]
fn clean_input_never_reports_errors() {
    init();
    let mut g = Grammar::new();
    g.read_grammar(&mut expr_desc_with_recovery(), true).unwrap();

    let (events, cb) = events_collector();
    let mut run = ParseRun::new(&g);
    run.on_syntax_error(cb);
    let outcome = run.parse(&mut Utf8Tokens::new("x+x*x")).unwrap();
    assert!(outcome.forest.is_some());
    assert!(events.borrow().is_empty());
}

#[test]
fn disabled_recovery_reports_once_and_stops() {
    init();
    let mut g = Grammar::new();
    g.set_error_recovery(false);
    g.read_grammar(&mut expr_desc_with_recovery(), true).unwrap();

    let (events, cb) = events_collector();
    let mut run = ParseRun::new(&g);
    run.on_syntax_error(cb);
    let outcome = run.parse(&mut Utf8Tokens::new("x+*x")).unwrap();

    assert!(outcome.forest.is_none(), "no tree without recovery");
    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].err_tok, 2);
    assert_eq!(events[0].ignored, None);
    assert_eq!(events[0].recovered, None);
}

#[test]
fn whole_input_recovery_through_the_injected_rule() {
    init();
    // No user recovery production at all: the injected `$S : error $eof`
    // still turns hopeless input into an accepted (empty) parse.
    let mut d = DescGrammar::new();
    d.terminal("a", 'a' as i32).terminal("b", 'b' as i32);
    d.anode_rule("S", &["a", "b"], "s", 0, &[0, 1]);
    let mut g = Grammar::new();
    g.read_grammar(&mut d, true).unwrap();

    let (events, cb) = events_collector();
    let mut run = ParseRun::new(&g);
    run.on_syntax_error(cb);
    let outcome = run.parse(&mut Utf8Tokens::new("bb")).unwrap();
    assert!(outcome.forest.is_some());
    assert_eq!(events.borrow().len(), 1);
}

#[test]
fn more_required_matches_never_shrink_the_ignored_span() {
    init();
    let mut spans = Vec::new();
    for matches in 1..=4 {
        let mut g = Grammar::new();
        g.set_recovery_match(matches);
        g.read_grammar(&mut expr_desc_with_recovery(), true).unwrap();

        let (events, cb) = events_collector();
        let mut run = ParseRun::new(&g);
        run.on_syntax_error(cb);
        let outcome = run.parse(&mut Utf8Tokens::new("x+*x+x")).unwrap();
        assert!(outcome.forest.is_some(), "matches={matches}");
        let events = events.borrow();
        assert_eq!(events.len(), 1, "matches={matches}");
        let ev = events[0];
        let (start, _) = ev.ignored.unwrap();
        let (stop, _) = ev.recovered.unwrap();
        spans.push(stop - start);
    }
    for pair in spans.windows(2) {
        assert!(pair[0] <= pair[1], "ignored spans {spans:?} must not shrink");
    }
}
