//! General context-free parsing built on Earley's algorithm.
//!
//! Any CFG works: rules may be recursive, nullable, ambiguous, even
//! left- and right-recursive at once. The recognizer keeps state sets
//! small with static or dynamic lookahead and keeps memory bounded on
//! long inputs by interning state-set cores, matched-length vectors and
//! their combinations. Syntax errors go through minimal-cost recovery
//! (fewest ignored tokens wins) instead of killing the parse, and the
//! result comes back as a single tree or, for ambiguous grammars, a
//! compact DAG of alternatives with optional cost-minimal selection.
//!
//! A parse takes three ingredients:
//!
//! 1. a [`Grammar`], read once from a [`GrammarSource`] (usually a
//!    [`DescGrammar`] a front-end filled in),
//! 2. a [`ParseRun`] borrowing the grammar — one per parse, and the
//!    grammar may be shared by runs on different threads,
//! 3. a [`TokenSource`] yielding coded tokens ([`Utf8Tokens`] for
//!    character-level grammars).
//!
//! ```
//! use yaffle::{DescGrammar, Grammar, ParseRun, Utf8Tokens};
//!
//! let mut desc = DescGrammar::new();
//! desc.terminal("a", 'a' as i32).terminal("b", 'b' as i32);
//! desc.anode_rule("S", &["a", "b"], "pair", 0, &[0, 1]);
//!
//! let mut grammar = Grammar::new();
//! grammar.read_grammar(&mut desc, true).unwrap();
//!
//! let mut run = ParseRun::new(&grammar);
//! let outcome = run.parse(&mut Utf8Tokens::new("ab")).unwrap();
//! let forest = outcome.forest.unwrap();
//! assert_eq!(forest.to_string(), "pair('a' 'b')");
//! ```
//!
//! The surface grammar-description syntax, tokenizers beyond UTF-8, and
//! any CLI around this all live elsewhere; this crate is the engine.

mod analysis;
mod coreindex;
mod dotted;
mod engine;
mod forest;
mod grammar;
mod recovery;
mod rules;
mod sets;
mod symbols;
mod termset;

pub use engine::{
    ParseError, ParseOutcome, ParseRun, SyntaxErrorEvent, Token, TokenSource, Utf8Tokens,
};
pub use forest::{Forest, NodeId, TreeNode};
pub use grammar::{DescGrammar, Grammar, GrammarError, GrammarSource, RuleDef, TerminalDef};
pub use rules::TRANSLATE_NIL;
