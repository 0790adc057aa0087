//! Parse forest: reconstruction, cost pruning, and disposal.
//!
//! After a successful recognition the builder back-traces the state sets
//! right-to-left across each rule, turning completions into abstract
//! nodes, terminals into leaves, and multiple derivations of one span into
//! alt-node chains. When all parses are requested, abstract nodes are
//! memoized by (rule, origin, set) so shared subresults appear once and
//! the result is a DAG. With the cost flag, a post-pass keeps only the
//! cost-minimal alternative(s).
//!
//! The forest is an id-addressed node pool owned by the caller; it
//! outlives the parse run and the grammar.

use std::fmt;

use fnv::FnvHashMap;
use itertools::Itertools;
use log::debug;
use smol_str::SmolStr;

use crate::engine::ParseState;
use crate::rules::RuleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeNode {
    /// Translation of an empty or dropped production.
    Nil,
    /// Translation of the `error` terminal covering an ignored span.
    Error,
    Term {
        code: i32,
        mark: char,
        attr: usize,
    },
    Anode {
        name: SmolStr,
        mark: char,
        /// With the cost flag: node cost plus the cost of all children;
        /// otherwise the node's own cost.
        cost: i32,
        children: Vec<Option<NodeId>>,
    },
    /// One alternative of an ambiguous span; `next` links the rest.
    Alt {
        node: NodeId,
        next: Option<NodeId>,
    },
}

/// The parse result: a DAG of [`TreeNode`]s in one pool.
#[derive(Debug)]
pub struct Forest {
    nodes: Vec<TreeNode>,
    pub root: NodeId,
}

impl Forest {
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Children of an abstract node (nil-filled slots included), empty for
    /// other node kinds.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let slots: &[Option<NodeId>] = match &self.nodes[id.index()] {
            TreeNode::Anode { children, .. } => children,
            _ => &[],
        };
        slots.iter().flatten().copied()
    }

    /// The alternatives rooted at `id`: the alt chain unfolded, or the
    /// node itself when the span is unambiguous.
    pub fn alternatives(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut curr = id;
        loop {
            match &self.nodes[curr.index()] {
                TreeNode::Alt { node, next } => {
                    out.push(*node);
                    match next {
                        Some(n) => curr = *n,
                        None => break,
                    }
                }
                _ => {
                    out.push(curr);
                    break;
                }
            }
        }
        out
    }

    /// True iff some span has more than one surviving alternative.
    pub fn is_ambiguous(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n, TreeNode::Alt { next: Some(_), .. }))
    }

    /// Two-pass disposal: first reduce the DAG to a tree by clearing
    /// duplicate child edges and compacting children arrays, then sweep
    /// the tree invoking `termcb` exactly once per surviving terminal
    /// node with (code, mark, attr).
    pub fn dispose<F: FnMut(i32, char, usize)>(mut self, mut termcb: F) {
        let root = self.root;
        let mut visited = vec![false; self.nodes.len()];
        reduce_node(&mut self.nodes, &mut visited, root);
        let mut swept = vec![false; self.nodes.len()];
        sweep_node(&self.nodes, &mut swept, &mut termcb, root);
    }

    fn render(&self, id: NodeId) -> String {
        match &self.nodes[id.index()] {
            TreeNode::Nil => "nil".to_string(),
            TreeNode::Error => "error".to_string(),
            TreeNode::Term { code, .. } => match char::from_u32(*code as u32) {
                Some(ch) if !ch.is_control() => format!("'{ch}'"),
                _ => format!("#{code}"),
            },
            TreeNode::Anode { name, children, .. } => {
                let inner = children
                    .iter()
                    .map(|child| match child {
                        Some(c) => self.render(*c),
                        None => "?".to_string(),
                    })
                    .join(" ");
                format!("{name}({inner})")
            }
            TreeNode::Alt { .. } => {
                let alts = self.alternatives(id).iter().map(|&a| self.render(a)).join(" | ");
                format!("alt{{{alts}}}")
            }
        }
    }
}

impl fmt::Display for Forest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(self.root))
    }
}

fn reduce_node(nodes: &mut [TreeNode], visited: &mut [bool], id: NodeId) {
    visited[id.index()] = true;
    match nodes[id.index()].clone() {
        TreeNode::Nil | TreeNode::Error | TreeNode::Term { .. } => {}
        TreeNode::Anode { children, .. } => {
            let mut kept = children;
            for slot in kept.iter_mut() {
                if let Some(c) = *slot {
                    if visited[c.index()] {
                        *slot = None;
                    } else {
                        reduce_node(nodes, visited, c);
                    }
                }
            }
            // compact out the cleared edges
            kept.retain(|slot| slot.is_some());
            if let TreeNode::Anode { children, .. } = &mut nodes[id.index()] {
                *children = kept;
            }
        }
        TreeNode::Alt { node, mut next } => {
            if !visited[node.index()] {
                reduce_node(nodes, visited, node);
            }
            // collapse chains of already-visited alt cells
            while let Some(n) = next {
                if visited[n.index()] {
                    next = match &nodes[n.index()] {
                        TreeNode::Alt { next, .. } => *next,
                        _ => unreachable!("alt chain holds alt nodes"),
                    };
                } else {
                    break;
                }
            }
            if let TreeNode::Alt { next: slot, .. } = &mut nodes[id.index()] {
                *slot = next;
            }
            if let Some(n) = next {
                reduce_node(nodes, visited, n);
            }
        }
    }
}

fn sweep_node<F: FnMut(i32, char, usize)>(
    nodes: &[TreeNode],
    swept: &mut [bool],
    termcb: &mut F,
    id: NodeId,
) {
    if swept[id.index()] {
        return;
    }
    swept[id.index()] = true;
    match &nodes[id.index()] {
        TreeNode::Nil | TreeNode::Error => {}
        TreeNode::Term { code, mark, attr } => termcb(*code, *mark, *attr),
        TreeNode::Anode { children, .. } => {
            for child in children.iter().flatten() {
                sweep_node(nodes, swept, termcb, *child);
            }
        }
        TreeNode::Alt { node, next } => {
            sweep_node(nodes, swept, termcb, *node);
            if let Some(n) = next {
                sweep_node(nodes, swept, termcb, *n);
            }
        }
    }
}

/// One step of the right-to-left back-traversal: a rule, the dot walking
/// from the end to 0, the origin and current set indexes, and where the
/// rule's translation goes.
#[derive(Debug, Clone)]
struct BuildState {
    rule: RuleId,
    dot: i32,
    from_i: usize,
    set_k: usize,
    parent_anode: NodeId,
    parent_disp: i32,
    anode: Option<NodeId>,
}

fn new_node(nodes: &mut Vec<TreeNode>, node: TreeNode) -> NodeId {
    let id = NodeId(nodes.len() as u32);
    nodes.push(node);
    id
}

fn slot_mut<'a>(nodes: &'a mut [TreeNode], place: (NodeId, i32)) -> &'a mut Option<NodeId> {
    match &mut nodes[place.0.index()] {
        TreeNode::Anode { children, .. } => &mut children[place.1 as usize],
        _ => unreachable!("translations are only placed into abstract nodes"),
    }
}

/// Put `node` into the child slot `place`. An occupied slot grows an alt
/// chain; the first occupant is wrapped into an alt cell of its own so the
/// chain is uniform.
fn place_translation(nodes: &mut Vec<TreeNode>, place: (NodeId, i32), node: NodeId) {
    let existing = *slot_mut(nodes, place);
    match existing {
        None => {
            *slot_mut(nodes, place) = Some(node);
        }
        Some(prev) => {
            let alt = if matches!(nodes[prev.index()], TreeNode::Alt { .. }) {
                new_node(nodes, TreeNode::Alt { node, next: Some(prev) })
            } else {
                let first = new_node(nodes, TreeNode::Alt { node: prev, next: None });
                new_node(nodes, TreeNode::Alt { node, next: Some(first) })
            };
            *slot_mut(nodes, place) = Some(alt);
        }
    }
}

/// Clone an abstract node for a parse that diverges at `disp`, clearing
/// that slot, and place the copy as an alternative.
fn copy_anode(
    nodes: &mut Vec<TreeNode>,
    place: (NodeId, i32),
    anode: NodeId,
    disp: i32,
) -> NodeId {
    let mut copy = nodes[anode.index()].clone();
    match &mut copy {
        TreeNode::Anode { children, .. } => children[disp as usize] = None,
        _ => unreachable!("copy_anode clones abstract nodes"),
    }
    let id = new_node(nodes, copy);
    place_translation(nodes, place, id);
    id
}

/// Reconstruct the parse forest from the state sets. Returns `None` when
/// the final state set does not hold the finished axiom rule (possible
/// only with error recovery off). Sets `ambiguous` when a span has more
/// than one derivation, even when only one parse is built.
pub(crate) fn build_parse_tree(ps: &ParseState, ambiguous: &mut bool) -> Option<Forest> {
    let g = ps.g;
    let axiom = g.axiom.expect("grammar is defined");

    let final_set = ps.state_sets[ps.set_k];
    let final_core = ps.pool.set(final_set).core;
    let accepted = match ps.pool.core(final_core).dotted_rules.first() {
        None => false,
        Some(&dr_id) => {
            let dr = ps.dotted.get(dr_id);
            let rule = g.rules.get(dr.rule);
            ps.pool.lengths(ps.pool.set(final_set).lengths)[0] as usize == ps.set_k
                && rule.lhs == axiom
                && dr.dot == rule.rhs_len()
        }
    };
    if !accepted {
        // Only reachable with error recovery off, since the injected
        // `$S : error $eof` rule otherwise always completes.
        debug_assert!(!g.error_recovery_p);
        return None;
    }

    // Building with costs needs every parse to choose the minimum from.
    let one_parse_p = g.one_parse_p && !g.cost_p;

    let root_dr = ps.pool.core(final_core).dotted_rules[0];
    let (root_rule, root_dot) = {
        let dr = ps.dotted.get(root_dr);
        (dr.rule, dr.dot)
    };

    debug!("building parse tree");

    let mut nodes: Vec<TreeNode> = Vec::new();
    // Slot 0 holds the final result so every translation has a place.
    let root_holder = new_node(
        &mut nodes,
        TreeNode::Anode { name: SmolStr::default(), mark: '\0', cost: 0, children: vec![None] },
    );
    let empty_node = new_node(&mut nodes, TreeNode::Nil);
    let error_node = new_node(&mut nodes, TreeNode::Error);

    // Terminal nodes are shared per input position when building all
    // parses; abstract nodes are memoized by (rule, origin, current set).
    let mut term_node_array: Vec<Option<NodeId>> =
        if one_parse_p { Vec::new() } else { vec![None; ps.input.len()] };
    let mut anode_memo: FnvHashMap<(RuleId, usize, usize), NodeId> = FnvHashMap::default();

    let mut states: Vec<BuildState> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut orig_states: Vec<usize> = Vec::new();

    states.push(BuildState {
        rule: root_rule,
        dot: root_dot as i32,
        from_i: 0,
        set_k: ps.set_k,
        parent_anode: root_holder,
        parent_disp: 0,
        anode: None,
    });
    stack.push(0);

    while let Some(&cur) = stack.last() {
        states[cur].dot -= 1;
        let pos = states[cur].dot;
        let rule = states[cur].rule;
        let parent_anode = states[cur].parent_anode;
        let parent_disp = states[cur].parent_disp;
        let anode = states[cur].anode;
        let from_i = states[cur].from_i;
        let mut set_k = states[cur].set_k;

        if pos < 0 {
            // The whole RHS is processed: pop and finalize placements.
            stack.pop();
            if g.rules.get(rule).trans_len == 0 && anode.is_none() {
                // The rule produces nothing, but its slot needs a value.
                place_translation(&mut nodes, (parent_anode, parent_disp), empty_node);
            } else if let Some(an) = anode {
                // Unfilled slots become nil children. They could not be
                // filled eagerly: an empty slot doubles as the "no
                // translation yet" marker while alternatives are placed.
                if let TreeNode::Anode { children, .. } = &mut nodes[an.index()] {
                    for slot in children.iter_mut() {
                        if slot.is_none() {
                            *slot = Some(empty_node);
                        }
                    }
                }
            }
            continue;
        }

        let pos = pos as usize;
        let disp = g.rules.get(rule).order[pos];
        let symb = g.rules.get(rule).rhs[pos];

        if g.symbs.get(symb).is_terminal() {
            // Terminal before the dot. Recovery can leave more state sets
            // than input tokens, so position lookups are guarded.
            set_k -= 1;
            if disp >= 0 {
                let shared = if !one_parse_p { term_node_array.get(set_k).copied().flatten() } else { None };
                let node = if Some(symb) == g.term_error {
                    error_node
                } else if let Some(shared) = shared {
                    shared
                } else {
                    let term = new_node(
                        &mut nodes,
                        TreeNode::Term {
                            code: g.symbs.get(symb).code(),
                            mark: g.rules.get(rule).marks[pos],
                            attr: ps.input.get(set_k).map_or(0, |t| t.attr),
                        },
                    );
                    if !one_parse_p && set_k < term_node_array.len() {
                        term_node_array[set_k] = Some(term);
                    }
                    term
                };
                let place = match anode {
                    Some(an) => (an, disp),
                    None => (parent_anode, parent_disp),
                };
                place_translation(&mut nodes, place, node);
            }
            if pos != 0 {
                states[cur].set_k = set_k;
            }
            continue;
        }

        // Nonterminal before the dot: enumerate its completions ending at
        // set_k whose origin is confirmed by the predictions at that
        // origin.
        let set = ps.state_sets[set_k];
        let set_core = ps.pool.set(set).core;
        let entry = ps.index.find(set_core, symb).expect("completed nonterminal is indexed");
        let completions = ps.index.completions(entry).to_vec();
        debug_assert!(!completions.is_empty());

        let mut n_candidates = 0;
        let orig_state = cur;
        if !one_parse_p {
            orig_states.clear();
        }

        for dr_idx in completions {
            let dr_id = ps.pool.core(set_core).dotted_rules[dr_idx as usize];
            let dr_from_i = set_k - ps.pool.matched_length(set, dr_idx as usize) as usize;

            // Confirm this completion continues the outer rule: the origin
            // set must predict (rule, pos) with our own origin.
            let check_set = ps.state_sets[dr_from_i];
            let check_core = ps.pool.set(check_set).core;
            let check_entry =
                ps.index.find(check_core, symb).expect("origin set predicts the nonterminal");
            let mut found = false;
            for &check_idx in ps.index.predictions(check_entry) {
                let check_dr_id = ps.pool.core(check_core).dotted_rules[check_idx as usize];
                let check_dr = ps.dotted.get(check_dr_id);
                if check_dr.rule != rule || check_dr.dot != pos {
                    continue;
                }
                let check_from_i =
                    dr_from_i - ps.pool.matched_length(check_set, check_idx as usize) as usize;
                if check_from_i == from_i {
                    found = true;
                    break;
                }
            }
            if !found {
                continue;
            }

            if n_candidates != 0 {
                *ambiguous = true;
                if one_parse_p {
                    break;
                }
            }
            let (completed_rule, completed_dot) = {
                let dr = ps.dotted.get(dr_id);
                (dr.rule, dr.dot)
            };
            if n_candidates == 0 {
                states[orig_state].set_k = dr_from_i;
            }
            if disp >= 0 {
                let mut curr_state = orig_state;
                let mut curr_anode = states[orig_state].anode;
                if n_candidates != 0 {
                    // Another derivation of the same span. Same origin:
                    // alternatives merge into one state; different origin:
                    // clone the state (and its anode) for that path.
                    debug_assert!(!one_parse_p);
                    if n_candidates == 1 {
                        orig_states.push(orig_state);
                    }
                    let same_origin = orig_states
                        .iter()
                        .rev()
                        .copied()
                        .find(|&s| states[s].set_k == dr_from_i);
                    match same_origin {
                        Some(s) => {
                            curr_state = s;
                            curr_anode = states[s].anode;
                        }
                        None => {
                            let mut cloned = states[orig_state].clone();
                            cloned.set_k = dr_from_i;
                            if let Some(an) = cloned.anode {
                                cloned.anode = Some(copy_anode(
                                    &mut nodes,
                                    (parent_anode, parent_disp),
                                    an,
                                    disp,
                                ));
                            }
                            let idx = states.len();
                            states.push(cloned);
                            stack.push(idx);
                            orig_states.push(idx);
                            curr_state = idx;
                            curr_anode = states[idx].anode;
                        }
                    }
                }

                if g.rules.get(completed_rule).anode.is_some() {
                    // The completion builds an abstract node.
                    let memo_key = (completed_rule, dr_from_i, set_k);
                    let memoized =
                        if one_parse_p { None } else { anode_memo.get(&memo_key).copied() };
                    let node = match memoized {
                        Some(node) => {
                            debug!("reusing translation of {}", g.rule_text(completed_rule));
                            node
                        }
                        None => {
                            let completed = g.rules.get(completed_rule);
                            let mark = if g.rules.get(rule).marks[pos] != '\0' {
                                g.rules.get(rule).marks[pos]
                            } else {
                                completed.mark
                            };
                            let node = new_node(
                                &mut nodes,
                                TreeNode::Anode {
                                    name: completed.anode.clone().expect("checked above"),
                                    mark,
                                    cost: completed.anode_cost,
                                    children: vec![None; completed.trans_len as usize],
                                },
                            );
                            if !one_parse_p {
                                anode_memo.insert(memo_key, node);
                            }
                            let idx = states.len();
                            states.push(BuildState {
                                rule: completed_rule,
                                dot: completed_dot as i32,
                                from_i: dr_from_i,
                                set_k,
                                parent_anode: match curr_anode {
                                    Some(an) => an,
                                    None => states[curr_state].parent_anode,
                                },
                                parent_disp: match curr_anode {
                                    Some(_) => disp,
                                    None => parent_disp,
                                },
                                anode: Some(node),
                            });
                            stack.push(idx);
                            node
                        }
                    };
                    let place = match curr_anode {
                        Some(an) => (an, disp),
                        None => (parent_anode, parent_disp),
                    };
                    place_translation(&mut nodes, place, node);
                } else if completed_dot != 0 {
                    // Pass-through rule: its translation is the (single)
                    // translated RHS symbol; walk into it.
                    let idx = states.len();
                    states.push(BuildState {
                        rule: completed_rule,
                        dot: completed_dot as i32,
                        from_i: dr_from_i,
                        set_k,
                        parent_anode: match curr_anode {
                            Some(an) => an,
                            None => states[curr_state].parent_anode,
                        },
                        parent_disp: match curr_anode {
                            Some(_) => disp,
                            None => parent_disp,
                        },
                        anode: None,
                    });
                    stack.push(idx);
                } else {
                    // An empty completion translates to nil.
                    let place = match curr_anode {
                        Some(an) => (an, disp),
                        None => (parent_anode, parent_disp),
                    };
                    place_translation(&mut nodes, place, empty_node);
                }
            }
            n_candidates += 1;
        }
        debug_assert!(n_candidates != 0, "the recognizer admitted this span");
    }

    debug!("done building parse tree");

    let mut result = match nodes[root_holder.index()] {
        TreeNode::Anode { ref children, .. } => children[0].expect("the build places a root"),
        _ => unreachable!(),
    };

    if g.cost_p && *ambiguous {
        // Minimal-cost selection needs the whole forest, so it runs as a
        // post-pass: abstract nodes exist before their children do.
        result = find_minimal_translation(&mut nodes, g.one_parse_p, result);
    }

    Some(Forest { nodes, root: result })
}

/// Fold costs bottom-up and keep only the cheapest alternative(s) of every
/// alt chain (all of them when every parse was requested). An abstract
/// node's computed cost is memoized as `-cost - 1` to mark it visited.
fn prune_to_minimal(
    nodes: &mut Vec<TreeNode>,
    one_parse_p: bool,
    id: NodeId,
    cost: &mut i32,
) -> NodeId {
    match nodes[id.index()].clone() {
        TreeNode::Nil | TreeNode::Error | TreeNode::Term { .. } => {
            *cost = 0;
            id
        }
        TreeNode::Anode { cost: node_cost, children, .. } => {
            if node_cost >= 0 {
                let mut total = node_cost;
                let mut kept = children;
                for slot in kept.iter_mut() {
                    let child = slot.expect("built forests have no holes");
                    let pruned = prune_to_minimal(nodes, one_parse_p, child, cost);
                    *slot = Some(pruned);
                    total += *cost;
                }
                if let TreeNode::Anode { cost: c, children, .. } = &mut nodes[id.index()] {
                    *children = kept;
                    *c = -total - 1;
                }
                *cost = total;
            } else {
                *cost = -node_cost - 1;
            }
            id
        }
        TreeNode::Alt { .. } => {
            let mut min_cost = i32::MAX;
            let mut result: Option<NodeId> = None;
            let mut curr = Some(id);
            let mut first = true;
            while let Some(alt_id) = curr {
                let (alt_node, alt_next) = match nodes[alt_id.index()] {
                    TreeNode::Alt { node, next } => (node, next),
                    _ => unreachable!("alt chain holds alt nodes"),
                };
                let pruned = prune_to_minimal(nodes, one_parse_p, alt_node, cost);
                if first || min_cost > *cost {
                    min_cost = *cost;
                    if let TreeNode::Alt { node, next } = &mut nodes[alt_id.index()] {
                        *node = pruned;
                        *next = None;
                    }
                    result = Some(alt_id);
                } else if min_cost == *cost && !one_parse_p {
                    if let TreeNode::Alt { node, next } = &mut nodes[alt_id.index()] {
                        *node = pruned;
                        *next = result;
                    }
                    result = Some(alt_id);
                }
                first = false;
                curr = alt_next;
            }
            *cost = min_cost;
            let result = result.expect("alt chains are non-empty");
            match nodes[result.index()] {
                TreeNode::Alt { node, next: None } => node,
                _ => result,
            }
        }
    }
}

/// Undo the visit marks left by [`prune_to_minimal`], restoring real costs.
fn traverse_pruned(nodes: &mut Vec<TreeNode>, id: NodeId) {
    match nodes[id.index()].clone() {
        TreeNode::Nil | TreeNode::Error | TreeNode::Term { .. } => {}
        TreeNode::Anode { cost, children, .. } => {
            if cost < 0 {
                for child in children.iter().flatten() {
                    traverse_pruned(nodes, *child);
                }
                if let TreeNode::Anode { cost: c, .. } = &mut nodes[id.index()] {
                    *c = -*c - 1;
                }
            }
        }
        TreeNode::Alt { node, next } => {
            traverse_pruned(nodes, node);
            if let Some(n) = next {
                traverse_pruned(nodes, n);
            }
        }
    }
}

fn find_minimal_translation(nodes: &mut Vec<TreeNode>, one_parse_p: bool, root: NodeId) -> NodeId {
    let mut cost = 0;
    let root = prune_to_minimal(nodes, one_parse_p, root, &mut cost);
    traverse_pruned(nodes, root);
    debug!("minimal translation cost {}", cost);
    root
}
