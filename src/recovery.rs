//! Minimal-cost error recovery.
//!
//! The cost of a recovery is the number of input tokens it ignores. On a
//! syntax error the search walks recovery states: each one picks a state
//! set whose core recognizes the `error` terminal (the injected
//! `$S : error $eof` rule guarantees set 0 does), shifts `error` there,
//! skips input tokens until one is recognized, and then demands
//! `recovery_token_matches` clean shifts before the candidate counts.
//! The back frontier explores starting the recovery in ever-earlier sets;
//! the head frontier explores skipping more leading tokens. The cheapest
//! successful candidate wins and parsing resumes from its restored state.
//!
//! Recovery never abandons already-built state sets: saved originals are
//! put back and recovery sets are appended after them.

use log::{debug, trace};

use crate::engine::{ParseState, RecoverOutcome, SyntaxErrorEvent};

/// One recovery alternative: how much of the original state-set list is
/// kept, the sets appended after it, and where the input resumes.
#[derive(Debug, Clone)]
pub(crate) struct RecoveryState {
    pub last_original_set: usize,
    pub set_tail: Vec<crate::sets::StateSetId>,
    pub start_tok: usize,
    /// Tokens already ignored to reach this state.
    pub backward_move_cost: i32,
}

impl ParseState<'_, '_> {
    pub(crate) fn recovery_init(&mut self) {
        self.original_tail.clear();
        self.recovery_state_stack.clear();
        self.original_last_state_set_el = -1;
    }

    /// Called on an unexpected token. Reports the error through the
    /// callback; with recovery enabled the parse position is already moved
    /// past the repaired span when this returns.
    pub(crate) fn try_to_recover(&mut self) -> RecoverOutcome {
        let saved_tok_i = self.tok_i;
        if self.g.error_recovery_p {
            debug!("attempting error recovery...");
            let (start, stop) = self.error_recovery();
            let ev = SyntaxErrorEvent {
                err_tok: saved_tok_i,
                err_attr: self.input[saved_tok_i].attr,
                ignored: Some((start, self.input[start].attr)),
                recovered: Some((stop, self.input[stop].attr)),
            };
            self.report_syntax_error(ev);
            RecoverOutcome::Recovered
        } else {
            let ev = SyntaxErrorEvent {
                err_tok: saved_tok_i,
                err_attr: self.input[saved_tok_i].attr,
                ignored: None,
                recovered: None,
            };
            self.report_syntax_error(ev);
            RecoverOutcome::Stopped
        }
    }

    /// The original state sets in `(last, recovery_start_set_k]` may be
    /// overwritten by recovery sets; they are saved (in reverse) so any
    /// alternative can be tried from a pristine list.
    fn save_original_sets(&mut self) {
        let length = self.original_tail.len() as isize;
        let mut curr = self.recovery_start_set_k as isize - length;
        while curr >= self.set_k as isize {
            trace!("save original set {}", curr);
            self.original_tail.push(self.state_sets[curr as usize]);
            curr -= 1;
        }
        self.original_last_state_set_el = self.set_k as isize - 1;
    }

    fn restore_original_sets(&mut self, last: isize) {
        if self.original_last_state_set_el >= last {
            self.original_last_state_set_el = last;
            return;
        }
        loop {
            self.original_last_state_set_el += 1;
            let tail_idx = (self.recovery_start_set_k as isize - self.original_last_state_set_el) as usize;
            let set = self.original_tail[tail_idx];
            let k = self.original_last_state_set_el as usize;
            trace!("restore original set {}", k);
            self.put_state_set(k, set);
            if self.original_last_state_set_el >= last {
                break;
            }
        }
    }

    /// Walk backwards from `start` to the nearest state set whose core
    /// recognizes `error`. `cost` counts the terminals passed on the way
    /// (recovery sets reached by shifting `error` are free).
    fn find_error_state_set(&self, start: usize, cost: &mut i32) -> usize {
        *cost = 0;
        let term_error = self.g.term_error.expect("grammar is defined");
        let mut curr = start as isize;
        while curr >= 0 {
            let core = self.pool.set(self.state_sets[curr as usize]).core;
            if self.index.find(core, term_error).is_some() {
                break;
            }
            if self.pool.core(core).term != Some(term_error) {
                *cost += 1;
            }
            curr -= 1;
        }
        assert!(curr >= 0, "set 0 always recognizes `error`");
        curr as usize
    }

    fn new_recovery_state(&self, last_original_set: usize, backward_move_cost: i32) -> RecoveryState {
        debug_assert!(backward_move_cost >= 0);
        trace!(
            "creating recovery state: original set={}, tok={}",
            last_original_set,
            self.tok_i
        );
        let set_tail = self.state_sets[last_original_set + 1..=self.set_k].to_vec();
        RecoveryState {
            last_original_set,
            set_tail,
            start_tok: self.tok_i,
            backward_move_cost,
        }
    }

    fn push_recovery_state(&mut self, last_original_set: usize, backward_move_cost: i32) {
        let state = self.new_recovery_state(last_original_set, backward_move_cost);
        trace!("push recovery state: original set={}, tok={}", last_original_set, self.tok_i);
        self.recovery_state_stack.push(state);
    }

    /// Reposition the parser (state sets, set_k, tok_i) at `state`.
    fn set_recovery_state(&mut self, state: &RecoveryState) {
        self.tok_i = state.start_tok;
        self.restore_original_sets(state.last_original_set as isize);
        self.set_k = state.last_original_set;
        trace!("set recovery state: set={}, tok={}", self.set_k, self.tok_i);
        for i in 0..state.set_tail.len() {
            self.set_k += 1;
            let (k, set) = (self.set_k, state.set_tail[i]);
            self.put_state_set(k, set);
        }
    }

    fn pop_recovery_state(&mut self) -> RecoveryState {
        let state = self.recovery_state_stack.pop().expect("stack is non-empty");
        trace!("pop error recovery state");
        self.set_recovery_state(&state);
        state
    }

    /// The search itself. Returns (first ignored token, first token after
    /// the ignored span).
    fn error_recovery(&mut self) -> (usize, usize) {
        debug!("error recovery start");
        let term_error = self.g.term_error.expect("grammar is defined");
        let mut result_start: isize = -1;
        let mut result_stop: isize = -1;

        self.original_tail.clear();
        self.recovery_state_stack.clear();
        self.recovery_start_set_k = self.set_k;
        self.recovery_start_tok_i = self.tok_i;

        let mut backward_move_cost = 0;
        self.set_k = self.find_error_state_set(self.set_k, &mut backward_move_cost);
        self.back_state_set_frontier = self.set_k;
        let mut back_to_frontier_move_cost = backward_move_cost;
        self.save_original_sets();
        self.push_recovery_state(self.back_state_set_frontier, backward_move_cost);

        let mut best_cost = 2 * self.input.len() as i32;
        let mut best_state: Option<RecoveryState> = None;

        while !self.recovery_state_stack.is_empty() {
            let state = self.pop_recovery_state();
            let mut cost = state.backward_move_cost;

            // Try starting the recovery one error-recognizing set earlier.
            if self.back_state_set_frontier > 0 {
                let saved_set_k = self.set_k;
                let saved_tok_i = self.tok_i;
                let mut frontier_cost = 0;
                self.set_k = self.find_error_state_set(self.back_state_set_frontier - 1, &mut frontier_cost);
                debug!(
                    "advance back frontier: old={}, new={}",
                    self.back_state_set_frontier, self.set_k
                );
                if best_cost >= back_to_frontier_move_cost + frontier_cost {
                    self.back_state_set_frontier = self.set_k;
                    self.tok_i = self.recovery_start_tok_i;
                    self.save_original_sets();
                    back_to_frontier_move_cost += frontier_cost;
                    let frontier = self.back_state_set_frontier;
                    self.push_recovery_state(frontier, back_to_frontier_move_cost);
                    self.original_last_state_set_el = state.last_original_set as isize;
                    self.tok_i = saved_tok_i;
                }
                self.set_k = saved_set_k;
            }

            // Try ignoring one more leading token.
            if best_cost >= cost + 1 {
                self.tok_i += 1;
                if self.tok_i < self.input.len() {
                    trace!("advance head frontier: tok={}", self.tok_i);
                    self.push_recovery_state(state.last_original_set, cost + 1);
                }
                self.tok_i -= 1;
            }

            let set = self.state_sets[self.set_k];
            debug!("trying set={}, tok={}", self.set_k, self.tok_i);

            // Shift `error` in the current set.
            let core = self.pool.set(set).core;
            let entry = self.index.find(core, term_error).expect("set recognizes `error`");
            debug!("making error shift in set={}", self.set_k);
            let mut curr_set = self.complete_and_predict(set, entry, term_error, None);
            self.set_k += 1;
            let k = self.set_k;
            self.put_state_set(k, curr_set);

            // Skip input until a token the new core recognizes.
            while self.tok_i < self.input.len() {
                let c = self.pool.set(curr_set).core;
                if self.index.find(c, self.input[self.tok_i].symb).is_some() {
                    break;
                }
                trace!("skipping token {}", self.tok_i);
                cost += 1;
                self.tok_i += 1;
                if cost >= best_cost {
                    break;
                }
            }
            if cost >= best_cost {
                debug!("too many ignored tokens {} (already a worse recovery)", cost);
                continue;
            }
            if self.tok_i >= self.input.len() {
                debug!("reached EOF without matching, rejecting this state");
                continue;
            }

            // Shift the found token, then keep shifting successors until
            // enough match to accept the recovery.
            let symb = self.input[self.tok_i].symb;
            let c = self.pool.set(curr_set).core;
            let entry = self.index.find(c, symb).expect("token was just recognized");
            let next_term = self.lookahead_at(self.tok_i + 1);
            curr_set = self.complete_and_predict(curr_set, entry, symb, next_term);
            self.set_k += 1;
            let k = self.set_k;
            self.put_state_set(k, curr_set);

            let mut num_matched = 0;
            loop {
                trace!("matching token {}", self.tok_i);
                num_matched += 1;
                if num_matched >= self.g.recovery_token_matches {
                    break;
                }
                self.tok_i += 1;
                if self.tok_i >= self.input.len() {
                    break;
                }
                // A secondary recovery could start here.
                let c = self.pool.set(curr_set).core;
                if self.index.find(c, term_error).is_some() {
                    trace!("secondary recovery state at tok={}", self.tok_i);
                    self.push_recovery_state(state.last_original_set, cost);
                }
                let symb = self.input[self.tok_i].symb;
                let entry = match self.index.find(self.pool.set(curr_set).core, symb) {
                    Some(e) => e,
                    None => break,
                };
                let next_term = self.lookahead_at(self.tok_i + 1);
                curr_set = self.complete_and_predict(curr_set, entry, symb, next_term);
                self.set_k += 1;
                let k = self.set_k;
                self.put_state_set(k, curr_set);
            }

            if num_matched >= self.g.recovery_token_matches || self.tok_i >= self.input.len() {
                // A successful recovery; keep the cheapest.
                if best_cost > cost {
                    debug!("ignore {} tokens (the best recovery so far)", cost);
                    best_cost = cost;
                    if self.tok_i == self.input.len() {
                        self.tok_i -= 1;
                    }
                    // The cost slot is unused on the saved best state.
                    best_state = Some(self.new_recovery_state(state.last_original_set, 0));
                    result_start = self.recovery_start_tok_i as isize - state.backward_move_cost as isize;
                    result_stop = result_start + cost as isize;
                } else {
                    debug!("ignore {} tokens (a worse recovery)", cost);
                }
            } else {
                debug!("not enough matched tokens, rejecting this state");
            }
        }

        let best = best_state.expect("the `error` rule guarantees some recovery");
        debug!("finishing error recovery: restore best state");
        self.set_recovery_state(&best);
        debug!(
            "error recovery end: current token {}, current set {}",
            self.tok_i, self.set_k
        );
        (result_start as usize, result_stop as usize)
    }

    fn lookahead_at(&self, idx: usize) -> Option<crate::symbols::SymbolId> {
        if idx < self.input.len() {
            Some(self.input[idx].symb)
        } else {
            None
        }
    }
}
