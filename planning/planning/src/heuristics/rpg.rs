//! Propositional relaxed planning graph (FF style).
//!
//! Used when the task has no numeric conditions and no conditional effects:
//! layered forward reachability under delete relaxation, followed by relaxed
//! plan extraction. The heuristic value is the number of distinct actions
//! selected for the relaxed plan.

use crate::plan::INFINITE_H;
use crate::sas::{SasAction, SasCondition, SasTask, VarVal};
use crate::state::State;
use std::collections::BinaryHeap;

const UNREACHED: i32 = i32::MAX;

pub struct Rpg<'a> {
    task: &'a SasTask,
    /// First layer of each `(variable, value)`.
    literal_levels: Vec<Vec<i32>>,
    /// First layer of each ordinary action.
    action_levels: Vec<i32>,
    num_levels: i32,
}

impl<'a> Rpg<'a> {
    /// Builds the graph to saturation from the given frontier state. TIL
    /// effects are available from layer 0 on (delete relaxation makes their
    /// timing irrelevant here).
    pub fn new(state: &State, task: &'a SasTask, include_tils: bool) -> Rpg<'a> {
        let mut rpg = Rpg {
            task,
            literal_levels: task
                .variables
                .iter()
                .map(|v| vec![UNREACHED; v.values.len()])
                .collect(),
            action_levels: vec![UNREACHED; task.actions.len()],
            num_levels: 0,
        };
        // remaining unreached preconditions per action
        let mut missing: Vec<usize> = task
            .actions
            .iter()
            .map(|a| a.cond_start.len() + a.cond_over_all.len() + a.cond_end.len())
            .collect();

        let mut frontier: Vec<VarVal> = Vec::new();
        for (var, &val) in state.values.iter().enumerate() {
            rpg.literal_levels[var][val as usize] = 0;
            frontier.push(VarVal::new(crate::sas::SasVarId(var as u32), val));
        }
        if include_tils {
            for til in &task.til_actions {
                for e in &til.eff_start {
                    if rpg.literal_levels[usize::from(e.var)][e.val as usize] == UNREACHED {
                        rpg.literal_levels[usize::from(e.var)][e.val as usize] = 0;
                        frontier.push(e.var_val());
                    }
                }
            }
        }

        let mut level = 0;
        // actions without preconditions fire on the first layer
        let mut applicable: Vec<usize> = missing
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m == 0)
            .map(|(i, _)| i)
            .collect();
        while !frontier.is_empty() || !applicable.is_empty() {
            for vv in frontier.drain(..) {
                for &a in &self_requirers(task, vv) {
                    missing[a] -= 1;
                    if missing[a] == 0 {
                        applicable.push(a);
                    }
                }
            }
            let mut next = Vec::new();
            for a in applicable.drain(..) {
                if rpg.action_levels[a] != UNREACHED {
                    continue;
                }
                rpg.action_levels[a] = level;
                let action = &task.actions[a];
                for e in action.eff_start.iter().chain(action.eff_end.iter()).chain(
                    action
                        .conditional
                        .iter()
                        .flat_map(|c| c.eff_start.iter().chain(c.eff_end.iter())),
                ) {
                    let slot = &mut rpg.literal_levels[usize::from(e.var)][e.val as usize];
                    if *slot == UNREACHED {
                        *slot = level + 1;
                        next.push(e.var_val());
                    }
                }
            }
            frontier = next;
            level += 1;
        }
        rpg.num_levels = level;
        rpg
    }

    pub fn level(&self, vv: VarVal) -> i32 {
        self.literal_levels[usize::from(vv.var())][vv.val() as usize]
    }

    pub fn is_reachable(&self, vv: VarVal) -> bool {
        self.level(vv) != UNREACHED
    }

    pub fn action_level(&self, index: usize) -> i32 {
        self.action_levels[index]
    }

    pub fn is_executable(&self, a: &SasAction) -> bool {
        a.cond_start
            .iter()
            .chain(a.cond_over_all.iter())
            .chain(a.cond_end.iter())
            .all(|c| self.is_reachable(c.var_val()))
    }

    /// Sum of the first layers of an action's preconditions, the tie-break
    /// between producers during extraction.
    fn difficulty(&self, a: &SasAction) -> i64 {
        a.cond_start
            .iter()
            .chain(a.cond_over_all.iter())
            .chain(a.cond_end.iter())
            .map(|c| self.level(c.var_val()) as i64)
            .sum()
    }

    /// Extracts a relaxed plan for the given goal conditions and returns its
    /// size, or [`INFINITE_H`] if some subgoal is unreachable.
    pub fn evaluate(&self, goals: &[SasCondition]) -> u32 {
        let mut open: BinaryHeap<Subgoal> = BinaryHeap::new();
        for c in goals {
            let lev = self.level(c.var_val());
            if lev == UNREACHED {
                return INFINITE_H;
            }
            open.push(Subgoal {
                level: lev,
                var_val: c.var_val(),
            });
        }
        let mut selected = vec![false; self.task.actions.len()];
        let mut achieved: Vec<VarVal> = Vec::new();
        let mut count = 0u32;
        while let Some(sub) = open.pop() {
            if sub.level <= 0 || achieved.contains(&sub.var_val) {
                continue;
            }
            achieved.push(sub.var_val);
            let producers =
                &self.task.producers[usize::from(sub.var_val.var())][sub.var_val.val() as usize];
            let best = producers
                .iter()
                .copied()
                .filter(|&a| self.action_levels[a] < sub.level)
                .min_by_key(|&a| (self.difficulty(&self.task.actions[a]), a));
            let Some(best) = best else {
                // reachable from the initial layer only (e.g. a TIL effect)
                continue;
            };
            if !selected[best] {
                selected[best] = true;
                count += 1;
                let action = &self.task.actions[best];
                for c in action
                    .cond_start
                    .iter()
                    .chain(action.cond_over_all.iter())
                    .chain(action.cond_end.iter())
                {
                    open.push(Subgoal {
                        level: self.level(c.var_val()),
                        var_val: c.var_val(),
                    });
                }
            }
        }
        count
    }
}

fn self_requirers(task: &SasTask, vv: VarVal) -> Vec<usize> {
    task.requirers[usize::from(vv.var())][vv.val() as usize].clone()
}

/// Subgoals pop highest layer first, with a stable id tie-break.
#[derive(Eq, PartialEq)]
struct Subgoal {
    level: i32,
    var_val: VarVal,
}

impl Ord for Subgoal {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level
            .cmp(&other.level)
            .then_with(|| other.var_val.cmp(&self.var_val))
    }
}

impl PartialOrd for Subgoal {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::statics::remove_static_variables;
    use crate::grounding::tests::build;
    use crate::sas::translator::{translate, TranslateOptions};

    fn task(domain: &str, problem: &str) -> SasTask {
        let mut g = build(domain, problem);
        remove_static_variables(&mut g);
        translate(g, &TranslateOptions::default()).unwrap()
    }

    const DOM: &str = "(define (domain d)
      (:types loc)
      (:predicates (at ?l - loc) (visited ?l - loc))
      (:action go :parameters (?a ?b - loc)
        :precondition (at ?a)
        :effect (and (not (at ?a)) (at ?b) (visited ?b))))";

    const PB: &str = "(define (problem p) (:domain d)
      (:objects x y z - loc)
      (:init (at x))
      (:goal (and (visited z))))";

    #[test]
    fn heuristic_counts_relaxed_plan_size() {
        let t = task(DOM, PB);
        let state = State::initial(&t);
        let rpg = Rpg::new(&state, &t, true);
        let goal = &t.goal_actions[0];
        let h = rpg.evaluate(&goal.cond_end);
        // one go action reaches (visited z) under delete relaxation
        assert_eq!(h, 1);
    }

    #[test]
    fn unreachable_goal_is_infinite() {
        let t = task(
            DOM,
            "(define (problem p) (:domain d)
               (:objects x y - loc)
               (:init)
               (:goal (visited y)))",
        );
        let state = State::initial(&t);
        let rpg = Rpg::new(&state, &t, true);
        if t.goal_actions.is_empty() {
            // goal literal never grounded, trivially unreachable
            return;
        }
        let h = rpg.evaluate(&t.goal_actions[0].cond_end);
        assert_eq!(h, INFINITE_H);
    }

    #[test]
    fn heuristic_is_admissible_for_relaxed_fragment() {
        let t = task(DOM, PB);
        let state = State::initial(&t);
        let rpg = Rpg::new(&state, &t, true);
        let h = rpg.evaluate(&t.goal_actions[0].cond_end);
        // an actual relaxed plan: (go x z), so h must not exceed 1
        assert!(h <= 1);
    }
}
