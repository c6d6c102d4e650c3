//! Numeric relaxed planning graph: propositional layers as in the FF graph,
//! plus one reachable interval per numeric variable that only ever widens.
//! An action is applicable at a layer when its propositional conditions are
//! reached and its numeric conditions are satisfiable under the current
//! intervals. Subgoal extraction remembers *which side* of an interval a
//! condition needs and charges the producer that widened that side.
//!
//! Repeatable effects accelerate: when an already-applied action widens an
//! interval again on the next layer, the side jumps to infinity at once,
//! which bounds the number of layers.

use crate::grounding::{GroundNumCond, GroundNumExpr, NumVarId};
use crate::intervals::{ActionIntervals, Interval, NumericState};
use crate::plan::INFINITE_H;
use crate::sas::{SasAction, SasTask, VarVal};
use crate::state::State;
use std::collections::BinaryHeap;

const UNREACHED: i32 = i32::MAX;

/// One widening of an interval side.
#[derive(Copy, Clone)]
struct Widening {
    level: i32,
    action: usize,
}

pub struct NumericRpg<'a> {
    task: &'a SasTask,
    literal_levels: Vec<Vec<i32>>,
    action_levels: Vec<Option<i32>>,
    /// Reachable hull per numeric variable.
    hull: Vec<Interval>,
    min_producers: Vec<Vec<Widening>>,
    max_producers: Vec<Vec<Widening>>,
}

struct HullView<'x>(&'x [Interval]);

impl NumericState for HullView<'_> {
    fn min_value(&self, v: NumVarId) -> f64 {
        self.0[usize::from(v)].min
    }
    fn max_value(&self, v: NumVarId) -> f64 {
        self.0[usize::from(v)].max
    }
}

impl<'a> NumericRpg<'a> {
    pub fn build(state: &State, task: &'a SasTask) -> NumericRpg<'a> {
        let mut rpg = NumericRpg {
            task,
            literal_levels: task
                .variables
                .iter()
                .map(|v| vec![UNREACHED; v.values.len()])
                .collect(),
            action_levels: vec![None; task.actions.len()],
            hull: (0..task.num_num_vars())
                .map(|i| state.interval(NumVarId(i as u32)))
                .collect(),
            min_producers: vec![Vec::new(); task.num_num_vars()],
            max_producers: vec![Vec::new(); task.num_num_vars()],
        };
        for (var, &val) in state.values.iter().enumerate() {
            rpg.literal_levels[var][val as usize] = 0;
        }
        for til in &task.til_actions {
            for e in &til.eff_start {
                let slot = &mut rpg.literal_levels[usize::from(e.var)][e.val as usize];
                if *slot == UNREACHED {
                    *slot = 0;
                }
            }
        }

        let mut level = 0;
        loop {
            let mut changed = false;
            for (i, a) in task.actions.iter().enumerate() {
                if !rpg.boolean_conds_reached(a, level) {
                    continue;
                }
                let mut calc = ActionIntervals::new(a, &HullView(&rpg.hull), task.num_num_vars());
                if calc.duration.is_empty()
                    || !calc.all_satisfiable(&a.num_cond_start)
                    || !calc.all_satisfiable(&a.num_cond_over_all)
                    || !calc.all_satisfiable(&a.num_cond_end)
                {
                    continue;
                }
                let repeated = match rpg.action_levels[i] {
                    None => {
                        rpg.action_levels[i] = Some(level);
                        changed = true;
                        false
                    }
                    Some(first) => first < level,
                };
                // propositional effects, conditional ones gated by their
                // trigger conditions under the current layer
                for e in a.eff_start.iter().chain(a.eff_end.iter()) {
                    changed |= rpg.reach_literal(e.var_val(), level + 1);
                }
                let mut changes = Vec::new();
                calc.apply_effects(&a.num_eff_start, false, &mut changes);
                calc.apply_effects(&a.num_eff_end, true, &mut changes);
                for ce in &a.conditional {
                    let conds_hold = ce
                        .cond_start
                        .iter()
                        .chain(ce.cond_end.iter())
                        .all(|c| rpg.literal_levels[usize::from(c.var)][c.val as usize] <= level)
                        && calc.all_satisfiable(&ce.num_cond_start)
                        && calc.all_satisfiable(&ce.num_cond_end);
                    if conds_hold {
                        for e in ce.eff_start.iter().chain(ce.eff_end.iter()) {
                            changed |= rpg.reach_literal(e.var_val(), level + 1);
                        }
                        calc.apply_effects(&ce.num_eff_start, false, &mut changes);
                        calc.apply_effects(&ce.num_eff_end, true, &mut changes);
                    }
                }
                for ch in changes {
                    changed |= rpg.widen(ch.var, ch.interval, level + 1, i, repeated);
                }
            }
            if !changed {
                break;
            }
            level += 1;
        }
        rpg
    }

    fn boolean_conds_reached(&self, a: &SasAction, level: i32) -> bool {
        a.cond_start
            .iter()
            .chain(a.cond_over_all.iter())
            .chain(a.cond_end.iter())
            .all(|c| self.literal_levels[usize::from(c.var)][c.val as usize] <= level)
    }

    fn reach_literal(&mut self, vv: VarVal, level: i32) -> bool {
        let slot = &mut self.literal_levels[usize::from(vv.var())][vv.val() as usize];
        if *slot == UNREACHED {
            *slot = level;
            true
        } else {
            false
        }
    }

    fn widen(
        &mut self,
        var: NumVarId,
        candidate: Interval,
        level: i32,
        action: usize,
        repeated: bool,
    ) -> bool {
        let v = usize::from(var);
        let mut changed = false;
        if candidate.min < self.hull[v].min {
            self.hull[v].min = if repeated { f64::NEG_INFINITY } else { candidate.min };
            self.min_producers[v].push(Widening { level, action });
            changed = true;
        }
        if candidate.max > self.hull[v].max {
            self.hull[v].max = if repeated { f64::INFINITY } else { candidate.max };
            self.max_producers[v].push(Widening { level, action });
            changed = true;
        }
        changed
    }

    fn literal_level(&self, vv: VarVal) -> i32 {
        self.literal_levels[usize::from(vv.var())][vv.val() as usize]
    }

    fn satisfiable_at_hull(&self, c: &GroundNumCond) -> bool {
        // the hull is the final reachable envelope, evaluate against it
        let mut probe = ActionIntervals::new(
            &probe_action(),
            &HullView(&self.hull),
            self.task.num_num_vars(),
        );
        probe.satisfiable(c)
    }

    /// Relaxed-plan extraction for one goal action. Stops counting past
    /// `limit` (the parent's heuristic value makes a natural bound).
    pub fn evaluate(&self, goal: &SasAction, limit: u32) -> u32 {
        let mut open: BinaryHeap<Subgoal> = BinaryHeap::new();
        for c in goal.start_conditions().chain(goal.cond_end.iter()) {
            let lev = self.literal_level(c.var_val());
            if lev == UNREACHED {
                return INFINITE_H;
            }
            open.push(Subgoal::Literal {
                level: lev,
                var_val: c.var_val(),
            });
        }
        for c in goal
            .num_cond_start
            .iter()
            .chain(goal.num_cond_over_all.iter())
            .chain(goal.num_cond_end.iter())
        {
            if !self.satisfiable_at_hull(c) {
                return INFINITE_H;
            }
            self.push_numeric_subgoals(c, &mut open);
        }

        let mut selected = vec![false; self.task.actions.len()];
        let mut achieved_lits: Vec<VarVal> = Vec::new();
        let mut achieved_sides: Vec<(NumVarId, bool)> = Vec::new();
        let mut count = 0u32;
        while let Some(sub) = open.pop() {
            if count > limit {
                return count;
            }
            let chosen = match sub {
                Subgoal::Literal { level, var_val } => {
                    if level <= 0 || achieved_lits.contains(&var_val) {
                        continue;
                    }
                    achieved_lits.push(var_val);
                    self.best_literal_producer(var_val, level)
                }
                Subgoal::Numeric {
                    var, want_max, ..
                } => {
                    if achieved_sides.contains(&(var, want_max)) {
                        continue;
                    }
                    achieved_sides.push((var, want_max));
                    let producers = if want_max {
                        &self.max_producers[usize::from(var)]
                    } else {
                        &self.min_producers[usize::from(var)]
                    };
                    producers.last().map(|w| w.action)
                }
            };
            let Some(action) = chosen else { continue };
            if !selected[action] {
                selected[action] = true;
                count += 1;
                let a = &self.task.actions[action];
                for c in a
                    .cond_start
                    .iter()
                    .chain(a.cond_over_all.iter())
                    .chain(a.cond_end.iter())
                {
                    open.push(Subgoal::Literal {
                        level: self.literal_level(c.var_val()),
                        var_val: c.var_val(),
                    });
                }
                for c in a
                    .num_cond_start
                    .iter()
                    .chain(a.num_cond_over_all.iter())
                    .chain(a.num_cond_end.iter())
                {
                    self.push_numeric_subgoals(c, &mut open);
                }
            }
        }
        count
    }

    fn best_literal_producer(&self, vv: VarVal, level: i32) -> Option<usize> {
        self.task.producers[usize::from(vv.var())][vv.val() as usize]
            .iter()
            .copied()
            .filter(|&a| matches!(self.action_levels[a], Some(l) if l < level))
            .min_by_key(|&a| (self.difficulty(&self.task.actions[a]), a))
    }

    fn difficulty(&self, a: &SasAction) -> i64 {
        a.cond_start
            .iter()
            .chain(a.cond_over_all.iter())
            .chain(a.cond_end.iter())
            .map(|c| self.literal_level(c.var_val()) as i64)
            .sum()
    }

    fn push_numeric_subgoals(&self, c: &GroundNumCond, open: &mut BinaryHeap<Subgoal>) {
        let mut sides = Vec::new();
        match c.comp {
            crate::model::Comparator::Less | crate::model::Comparator::LessEq => {
                collect_sides(&c.left, false, &mut sides);
                collect_sides(&c.right, true, &mut sides);
            }
            crate::model::Comparator::Greater | crate::model::Comparator::GreaterEq => {
                collect_sides(&c.left, true, &mut sides);
                collect_sides(&c.right, false, &mut sides);
            }
            _ => {
                collect_sides(&c.left, true, &mut sides);
                collect_sides(&c.left, false, &mut sides);
                collect_sides(&c.right, true, &mut sides);
                collect_sides(&c.right, false, &mut sides);
            }
        }
        for (var, want_max) in sides {
            let producers = if want_max {
                &self.max_producers[usize::from(var)]
            } else {
                &self.min_producers[usize::from(var)]
            };
            if let Some(last) = producers.last() {
                open.push(Subgoal::Numeric {
                    level: last.level,
                    var,
                    want_max,
                });
            }
        }
    }
}

/// Which numeric variables an expression pulls towards which interval side.
fn collect_sides(e: &GroundNumExpr, want_max: bool, out: &mut Vec<(NumVarId, bool)>) {
    match e {
        GroundNumExpr::Var(v) => out.push((*v, want_max)),
        GroundNumExpr::Add(a, b) => {
            collect_sides(a, want_max, out);
            collect_sides(b, want_max, out);
        }
        GroundNumExpr::Sub(a, b) => {
            collect_sides(a, want_max, out);
            collect_sides(b, !want_max, out);
        }
        GroundNumExpr::Mul(a, b) | GroundNumExpr::Div(a, b) => {
            // sign unknown, both sides of both operands may matter
            collect_sides(a, want_max, out);
            collect_sides(a, !want_max, out);
            collect_sides(b, want_max, out);
            collect_sides(b, !want_max, out);
        }
        _ => {}
    }
}

fn probe_action() -> SasAction {
    SasAction {
        index: usize::MAX,
        name: String::new(),
        duration: Vec::new(),
        num_control_vars: 0,
        cond_start: Vec::new(),
        cond_over_all: Vec::new(),
        cond_end: Vec::new(),
        num_cond_start: Vec::new(),
        num_cond_over_all: Vec::new(),
        num_cond_end: Vec::new(),
        eff_start: Vec::new(),
        eff_end: Vec::new(),
        num_eff_start: Vec::new(),
        num_eff_end: Vec::new(),
        conditional: Vec::new(),
        is_til: false,
        til_time: 0.0,
        is_goal: false,
        cost: None,
    }
}

enum Subgoal {
    Literal { level: i32, var_val: VarVal },
    Numeric { level: i32, var: NumVarId, want_max: bool },
}

impl Subgoal {
    fn level(&self) -> i32 {
        match self {
            Subgoal::Literal { level, .. } | Subgoal::Numeric { level, .. } => *level,
        }
    }
}

impl PartialEq for Subgoal {
    fn eq(&self, other: &Self) -> bool {
        self.level() == other.level()
    }
}
impl Eq for Subgoal {}
impl Ord for Subgoal {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.level().cmp(&other.level())
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
      (:types truck location)
      (:predicates (at ?t - truck ?l - location) (link ?a ?b - location))
      (:functions (fuel ?t - truck) (distance ?a ?b - location))
      (:durative-action drive
        :parameters (?t - truck ?from ?to - location)
        :duration (= ?duration 1)
        :condition (and (at start (at ?t ?from)) (over all (link ?from ?to))
                        (at start (>= (fuel ?t) (distance ?from ?to))))
        :effect (and (at start (not (at ?t ?from))) (at end (at ?t ?to))
                     (at end (decrease (fuel ?t) (distance ?from ?to))))))";

    const PB: &str = "(define (problem p) (:domain d)
      (:objects tr - truck a b c - location)
      (:init (at tr a) (link a b) (link b c)
             (= (fuel tr) 10) (= (distance a b) 4) (= (distance b c) 5))
      (:goal (at tr c)))";

    #[test]
    fn goal_is_reachable_with_two_drives() {
        let t = task(DOM, PB);
        let state = State::initial(&t);
        let rpg = NumericRpg::build(&state, &t);
        let h = rpg.evaluate(&t.goal_actions[0], 100);
        assert_eq!(h, 2);
    }

    #[test]
    fn insufficient_fuel_makes_goal_unreachable() {
        let t = task(
            DOM,
            "(define (problem p) (:domain d)
               (:objects tr - truck a b c - location)
               (:init (at tr a) (link a b) (link b c)
                      (= (fuel tr) 3) (= (distance a b) 4) (= (distance b c) 5))
               (:goal (at tr c)))",
        );
        let state = State::initial(&t);
        let rpg = NumericRpg::build(&state, &t);
        let h = rpg.evaluate(&t.goal_actions[0], 100);
        assert_eq!(h, INFINITE_H);
    }

    #[test]
    fn intervals_widen_monotonically() {
        let t = task(DOM, PB);
        let state = State::initial(&t);
        let rpg = NumericRpg::build(&state, &t);
        // fuel can only decrease in the relaxation, the max stays at 10
        let fuel = (0..t.num_num_vars())
            .map(|i| NumVarId(i as u32))
            .find(|&v| t.grounded.num_fluent_name(v) == "(fuel tr)")
            .unwrap();
        let hull = rpg.hull[usize::from(fuel)];
        assert_eq!(hull.max, 10.0);
        assert!(hull.min < 10.0);
    }
}
