//! Temporal relaxed planning graph: instead of integer layers, every fluent
//! carries a *first generation time*. Actions schedule their start effects at
//! `start + ε` and their end effects at `start + ε + duration`, with arrivals
//! processed through a time-ordered queue. The resulting levels feed the
//! landmark extraction.

use crate::intervals::{ActionIntervals, NumericState};
use crate::sas::{SasAction, SasTask, VarVal};
use crate::state::State;
use hashbrown::HashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

pub struct TemporalRpg<'a> {
    pub task: &'a SasTask,
    /// First generation time of each reached `(variable, value)`.
    pub fluent_time: HashMap<VarVal, f64>,
    /// Start time of each ordinary action, `None` while unreachable.
    pub action_time: Vec<Option<f64>>,
    /// Distinct generation times, ascending; level index = position.
    pub level_times: Vec<f64>,
}

/// Arrival of a fluent, ordered by time then by fluent for determinism.
#[derive(PartialEq)]
struct Arrival {
    time: f64,
    var_val: VarVal,
}

impl Eq for Arrival {}

impl Ord for Arrival {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .partial_cmp(&other.time)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(self.var_val.cmp(&other.var_val))
    }
}

impl PartialOrd for Arrival {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> TemporalRpg<'a> {
    pub fn build(state: &State, task: &'a SasTask, epsilon: f64) -> TemporalRpg<'a> {
        let mut rpg = TemporalRpg {
            task,
            fluent_time: HashMap::new(),
            action_time: vec![None; task.actions.len()],
            level_times: Vec::new(),
        };
        let mut missing: Vec<usize> = task
            .actions
            .iter()
            .map(|a| a.cond_start.len() + a.cond_over_all.len() + a.cond_end.len())
            .collect();
        let mut queue: BinaryHeap<Reverse<Arrival>> = BinaryHeap::new();
        for (var, &val) in state.values.iter().enumerate() {
            queue.push(Reverse(Arrival {
                time: 0.0,
                var_val: VarVal::new(crate::sas::SasVarId(var as u32), val),
            }));
        }
        for til in &task.til_actions {
            for e in &til.eff_start {
                queue.push(Reverse(Arrival {
                    time: til.til_time,
                    var_val: e.var_val(),
                }));
            }
        }
        // duration windows never change during the relaxation, compute once
        let durations: Vec<f64> = task
            .actions
            .iter()
            .map(|a| min_duration(a, state, task))
            .collect();

        for (a, m) in missing.iter().enumerate() {
            if *m == 0 {
                rpg.schedule_action(a, 0.0, durations[a], epsilon, &mut queue);
            }
        }
        while let Some(Reverse(arrival)) = queue.pop() {
            if rpg.fluent_time.contains_key(&arrival.var_val) {
                continue;
            }
            rpg.fluent_time.insert(arrival.var_val, arrival.time);
            let var = usize::from(arrival.var_val.var());
            let val = arrival.var_val.val() as usize;
            for &a in &task.requirers[var][val] {
                missing[a] -= 1;
                if missing[a] == 0 {
                    let start = rpg.earliest_start(&task.actions[a]);
                    rpg.schedule_action(a, start, durations[a], epsilon, &mut queue);
                }
            }
        }
        let mut times: Vec<f64> = rpg.fluent_time.values().copied().collect();
        times.sort_by(|a, b| a.partial_cmp(b).unwrap());
        times.dedup();
        rpg.level_times = times;
        rpg
    }

    fn earliest_start(&self, a: &SasAction) -> f64 {
        let mut t: f64 = 0.0;
        for c in a
            .cond_start
            .iter()
            .chain(a.cond_over_all.iter())
            .chain(a.cond_end.iter())
        {
            t = t.max(self.fluent_time[&c.var_val()]);
        }
        t
    }

    fn schedule_action(
        &mut self,
        index: usize,
        start: f64,
        duration: f64,
        epsilon: f64,
        queue: &mut BinaryHeap<Reverse<Arrival>>,
    ) {
        if self.action_time[index].is_some() {
            return;
        }
        self.action_time[index] = Some(start);
        let a = &self.task.actions[index];
        for e in a
            .eff_start
            .iter()
            .chain(a.conditional.iter().flat_map(|c| c.eff_start.iter()))
        {
            queue.push(Reverse(Arrival {
                time: start + epsilon,
                var_val: e.var_val(),
            }));
        }
        for e in a
            .eff_end
            .iter()
            .chain(a.conditional.iter().flat_map(|c| c.eff_end.iter()))
        {
            queue.push(Reverse(Arrival {
                time: start + epsilon + duration,
                var_val: e.var_val(),
            }));
        }
    }

    pub fn time_of(&self, vv: VarVal) -> Option<f64> {
        self.fluent_time.get(&vv).copied()
    }

    /// The level index of a fluent's generation time.
    pub fn level_of(&self, vv: VarVal) -> Option<usize> {
        let t = self.time_of(vv)?;
        self.level_times
            .iter()
            .position(|&lt| (lt - t).abs() < f64::EPSILON)
    }

    pub fn is_reachable(&self, vv: VarVal) -> bool {
        self.fluent_time.contains_key(&vv)
    }
}

/// Lower bound of an action's duration window in the given state; zero for
/// instantaneous actions and unconstrained durations.
pub fn min_duration(a: &SasAction, state: &impl NumericState, task: &SasTask) -> f64 {
    if a.is_instantaneous() {
        return 0.0;
    }
    let calc = ActionIntervals::new(a, state, task.num_num_vars());
    if calc.duration.min.is_finite() && calc.duration.min > 0.0 {
        calc.duration.min
    } else {
        0.0
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

    #[test]
    fn generation_times_follow_durations() {
        let t = task(
            "(define (domain d)
               (:predicates (a) (b) (c))
               (:durative-action first
                 :parameters ()
                 :duration (= ?duration 5)
                 :condition (at start (a))
                 :effect (at end (b)))
               (:durative-action second
                 :parameters ()
                 :duration (= ?duration 2)
                 :condition (at start (b))
                 :effect (at end (c))))",
            "(define (problem p) (:domain d) (:init (a)) (:goal (c)))",
        );
        let state = State::initial(&t);
        let rpg = TemporalRpg::build(&state, &t, 0.001);
        let lit = |name: &str| {
            let var = t
                .variables
                .iter()
                .position(|v| v.name == name)
                .unwrap_or_else(|| panic!("missing {name}"));
            let idx = crate::sas::SasVarId(var as u32);
            // value 0 is the positive literal of a boolean variable
            VarVal::new(idx, 0)
        };
        let tb = rpg.time_of(lit("(b)")).unwrap();
        let tc = rpg.time_of(lit("(c)")).unwrap();
        assert!((tb - 5.001).abs() < 1e-9, "{tb}");
        assert!((tc - tb - 2.001).abs() < 1e-9, "{tc}");
        assert!(rpg.level_of(lit("(b)")).unwrap() < rpg.level_of(lit("(c)")).unwrap());
    }

    #[test]
    fn til_effects_arrive_at_their_time() {
        let t = task(
            "(define (domain d) (:predicates (p) (q))
               (:action act :parameters () :precondition (p) :effect (q)))",
            "(define (problem p) (:domain d) (:init (at 3.0 (p))) (:goal (q)))",
        );
        let state = State::initial(&t);
        let rpg = TemporalRpg::build(&state, &t, 0.001);
        let p_var = t.variables.iter().position(|v| v.name == "(p)").unwrap();
        let vv = VarVal::new(crate::sas::SasVarId(p_var as u32), 0);
        assert_eq!(rpg.time_of(vv), Some(3.0));
    }
}
