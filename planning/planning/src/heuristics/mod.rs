//! Heuristic evaluation of plans: the frontier state of a partial plan is
//! computed by replaying its effects along the deterministic linearization,
//! then scored with the relaxed planning graph matching the task (numeric
//! when numeric conditions or conditional effects exist, FF otherwise).
//! Landmark progression runs piggy-backed on the same walk.

pub mod landmarks;
pub mod numeric_rpg;
pub mod rpg;
pub mod temporal_rpg;

use crate::plan::{ActionRef, PlanComponents, PlanId, PlanSpace, INFINITE_H};
use crate::sas::SasTask;
use crate::state::State;
use landmarks::{LandmarkGraph, LandmarkStatus};

pub struct Evaluator {
    /// Chooses between the numeric and the propositional graph.
    numeric_mode: bool,
    landmarks: Option<LandmarkGraph>,
    status: LandmarkStatus,
    components: PlanComponents,
}

impl Evaluator {
    pub fn new(task: &SasTask, epsilon: f64) -> Evaluator {
        let numeric_mode = task.has_numeric_conditions_or_conditional_effects();
        let initial = State::initial(task);
        let graph = LandmarkGraph::build(&initial, task, epsilon);
        let landmarks = if graph.informative_count() > 0 {
            Some(graph)
        } else {
            None
        };
        Evaluator {
            numeric_mode,
            landmarks,
            status: LandmarkStatus::default(),
            components: PlanComponents::default(),
        }
    }

    /// Whether landmark counting contributes to plan selection.
    pub fn informative_landmarks(&self) -> bool {
        self.landmarks.is_some()
    }

    /// Computes and caches the frontier state of a plan, progressing the
    /// landmark graph along the way. Stores `h_land` on the plan.
    pub fn compute_frontier(&mut self, task: &SasTask, space: &mut PlanSpace, id: PlanId) {
        self.components.calculate(space, id);
        let mut state = State::initial(task);
        if let Some(graph) = &self.landmarks {
            self.status.reset(graph);
            self.status.advance(graph, &state);
        }
        for point in self.components.linearize() {
            if point.step() == 0 {
                continue; // the initial pseudo-step is the starting state
            }
            let step_id = self.components.steps[point.step()];
            let plan = &space[step_id];
            let Some(action) = task.action(plan.action) else {
                continue;
            };
            let (effs, num_changes) = if point.is_start() {
                (&action.eff_start, &plan.start.num_changes)
            } else {
                (&action.eff_end, &plan.end.num_changes)
            };
            for &e in effs {
                state.set(e);
            }
            for &idx in &plan.asserted_cond_effs {
                let ce = &action.conditional[idx];
                let bucket = if point.is_start() {
                    &ce.eff_start
                } else {
                    &ce.eff_end
                };
                for &e in bucket {
                    state.set(e);
                }
            }
            for ch in num_changes {
                state.set_num(ch.var, ch.interval);
            }
            if let Some(graph) = &self.landmarks {
                self.status.advance(graph, &state);
            }
        }
        let h_land = match &self.landmarks {
            Some(graph) => self.status.unchecked_informative(graph),
            None => 0,
        };
        let plan = space.get_mut(id);
        plan.h_land = h_land;
        plan.frontier = Some(state);
    }

    /// Evaluates a plan, storing `h` (and `h_land` through the frontier
    /// computation). The parent's `h` bounds the numeric extraction.
    pub fn evaluate(&mut self, task: &SasTask, space: &mut PlanSpace, id: PlanId) {
        if space[id].frontier.is_none() {
            self.compute_frontier(task, space, id);
        }
        let limit = match space[id].parent {
            Some(p) if space[p].h != INFINITE_H => space[p].h.saturating_add(2),
            _ => 1_000,
        };
        let state = space[id].frontier.clone().expect("frontier computed");
        let h = self.score(task, &state, limit);
        space.get_mut(id).h = h;
    }

    /// Evaluates the root plan (no parent bound on the extraction).
    pub fn evaluate_initial(&mut self, task: &SasTask, space: &mut PlanSpace, id: PlanId) {
        if space[id].frontier.is_none() {
            self.compute_frontier(task, space, id);
        }
        let state = space[id].frontier.clone().expect("frontier computed");
        let h = self.score(task, &state, 1_000);
        space.get_mut(id).h = h;
    }

    fn score(&self, task: &SasTask, state: &State, limit: u32) -> u32 {
        if task.goal_actions.is_empty() {
            return INFINITE_H;
        }
        if self.numeric_mode {
            let graph = numeric_rpg::NumericRpg::build(state, task);
            task.goal_actions
                .iter()
                .map(|g| graph.evaluate(g, limit))
                .min()
                .unwrap_or(INFINITE_H)
        } else {
            let graph = rpg::Rpg::new(state, task, true);
            task.goal_actions
                .iter()
                .map(|g| graph.evaluate(&g.cond_end))
                .min()
                .unwrap_or(INFINITE_H)
        }
    }

    /// The frontier walk also serves the successor generator, which needs the
    /// components of the base plan in the same deterministic order.
    pub fn components(&self) -> &PlanComponents {
        &self.components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::statics::remove_static_variables;
    use crate::grounding::tests::build;
    use crate::intervals::Interval;
    use crate::plan::{Plan, PlanPoint};
    use crate::sas::translator::{translate, TranslateOptions};

    fn task(domain: &str, problem: &str) -> SasTask {
        let mut g = build(domain, problem);
        remove_static_variables(&mut g);
        translate(g, &TranslateOptions::default()).unwrap()
    }

    fn root_plan() -> Plan {
        Plan {
            id: PlanId(0),
            parent: None,
            children: None,
            action: ActionRef::Init,
            fixed_init: true,
            start: PlanPoint::default(),
            end: PlanPoint::default(),
            orderings: Vec::new(),
            updates: Vec::new(),
            duration: Interval::point(0.0),
            control_vars: Vec::new(),
            asserted_cond_effs: Vec::new(),
            g: 0.0,
            h: INFINITE_H,
            h_land: 0,
            repeated: false,
            checked: false,
            invalid: false,
            frontier: None,
        }
    }

    #[test]
    fn goal_in_initial_state_scores_zero() {
        let t = task(
            "(define (domain d) (:predicates (p) (q))
               (:action a :parameters () :precondition (p) :effect (q)))",
            "(define (problem pb) (:domain d) (:init (p)) (:goal (p)))",
        );
        let mut space = PlanSpace::new();
        let root = space.push(root_plan());
        let mut eval = Evaluator::new(&t, 0.001);
        eval.evaluate_initial(&t, &mut space, root);
        assert_eq!(space[root].h, 0);
    }

    #[test]
    fn unreachable_goal_scores_infinite() {
        let t = task(
            "(define (domain d) (:predicates (p) (q) (r))
               (:action a :parameters () :precondition (p) :effect (q)))",
            "(define (problem pb) (:domain d) (:init) (:goal (q)))",
        );
        let mut space = PlanSpace::new();
        let root = space.push(root_plan());
        let mut eval = Evaluator::new(&t, 0.001);
        eval.evaluate_initial(&t, &mut space, root);
        assert_eq!(space[root].h, INFINITE_H);
    }

    #[test]
    fn frontier_replays_effects_in_time_order() {
        let t = task(
            "(define (domain d) (:predicates (p) (q))
               (:action a :parameters () :precondition (p) :effect (q)))",
            "(define (problem pb) (:domain d) (:init (p)) (:goal (q)))",
        );
        let mut space = PlanSpace::new();
        let root = space.push(root_plan());
        // append the single action as a step at time 0
        let action = &t.actions[0];
        let mut step = root_plan();
        step.parent = Some(root);
        step.action = ActionRef::Op(action.index);
        step.start.time = 0.0;
        step.end.time = 0.001;
        let step = space.push(step);
        let mut eval = Evaluator::new(&t, 0.001);
        eval.compute_frontier(&t, &mut space, step);
        let frontier = space[step].frontier.as_ref().unwrap();
        let q = t.variables.iter().position(|v| v.name == "(q)").unwrap();
        assert_eq!(frontier.values[q], 0);
        eval.evaluate(&t, &mut space, step);
        assert_eq!(space[step].h, 0);
    }
}
