//! Partial plans as search nodes.
//!
//! Every plan node appends one action to its parent and stores only the
//! delta: the new causal links, orderings, numeric changes and time bumps.
//! Nodes live in an append-only arena ([`PlanSpace`]) and reference each
//! other by [`PlanId`]; a plan's full contents are reconstructed by walking
//! the parent chain ([`PlanComponents`]).
//!
//! Step `k` of a plan owns two time points: `2k` (start) and `2k + 1` (end).
//! Step 0 is the initial state pseudo-step.

use crate::grounding::NumVarId;
use crate::intervals::{Interval, NumChange};
use crate::sas::{SasAction, SasTask, VarVal};
use crate::state::State;

pub const INFINITE_H: u32 = u32::MAX;

/// Index of a plan node in its [`PlanSpace`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct PlanId(pub u32);

impl From<PlanId> for usize {
    fn from(p: PlanId) -> usize {
        p.0 as usize
    }
}

/// One endpoint of a step: even ids are starts, odd ids are ends.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct TimePoint(pub u32);

impl TimePoint {
    pub fn start_of(step: usize) -> TimePoint {
        TimePoint((step as u32) << 1)
    }
    pub fn end_of(step: usize) -> TimePoint {
        TimePoint(((step as u32) << 1) | 1)
    }
    pub fn step(self) -> usize {
        (self.0 >> 1) as usize
    }
    pub fn is_start(self) -> bool {
        self.0 & 1 == 0
    }
    /// The other endpoint of the same step.
    pub fn partner(self) -> TimePoint {
        TimePoint(self.0 ^ 1)
    }
}

/// Ordering constraint: `earlier` precedes `later`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Ordering {
    pub earlier: TimePoint,
    pub later: TimePoint,
}

/// Causal link: `supporter` establishes `var_val` for the consuming point.
#[derive(Copy, Clone, Debug)]
pub struct CausalLink {
    pub supporter: TimePoint,
    pub var_val: VarVal,
}

#[derive(Copy, Clone, Debug)]
pub struct NumCausalLink {
    pub supporter: TimePoint,
    pub var: NumVarId,
}

/// Time bump propagated into an ancestor step by a child plan.
#[derive(Copy, Clone, Debug)]
pub struct PlanUpdate {
    pub point: TimePoint,
    pub time: f64,
}

/// Which action a plan step executes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ActionRef {
    /// The initial-state pseudo-step (step 0 only).
    Init,
    Op(usize),
    Til(usize),
    Goal(usize),
}

impl SasTask {
    /// The action behind a step reference; `Init` has no action record.
    pub fn action(&self, r: ActionRef) -> Option<&SasAction> {
        match r {
            ActionRef::Init => None,
            ActionRef::Op(i) => Some(&self.actions[i]),
            ActionRef::Til(i) => Some(&self.til_actions[i]),
            ActionRef::Goal(i) => Some(&self.goal_actions[i]),
        }
    }
}

/// Data attached to one endpoint of the new step.
#[derive(Clone, Debug, Default)]
pub struct PlanPoint {
    /// Time scheduled when the step was added.
    pub time: f64,
    /// Causal links supporting this point, in condition order (at-start then
    /// over-all on the start point, at-end on the end point).
    pub causal_links: Vec<CausalLink>,
    pub num_causal_links: Vec<NumCausalLink>,
    /// Numeric variable values produced at this point.
    pub num_changes: Vec<NumChange>,
}

/// A search node: the parent plan extended with one action.
#[derive(Clone, Debug)]
pub struct Plan {
    pub id: PlanId,
    pub parent: Option<PlanId>,
    /// Filled by the search when the node is expanded.
    pub children: Option<Vec<PlanId>>,
    pub action: ActionRef,
    /// True when the step cannot be delayed (initial state, TILs).
    pub fixed_init: bool,
    pub start: PlanPoint,
    pub end: PlanPoint,
    /// New orderings contributed by this step.
    pub orderings: Vec<Ordering>,
    /// Time bumps this step forces onto ancestor steps.
    pub updates: Vec<PlanUpdate>,
    pub duration: Interval,
    pub control_vars: Vec<Interval>,
    /// Conditional effects of the action asserted to trigger, by index.
    pub asserted_cond_effs: Vec<usize>,
    pub g: f64,
    pub h: u32,
    pub h_land: u32,
    pub repeated: bool,
    /// The validator confirmed (or still has to see) this node.
    pub checked: bool,
    pub invalid: bool,
    /// Cached frontier state, filled by the evaluator.
    pub frontier: Option<State>,
}

impl Plan {
    pub fn is_root(&self) -> bool {
        self.parent.is_none() || matches!(self.action, ActionRef::Til(_))
    }

    pub fn is_solution(&self) -> bool {
        matches!(self.action, ActionRef::Goal(_))
    }

    /// Number of unchecked ancestors between this node and the last
    /// validator-confirmed one.
    pub fn check_distance(&self, space: &PlanSpace) -> usize {
        if self.checked || self.parent.is_none() {
            return 0;
        }
        1 + space[self.parent.unwrap()].check_distance(space)
    }
}

/// Append-only arena of plan nodes. The search queue and all parent/child
/// references hold [`PlanId`]s into this arena.
#[derive(Default)]
pub struct PlanSpace {
    plans: Vec<Plan>,
}

impl PlanSpace {
    pub fn new() -> PlanSpace {
        PlanSpace::default()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn push(&mut self, mut plan: Plan) -> PlanId {
        let id = PlanId(self.plans.len() as u32);
        plan.id = id;
        self.plans.push(plan);
        id
    }

    pub fn get_mut(&mut self, id: PlanId) -> &mut Plan {
        &mut self.plans[usize::from(id)]
    }
}

impl std::ops::Index<PlanId> for PlanSpace {
    type Output = Plan;
    fn index(&self, id: PlanId) -> &Plan {
        &self.plans[usize::from(id)]
    }
}

/// The steps of a plan from the root to the node, with their effective
/// times after applying every descendant's updates. Owning the times here
/// keeps the arena immutable while several branches are explored.
#[derive(Default)]
pub struct PlanComponents {
    pub steps: Vec<PlanId>,
    pub start_times: Vec<f64>,
    pub end_times: Vec<f64>,
}

impl PlanComponents {
    pub fn calculate(&mut self, space: &PlanSpace, base: PlanId) {
        self.steps.clear();
        self.start_times.clear();
        self.end_times.clear();
        let mut chain = Vec::new();
        let mut cursor = Some(base);
        while let Some(id) = cursor {
            chain.push(id);
            cursor = space[id].parent;
        }
        chain.reverse();
        for &id in &chain {
            let p = &space[id];
            self.steps.push(id);
            self.start_times.push(p.start.time);
            self.end_times.push(p.end.time);
            for u in &p.updates {
                let step = u.point.step();
                if u.point.is_start() {
                    self.start_times[step] = u.time;
                } else {
                    self.end_times[step] = u.time;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn time_of(&self, p: TimePoint) -> f64 {
        if p.is_start() {
            self.start_times[p.step()]
        } else {
            self.end_times[p.step()]
        }
    }

    /// The latest end time of any real action step.
    pub fn makespan(&self, space: &PlanSpace) -> f64 {
        let mut m: f64 = 0.0;
        for (i, &id) in self.steps.iter().enumerate() {
            if matches!(space[id].action, ActionRef::Op(_)) {
                m = m.max(self.end_times[i]);
            }
        }
        m
    }

    /// Every time point ordered by effective time, index-ordered on ties.
    /// The stable tie-break makes linearization (and everything derived from
    /// it) deterministic.
    pub fn linearize(&self) -> Vec<TimePoint> {
        let mut points: Vec<TimePoint> = (0..self.len() * 2).map(|i| TimePoint(i as u32)).collect();
        points.sort_by(|&a, &b| {
            self.time_of(a)
                .partial_cmp(&self.time_of(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_plan(parent: Option<PlanId>, start: f64, end: f64) -> Plan {
        Plan {
            id: PlanId(0),
            parent,
            children: None,
            action: ActionRef::Init,
            fixed_init: false,
            start: PlanPoint {
                time: start,
                ..Default::default()
            },
            end: PlanPoint {
                time: end,
                ..Default::default()
            },
            orderings: Vec::new(),
            updates: Vec::new(),
            duration: Interval::point(end - start),
            control_vars: Vec::new(),
            asserted_cond_effs: Vec::new(),
            g: 0.0,
            h: 0,
            h_land: 0,
            repeated: false,
            checked: false,
            invalid: false,
            frontier: None,
        }
    }

    #[test]
    fn time_points_pack_step_and_side() {
        let s = TimePoint::start_of(3);
        let e = TimePoint::end_of(3);
        assert_eq!(s.step(), 3);
        assert!(s.is_start());
        assert!(!e.is_start());
        assert_eq!(s.partner(), e);
        assert_eq!(e.partner(), s);
    }

    #[test]
    fn updates_rewrite_ancestor_times() {
        let mut space = PlanSpace::new();
        let root = space.push(dummy_plan(None, 0.0, 0.0));
        let a = space.push(dummy_plan(Some(root), 0.0, 2.0));
        let mut b = dummy_plan(Some(a), 2.0, 4.0);
        // the new step delays its parent's end point
        b.updates.push(PlanUpdate {
            point: TimePoint::end_of(1),
            time: 3.0,
        });
        let b = space.push(b);

        let mut comps = PlanComponents::default();
        comps.calculate(&space, b);
        assert_eq!(comps.len(), 3);
        assert_eq!(comps.end_times[1], 3.0);
        // the parent alone is unaffected
        comps.calculate(&space, a);
        assert_eq!(comps.end_times[1], 2.0);
    }

    #[test]
    fn linearization_is_deterministic_on_ties() {
        let mut space = PlanSpace::new();
        let root = space.push(dummy_plan(None, 0.0, 0.0));
        let a = space.push(dummy_plan(Some(root), 0.0, 1.0));
        let b = space.push(dummy_plan(Some(a), 0.0, 1.0));
        let mut comps = PlanComponents::default();
        comps.calculate(&space, b);
        let order = comps.linearize();
        // equal times resolve by time-point index
        assert_eq!(
            order,
            vec![
                TimePoint(0),
                TimePoint(1),
                TimePoint(2),
                TimePoint(4),
                TimePoint(3),
                TimePoint(5)
            ]
        );
    }
}
