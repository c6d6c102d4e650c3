//! Successor generation: extend a base plan by one applicable action.
//!
//! For every candidate action the generator picks causal supporters for each
//! condition from the base plan's effect index, adds the matching orderings,
//! resolves threats by demotion or promotion, schedules the new step and
//! propagates any delay it forces onto earlier steps, evaluates the numeric
//! obligations over intervals, and finally scores the child with the
//! heuristic evaluator. Children reaching an already-expanded state at no
//! better `g` are filtered out.

use smallvec::SmallVec;
use std::collections::HashMap;
use tempo_planning::grounding::NumVarId;
use tempo_planning::heuristics::Evaluator;
use tempo_planning::intervals::{ActionIntervals, Interval, NumChange};
use tempo_planning::plan::{
    ActionRef, CausalLink, NumCausalLink, Ordering, Plan, PlanComponents, PlanId, PlanPoint,
    PlanSpace, PlanUpdate, TimePoint, INFINITE_H,
};
use tempo_planning::sas::{SasAction, SasCondition, SasTask, VarVal};
use tempo_planning::state::State;
use tempo_planning::Config;

/// Cap on the conditional-effect branching of one action.
const MAX_TRISTATE_EFFECTS: usize = 4;

/// A write of `value` into `var` at `point`, collected from the base plan.
#[derive(Copy, Clone, Debug)]
struct Writer {
    point: TimePoint,
    val: u16,
}

/// A causal link under construction, remembering up to which point the
/// supported value must be protected (the end point for over-all conditions).
#[derive(Copy, Clone, Debug)]
struct NewLink {
    supporter: TimePoint,
    consumer: TimePoint,
    var_val: VarVal,
    protected_until: TimePoint,
}

/// A threat on a causal link, resolved by promotion or demotion.
#[derive(Copy, Clone, Debug)]
struct Threat {
    producer: TimePoint,
    protected_until: TimePoint,
    threatening: TimePoint,
}

pub struct Successors<'t> {
    task: &'t SasTask,
    config: Config,
    pub evaluator: Evaluator,
    filter_repeated: bool,
    /// Fingerprint of every expanded frontier state, with its best `g`.
    memo: HashMap<(u64, u64), f64>,
    /// Goal child found during the last expansion.
    pub solution: Option<PlanId>,
    components: PlanComponents,
    /// Strict precedence closure between the base plan's time points.
    matrix: Vec<Vec<bool>>,
    /// Direct ordering edges of the base plan (closure source).
    edges: Vec<Vec<TimePoint>>,
    /// Whether each base step is time-fixed (initial state, TILs).
    fixed_step: Vec<bool>,
    /// Latest producer per `(var, val)`.
    effect_index: Vec<Vec<Option<TimePoint>>>,
    /// All writers per variable, in linearization order.
    writers: Vec<Vec<Writer>>,
    /// Latest writer per numeric variable.
    num_writers: Vec<TimePoint>,
    /// Existing causal links of the base plan (consumer step granularity).
    base_links: Vec<NewLink>,
    base_num_links: Vec<(TimePoint, TimePoint, NumVarId)>,
}

impl<'t> Successors<'t> {
    pub fn new(task: &'t SasTask, config: Config, filter_repeated: bool) -> Successors<'t> {
        Successors {
            task,
            config,
            evaluator: Evaluator::new(task, config.epsilon),
            filter_repeated,
            memo: HashMap::new(),
            solution: None,
            components: PlanComponents::default(),
            matrix: Vec::new(),
            edges: Vec::new(),
            fixed_step: Vec::new(),
            effect_index: Vec::new(),
            writers: Vec::new(),
            num_writers: Vec::new(),
            base_links: Vec::new(),
            base_num_links: Vec::new(),
        }
    }

    /// Records an expanded plan's frontier in the repeated-state memo.
    /// Returns true when an equivalent state was already expanded at no
    /// greater `g`.
    pub fn repeated_state(&mut self, space: &PlanSpace, id: PlanId) -> bool {
        if !self.filter_repeated {
            return false;
        }
        let plan = &space[id];
        let Some(frontier) = &plan.frontier else {
            return false;
        };
        let key = frontier.fingerprint();
        match self.memo.get(&key) {
            Some(&g) if g <= plan.g => true,
            _ => {
                self.memo.insert(key, plan.g);
                false
            }
        }
    }

    pub fn clear_memo(&mut self) {
        self.memo.clear();
    }

    /// Expands `base`: returns every acceptable child, setting `solution`
    /// when a goal child appears.
    pub fn compute_successors(
        &mut self,
        space: &mut PlanSpace,
        base: PlanId,
        best_makespan: f64,
    ) -> Vec<PlanId> {
        self.solution = None;
        self.prepare(space, base);
        let frontier = space[base]
            .frontier
            .clone()
            .expect("base plan evaluated before expansion");

        let mut children = Vec::new();
        let candidates: Vec<ActionRef> = (0..self.task.actions.len())
            .map(ActionRef::Op)
            .chain((0..self.task.goal_actions.len()).map(ActionRef::Goal))
            .collect();
        for candidate in candidates {
            let action = self.task.action(candidate).unwrap();
            if !self.boolean_conditions_supported(action) {
                continue;
            }
            // conditional effects: assert the ones that must fire, branch on
            // the undecided ones
            let tri = self.tristate_cond_effects(action, &frontier);
            if tri.is_none() {
                continue;
            }
            let (always, maybe) = tri.unwrap();
            for assertion in branchings(&always, &maybe) {
                if let Some(child) =
                    self.try_append(space, base, candidate, &assertion, &frontier, best_makespan)
                {
                    if space[child].is_solution() && self.solution.is_none() {
                        self.solution = Some(child);
                    }
                    children.push(child);
                }
            }
        }
        children
    }

    /// Rebuilds the per-base-plan indexes: components, ordering closure,
    /// effect index, writers and existing causal links.
    fn prepare(&mut self, space: &PlanSpace, base: PlanId) {
        self.components.calculate(space, base);
        let n = self.components.len() * 2;
        self.fixed_step = self
            .components
            .steps
            .iter()
            .map(|&id| space[id].fixed_init)
            .collect();

        self.edges = vec![Vec::new(); n];
        for (step, &id) in self.components.steps.iter().enumerate() {
            let plan = &space[id];
            if step > 0 {
                self.edges[TimePoint::start_of(step).0 as usize].push(TimePoint::end_of(step));
            }
            for o in &plan.orderings {
                self.edges[o.earlier.0 as usize].push(o.later);
            }
            for (point, links) in [
                (TimePoint::start_of(step), &plan.start.causal_links),
                (TimePoint::end_of(step), &plan.end.causal_links),
            ] {
                for l in links {
                    self.edges[l.supporter.0 as usize].push(point);
                }
            }
        }
        // strict precedence closure by DFS from every point
        self.matrix = vec![vec![false; n]; n];
        for p in 0..n {
            let mut stack: Vec<usize> = self.edges[p].iter().map(|t| t.0 as usize).collect();
            while let Some(q) = stack.pop() {
                if !self.matrix[p][q] {
                    self.matrix[p][q] = true;
                    stack.extend(self.edges[q].iter().map(|t| t.0 as usize));
                }
            }
        }

        // effect index and writers, in linearization order
        self.effect_index = self
            .task
            .variables
            .iter()
            .map(|v| vec![None; v.values.len()])
            .collect();
        self.writers = vec![Vec::new(); self.task.num_vars()];
        self.num_writers = vec![TimePoint::end_of(0); self.task.num_num_vars()];
        for point in self.components.linearize() {
            let step = point.step();
            let id = self.components.steps[step];
            let plan = &space[id];
            if step == 0 {
                // the initial pseudo-step establishes the whole initial state
                if !point.is_start() {
                    for (var, &val) in self.task.initial_state.iter().enumerate() {
                        self.effect_index[var][val as usize] = Some(point);
                        self.writers[var].push(Writer { point, val });
                    }
                }
                continue;
            }
            let Some(action) = self.task.action(plan.action) else {
                continue;
            };
            let effs: Vec<SasCondition> =
                collect_new_effects(action, &plan.asserted_cond_effs, point.is_start());
            for e in effs {
                self.effect_index[usize::from(e.var)][e.val as usize] = Some(point);
                self.writers[usize::from(e.var)].push(Writer { point, val: e.val });
            }
            let changes = if point.is_start() {
                &plan.start.num_changes
            } else {
                &plan.end.num_changes
            };
            for ch in changes {
                self.num_writers[usize::from(ch.var)] = point;
            }
        }

        // existing causal links, for threats caused by the new action
        self.base_links.clear();
        self.base_num_links.clear();
        for (step, &id) in self.components.steps.iter().enumerate().skip(1) {
            let plan = &space[id];
            for (point, pp) in [
                (TimePoint::start_of(step), &plan.start),
                (TimePoint::end_of(step), &plan.end),
            ] {
                for l in &pp.causal_links {
                    self.base_links.push(NewLink {
                        supporter: l.supporter,
                        consumer: point,
                        var_val: l.var_val,
                        // over-all links live on the start point but protect
                        // the whole execution
                        protected_until: if point.is_start() {
                            TimePoint::end_of(step)
                        } else {
                            point
                        },
                    });
                }
                for l in &pp.num_causal_links {
                    self.base_num_links.push((l.supporter, point, l.var));
                }
            }
        }
    }

    /// Proven strict precedence; points of the step under construction have
    /// no proven orderings yet.
    fn ordered(&self, a: TimePoint, b: TimePoint) -> bool {
        let n = self.matrix.len();
        let (a, b) = (a.0 as usize, b.0 as usize);
        a < n && b < n && self.matrix[a][b]
    }

    fn supported(&self, c: &SasCondition) -> bool {
        self.effect_index[usize::from(c.var)][c.val as usize].is_some()
    }

    fn boolean_conditions_supported(&self, action: &SasAction) -> bool {
        let self_supported = |c: &SasCondition| {
            action
                .eff_start
                .iter()
                .any(|e| e.var == c.var && e.val == c.val)
        };
        action
            .cond_start
            .iter()
            .chain(action.cond_over_all.iter())
            .all(|c| self.supported(c))
            && action
                .cond_end
                .iter()
                .all(|c| self.supported(c) || self_supported(c))
    }

    /// Splits the action's conditional effects into the always-firing set and
    /// the undecided set; `None` rejects the action (never used currently,
    /// kept for the numeric-never case).
    #[allow(clippy::type_complexity)]
    fn tristate_cond_effects(
        &self,
        action: &SasAction,
        frontier: &State,
    ) -> Option<(Vec<usize>, Vec<usize>)> {
        let mut always = Vec::new();
        let mut maybe = Vec::new();
        for (i, ce) in action.conditional.iter().enumerate() {
            let bools_hold = frontier.holds_all(&ce.cond_start) && frontier.holds_all(&ce.cond_end);
            let bools_supportable = ce
                .cond_start
                .iter()
                .chain(ce.cond_end.iter())
                .all(|c| self.supported(c));
            let mut calc = ActionIntervals::new(action, frontier, self.task.num_num_vars());
            let num_necessary = ce
                .num_cond_start
                .iter()
                .chain(ce.num_cond_end.iter())
                .all(|c| calc.necessarily(c));
            let num_satisfiable = calc.all_satisfiable(&ce.num_cond_start)
                && calc.all_satisfiable(&ce.num_cond_end);
            if bools_hold && num_necessary {
                always.push(i);
            } else if bools_supportable && num_satisfiable {
                if maybe.len() >= MAX_TRISTATE_EFFECTS {
                    continue; // treated as never-firing past the cap
                }
                maybe.push(i);
            }
        }
        Some((always, maybe))
    }

    /// Attempts to append `candidate` with the given conditional-effect
    /// assertion; returns the child id on success.
    fn try_append(
        &mut self,
        space: &mut PlanSpace,
        base: PlanId,
        candidate: ActionRef,
        asserted: &[usize],
        frontier: &State,
        best_makespan: f64,
    ) -> Option<PlanId> {
        let action = self.task.action(candidate).unwrap();
        let new_step = self.components.len();
        let start = TimePoint::start_of(new_step);
        let end = TimePoint::end_of(new_step);

        // numeric obligations against the frontier state
        let mut calc = ActionIntervals::new(action, frontier, self.task.num_num_vars());
        if calc.duration.is_empty()
            || calc.control_vars.iter().any(|cv| cv.is_empty())
            || !calc.all_satisfiable(&action.num_cond_start)
            || !calc.all_satisfiable(&action.num_cond_over_all)
            || !calc.all_satisfiable(&action.num_cond_end)
        {
            return None;
        }
        for &i in asserted {
            let ce = &action.conditional[i];
            if !calc.all_satisfiable(&ce.num_cond_start) || !calc.all_satisfiable(&ce.num_cond_end)
            {
                return None;
            }
        }

        // causal links for every boolean condition, in condition order
        let mut start_links: Vec<NewLink> = Vec::new();
        let mut end_links: Vec<NewLink> = Vec::new();
        for c in &action.cond_start {
            start_links.push(self.link_for(c, start, start)?);
        }
        for c in &action.cond_over_all {
            start_links.push(self.link_for(c, start, end)?);
        }
        for c in &action.cond_end {
            match self.link_for(c, end, end) {
                Some(l) => end_links.push(l),
                None => {
                    // self-support by the action's own start effect
                    let own = action
                        .eff_start
                        .iter()
                        .any(|e| e.var == c.var && e.val == c.val);
                    if own {
                        end_links.push(NewLink {
                            supporter: start,
                            consumer: end,
                            var_val: c.var_val(),
                            protected_until: end,
                        });
                    } else {
                        return None;
                    }
                }
            }
        }
        for &i in asserted {
            let ce = &action.conditional[i];
            for c in &ce.cond_start {
                start_links.push(self.link_for(c, start, start)?);
            }
            for c in &ce.cond_end {
                end_links.push(self.link_for(c, end, end)?);
            }
        }

        // numeric causal links: the latest writer of each referenced variable
        let push_num_links = |conds: &[tempo_planning::grounding::GroundNumCond],
                              links: &mut Vec<NumCausalLink>| {
            for c in conds {
                let mut vars = Vec::new();
                collect_num_vars(&c.left, &mut vars);
                collect_num_vars(&c.right, &mut vars);
                for v in vars {
                    if links.iter().all(|l| l.var != v) {
                        links.push(NumCausalLink {
                            supporter: self.num_writers[usize::from(v)],
                            var: v,
                        });
                    }
                }
            }
        };
        let mut num_links_start: Vec<NumCausalLink> = Vec::new();
        let mut num_links_end: Vec<NumCausalLink> = Vec::new();
        push_num_links(&action.num_cond_start, &mut num_links_start);
        push_num_links(&action.num_cond_over_all, &mut num_links_start);
        push_num_links(&action.num_cond_end, &mut num_links_end);

        // orderings implied by the new links
        let mut new_orderings: Vec<Ordering> = Vec::new();
        let mut add_order = |o: &mut Vec<Ordering>, earlier: TimePoint, later: TimePoint| {
            if earlier != later
                && !o.iter().any(|x| x.earlier == earlier && x.later == later)
            {
                o.push(Ordering { earlier, later });
            }
        };
        for l in start_links.iter().chain(end_links.iter()) {
            add_order(&mut new_orderings, l.supporter, l.consumer);
        }
        for l in num_links_start.iter() {
            add_order(&mut new_orderings, l.supporter, start);
        }
        for l in num_links_end.iter() {
            add_order(&mut new_orderings, l.supporter, end);
        }

        // threat resolution
        let new_effs_start = collect_new_effects(action, asserted, true);
        let new_effs_end = collect_new_effects(action, asserted, false);
        let mut threats = self.collect_threats(
            &start_links,
            &end_links,
            &new_effs_start,
            &new_effs_end,
            start,
            end,
        );
        // a new write of a numerically supported variable between the
        // supporter and its consumer invalidates the interval
        let num_writes = |at_start: bool| -> Vec<NumVarId> {
            let mut vars: Vec<NumVarId> = Vec::new();
            let buckets = std::iter::once(if at_start {
                &action.num_eff_start
            } else {
                &action.num_eff_end
            })
            .chain(asserted.iter().map(|&i| {
                if at_start {
                    &action.conditional[i].num_eff_start
                } else {
                    &action.conditional[i].num_eff_end
                }
            }));
            for b in buckets {
                for e in b.iter() {
                    if !vars.contains(&e.var) {
                        vars.push(e.var);
                    }
                }
            }
            vars
        };
        for (writes, point) in [(num_writes(true), start), (num_writes(false), end)] {
            for &(sup, consumer, var) in &self.base_num_links {
                if writes.contains(&var) {
                    threats.push(Threat {
                        producer: sup,
                        protected_until: consumer,
                        threatening: point,
                    });
                }
            }
        }
        for t in threats {
            if !self.resolve_threat(&t, &mut new_orderings) {
                return None;
            }
        }
        if self.contradictory_effects(action, &new_effs_start, &new_effs_end, calc.duration) {
            return None;
        }

        // schedule the new step and propagate delays
        let (start_time, end_time, updates) = self.schedule(
            space,
            &start_links,
            &end_links,
            &num_links_start,
            &num_links_end,
            &new_orderings,
            &calc,
            start,
            end,
        )?;
        if start_time >= best_makespan {
            return None;
        }

        // numeric changes of both points
        let mut start_changes: Vec<NumChange> = Vec::new();
        let mut end_changes: Vec<NumChange> = Vec::new();
        calc.apply_effects(&action.num_eff_start, false, &mut start_changes);
        for &i in asserted {
            calc.apply_effects(&action.conditional[i].num_eff_start, false, &mut start_changes);
        }
        calc.apply_effects(&action.num_eff_end, true, &mut end_changes);
        for &i in asserted {
            calc.apply_effects(&action.conditional[i].num_eff_end, true, &mut end_changes);
        }

        let cost = action.cost.unwrap_or(1.0);
        let parent_g = space[base].g;
        let child = Plan {
            id: PlanId(0),
            parent: Some(base),
            children: None,
            action: candidate,
            fixed_init: false,
            start: PlanPoint {
                time: start_time,
                causal_links: start_links
                    .iter()
                    .map(|l| CausalLink {
                        supporter: l.supporter,
                        var_val: l.var_val,
                    })
                    .collect(),
                num_causal_links: num_links_start,
                num_changes: start_changes,
            },
            end: PlanPoint {
                time: end_time,
                causal_links: end_links
                    .iter()
                    .map(|l| CausalLink {
                        supporter: l.supporter,
                        var_val: l.var_val,
                    })
                    .collect(),
                num_causal_links: num_links_end,
                num_changes: end_changes,
            },
            orderings: new_orderings,
            updates,
            duration: calc.duration,
            control_vars: calc.control_vars.clone(),
            asserted_cond_effs: asserted.to_vec(),
            g: parent_g + cost,
            h: INFINITE_H,
            h_land: 0,
            repeated: false,
            checked: false,
            invalid: false,
            frontier: None,
        };
        let id = space.push(child);
        self.evaluator.evaluate(self.task, space, id);
        if space[id].h == INFINITE_H && !space[id].is_solution() {
            return None;
        }
        if self.filter_repeated && !space[id].is_solution() {
            let key = space[id].frontier.as_ref().unwrap().fingerprint();
            if let Some(&g) = self.memo.get(&key) {
                if g <= space[id].g {
                    space.get_mut(id).repeated = true;
                    return None;
                }
            }
        }
        Some(id)
    }

    /// Picks the current supporter of a condition and builds the link.
    fn link_for(
        &self,
        c: &SasCondition,
        consumer: TimePoint,
        protected_until: TimePoint,
    ) -> Option<NewLink> {
        let supporter = self.effect_index[usize::from(c.var)][c.val as usize]?;
        Some(NewLink {
            supporter,
            consumer,
            var_val: c.var_val(),
            protected_until,
        })
    }

    /// Threats between (a) base-plan writers and the new links, and (b) the
    /// new action's effects and the base-plan links.
    fn collect_threats(
        &self,
        start_links: &[NewLink],
        end_links: &[NewLink],
        new_effs_start: &[SasCondition],
        new_effs_end: &[SasCondition],
        start: TimePoint,
        end: TimePoint,
    ) -> Vec<Threat> {
        let mut threats = Vec::new();
        for link in start_links.iter().chain(end_links.iter()) {
            let var = usize::from(link.var_val.var());
            for w in &self.writers[var] {
                if w.val == link.var_val.val() || w.point == link.supporter {
                    continue;
                }
                if self.ordered(w.point, link.supporter) {
                    continue; // already before the producer
                }
                threats.push(Threat {
                    producer: link.supporter,
                    protected_until: link.protected_until,
                    threatening: w.point,
                });
            }
        }
        for link in &self.base_links {
            let var = link.var_val.var();
            for (effs, point) in [(new_effs_start, start), (new_effs_end, end)] {
                for e in effs {
                    if e.var == var && e.val != link.var_val.val() {
                        threats.push(Threat {
                            producer: link.supporter,
                            protected_until: link.protected_until,
                            threatening: point,
                        });
                    }
                }
            }
        }
        threats
    }

    /// Places the threat before the producer or after the protected interval.
    /// When the threat is the step under construction, demotion (after the
    /// interval) is tried first; an existing threat prefers promotion, which
    /// delays nothing. TIL-imposed orderings veto the inconsistent direction.
    fn resolve_threat(&self, t: &Threat, orderings: &mut Vec<Ordering>) -> bool {
        let threat_is_new = t.threatening.step() >= self.components.len();
        let promotion = (t.threatening, t.producer);
        let demotion = (t.protected_until, t.threatening);
        let attempts = if threat_is_new {
            [demotion, promotion]
        } else {
            [promotion, demotion]
        };
        for (earlier, later) in attempts {
            if self.ordered(later, earlier) || !self.til_order_valid(earlier, later) {
                continue;
            }
            if self.ordered(earlier, later) {
                return true; // already implied
            }
            orderings.push(Ordering { earlier, later });
            return true;
        }
        false
    }

    /// An ordering whose later point is time-fixed is only consistent when
    /// the earlier point can be scheduled no later. The step under
    /// construction is accepted optimistically, the scheduler rejects an
    /// impossible bump afterwards.
    fn til_order_valid(&self, earlier: TimePoint, later: TimePoint) -> bool {
        let Some(b) = self.fixed_time(later) else {
            return true;
        };
        if earlier.step() >= self.components.len() {
            return true;
        }
        self.components.time_of(earlier) <= b
    }

    fn fixed_time(&self, p: TimePoint) -> Option<f64> {
        if p.step() >= self.components.len() || !self.fixed_step[p.step()] {
            None
        } else {
            Some(self.components.time_of(p))
        }
    }

    /// Two different writes of the same variable forced into the same instant
    /// reject the successor: conflicting writes within one point, or start
    /// and end writes of a step whose duration window is pinned to zero.
    fn contradictory_effects(
        &self,
        action: &SasAction,
        new_effs_start: &[SasCondition],
        new_effs_end: &[SasCondition],
        duration: Interval,
    ) -> bool {
        let conflict = |effs: &[SasCondition]| {
            effs.iter().enumerate().any(|(i, a)| {
                effs[i + 1..]
                    .iter()
                    .any(|b| a.var == b.var && a.val != b.val)
            })
        };
        if conflict(new_effs_start) || conflict(new_effs_end) {
            return true;
        }
        if !action.is_instantaneous() && duration.max <= 0.0 {
            return new_effs_start.iter().any(|a| {
                new_effs_end
                    .iter()
                    .any(|b| a.var == b.var && a.val != b.val)
            });
        }
        false
    }

    /// Earliest schedule for the new step: the maxima of supporter times plus
    /// a separation (zero from fixed supporters, ε otherwise), the duration
    /// window, and the delays pushed onto existing steps by demotions.
    #[allow(clippy::too_many_arguments)]
    fn schedule(
        &self,
        space: &PlanSpace,
        start_links: &[NewLink],
        end_links: &[NewLink],
        num_links_start: &[NumCausalLink],
        num_links_end: &[NumCausalLink],
        orderings: &[Ordering],
        calc: &ActionIntervals,
        start: TimePoint,
        end: TimePoint,
    ) -> Option<(f64, f64, Vec<PlanUpdate>)> {
        let eps = self.config.epsilon;
        let sep = |p: TimePoint| -> f64 {
            if self.is_fixed_step(space, p) {
                0.0
            } else {
                eps
            }
        };
        let mut start_time: f64 = 0.0;
        let mut end_lb: f64 = 0.0;
        for l in start_links {
            start_time = start_time.max(self.components.time_of(l.supporter) + sep(l.supporter));
        }
        for l in num_links_start {
            start_time =
                start_time.max(self.components.time_of(l.supporter) + sep(l.supporter));
        }
        for l in end_links.iter() {
            if l.supporter != start {
                end_lb = end_lb.max(self.components.time_of(l.supporter) + sep(l.supporter));
            }
        }
        for l in num_links_end {
            end_lb = end_lb.max(self.components.time_of(l.supporter) + sep(l.supporter));
        }
        // demotions and promotions may also point into the new step
        for o in orderings {
            if o.earlier.step() >= self.components.len() {
                continue;
            }
            let bound = self.components.time_of(o.earlier) + sep(o.earlier);
            if o.later == start {
                start_time = start_time.max(bound);
            } else if o.later == end {
                end_lb = end_lb.max(bound);
            }
        }
        let duration = if calc.duration.min.is_finite() {
            calc.duration.min.max(0.0)
        } else {
            0.0
        };
        let duration = if duration == 0.0 { eps } else { duration };
        let end_time = (start_time + duration).max(end_lb);
        let start_time = end_time - duration; // keep the window tight

        // demotions may delay existing steps: propagate bumps forward
        let mut updates: Vec<PlanUpdate> = Vec::new();
        let mut times: Vec<f64> = (0..self.components.len() * 2)
            .map(|i| self.components.time_of(TimePoint(i as u32)))
            .collect();
        let time_of_new = |p: TimePoint| if p == start { start_time } else { end_time };
        let mut queue: Vec<(TimePoint, f64)> = Vec::new();
        for o in orderings {
            if o.earlier == start || o.earlier == end {
                if o.later != start && o.later != end {
                    queue.push((o.later, time_of_new(o.earlier) + eps));
                }
            }
        }
        while let Some((p, t)) = queue.pop() {
            let idx = p.0 as usize;
            if times[idx] >= t {
                continue;
            }
            if self.is_fixed_step(space, p) {
                return None; // cannot delay the initial state or a TIL
            }
            times[idx] = t;
            updates.push(PlanUpdate { point: p, time: t });
            // a delayed start drags the end along, keeping the step duration
            if p.is_start() {
                let partner = p.partner();
                let dur = self.components.time_of(partner) - self.components.time_of(p);
                queue.push((partner, t + dur.max(0.0)));
            }
            for succ in &self.edges[idx] {
                queue.push((*succ, t + eps));
            }
        }
        Some((start_time, end_time, updates))
    }

    fn is_fixed_step(&self, _space: &PlanSpace, p: TimePoint) -> bool {
        p.step() < self.components.len() && self.fixed_step[p.step()]
    }
}

/// Effects of one point, including the asserted conditional effects.
fn collect_new_effects(action: &SasAction, asserted: &[usize], at_start: bool) -> Vec<SasCondition> {
    let mut out: Vec<SasCondition> = if at_start {
        action.eff_start.clone()
    } else {
        action.eff_end.clone()
    };
    for &i in asserted {
        let ce = &action.conditional[i];
        let bucket = if at_start { &ce.eff_start } else { &ce.eff_end };
        out.extend(bucket.iter().copied());
    }
    out
}

fn collect_num_vars(e: &tempo_planning::grounding::GroundNumExpr, out: &mut Vec<NumVarId>) {
    use tempo_planning::grounding::GroundNumExpr::*;
    match e {
        Var(v) => {
            if !out.contains(v) {
                out.push(*v);
            }
        }
        Add(a, b) | Sub(a, b) | Mul(a, b) | Div(a, b) => {
            collect_num_vars(a, out);
            collect_num_vars(b, out);
        }
        _ => {}
    }
}

/// Enumerates the conditional-effect assertions to branch on: the always-set
/// plus every subset of the undecided set.
fn branchings(always: &[usize], maybe: &[usize]) -> Vec<SmallVec<[usize; 4]>> {
    let mut out = Vec::with_capacity(1 << maybe.len());
    for mask in 0..(1u32 << maybe.len()) {
        let mut set: SmallVec<[usize; 4]> = SmallVec::from_slice(always);
        for (i, &m) in maybe.iter().enumerate() {
            if mask & (1 << i) != 0 {
                set.push(m);
            }
        }
        set.sort_unstable();
        out.push(set);
    }
    out
}
