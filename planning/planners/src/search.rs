//! Best-first partial-order search with anytime makespan improvement.
//!
//! Plans are ranked by `g + 2h`, or `g + h + 2·hLand` when the landmark
//! graph is informative. A plan whose action carries numeric conditions or
//! conditional effects is handed to the validator before expansion once its
//! heuristic value drops to the configured threshold; rejected nodes are
//! marked invalid together with their descendants, and their parents get
//! re-validated. The outer driver repeats the search under a shrinking
//! makespan bound and reports every improving solution.

use crate::fmt;
use crate::successors::Successors;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;
use tempo_planning::grounding::GroundMetricExpr;
use tempo_planning::intervals::Interval;
use tempo_planning::plan::{
    ActionRef, Ordering, Plan, PlanComponents, PlanId, PlanPoint, PlanSpace, TimePoint, INFINITE_H,
};
use tempo_planning::sas::SasTask;
use tempo_planning::state::State;
use tempo_planning::Config;
use tempo_validator::{
    AssignKind, Assignment, Cmp, Condition, ControlVarSpec, Event, StnValidator, Term,
    ValidationRequest, Validator,
};

/// Queue entry: smaller score first, stable id tie-break.
struct Entry {
    score: f64,
    id: PlanId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}
impl Eq for Entry {}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(self.id.cmp(&other.id))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct SearchQueue {
    heap: BinaryHeap<Reverse<Entry>>,
    use_landmarks: bool,
}

impl SearchQueue {
    pub fn new(use_landmarks: bool) -> SearchQueue {
        SearchQueue {
            heap: BinaryHeap::with_capacity(8192),
            use_landmarks,
        }
    }

    fn score(&self, p: &Plan) -> f64 {
        if self.use_landmarks {
            p.g + p.h as f64 + 2.0 * p.h_land as f64
        } else {
            p.g + 2.0 * p.h as f64
        }
    }

    pub fn add(&mut self, space: &PlanSpace, id: PlanId) {
        let score = self.score(&space[id]);
        self.heap.push(Reverse(Entry { score, id }));
    }

    pub fn poll(&mut self) -> Option<PlanId> {
        self.heap.pop().map(|Reverse(e)| e.id)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

pub struct Search<'t> {
    task: &'t SasTask,
    config: Config,
    pub space: PlanSpace,
    successors: Successors<'t>,
    queue: SearchQueue,
    validator: StnValidator,
    components: PlanComponents,
    best_h: u32,
    expanded: usize,
    solution: Option<PlanId>,
}

impl<'t> Search<'t> {
    pub fn new(task: &'t SasTask, config: Config) -> Search<'t> {
        let mut space = PlanSpace::new();
        let tip = initial_plan_chain(task, &mut space, config.epsilon);
        // repeated-state filtering is unsound when absolute time changes the
        // reachable future, which TILs do
        let filter_repeated = task.til_actions.is_empty();
        let mut successors = Successors::new(task, config, filter_repeated);
        successors
            .evaluator
            .compute_frontier(task, &mut space, tip);
        successors.evaluator.evaluate_initial(task, &mut space, tip);
        let use_landmarks = successors.evaluator.informative_landmarks();
        println!(";Filter repeated states: {filter_repeated}");
        let mut queue = SearchQueue::new(use_landmarks);
        queue.add(&space, tip);
        Search {
            task,
            config,
            space,
            successors,
            queue,
            validator: StnValidator,
            components: PlanComponents::default(),
            best_h: INFINITE_H,
            expanded: 0,
            solution: None,
        }
    }

    /// Runs until a solution (cheaper than `best_makespan`) is found, the
    /// queue empties or the deadline passes.
    pub fn plan(&mut self, best_makespan: f64, deadline: Instant) -> Option<PlanId> {
        self.solution = None;
        while self.solution.is_none() && !self.queue.is_empty() {
            if Instant::now() > deadline {
                return None;
            }
            self.search_step(best_makespan);
        }
        self.solution
    }

    pub fn expanded_nodes(&self) -> usize {
        self.expanded
    }

    pub fn search_space_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn search_step(&mut self, best_makespan: f64) {
        let Some(base) = self.queue.poll() else { return };
        self.components.calculate(&self.space, base);
        if self.components.makespan(&self.space) >= best_makespan {
            return;
        }
        if self.space[base].invalid || self.space[base].children.is_some() {
            return;
        }
        if self.successors.repeated_state(&self.space, base) {
            return;
        }
        let needs_check = match self.task.action(self.space[base].action) {
            Some(a) => a.has_numeric_conditions() || !a.conditional.is_empty(),
            None => false,
        };
        if needs_check
            && self.space[base].h <= self.config.check_h_threshold
            && !self.space[base].checked
            && !self.check_plan(base, false).0
        {
            self.mark_invalid(base);
            return;
        }
        if self.space[base].h < self.best_h {
            self.best_h = self.space[base].h;
            println!(";H: {} ({})", self.space[base].h, self.space[base].h_land);
        }
        let children = self
            .successors
            .compute_successors(&mut self.space, base, best_makespan);
        self.expanded += 1;
        if let Some(solution) = self.successors.solution {
            if self.check_plan(solution, false).0 {
                self.solution = Some(solution);
            } else {
                self.mark_invalid(solution);
            }
        }
        self.space.get_mut(base).children = Some(children.clone());
        if self.solution.is_none() {
            for child in children {
                self.queue.add(&self.space, child);
            }
        }
    }

    /// Serializes a plan and asks the validator; marks the plan checked.
    /// Returns `(valid, makespan, control variable bindings)`.
    pub fn check_plan(&mut self, id: PlanId, optimize_makespan: bool) -> (bool, f64, Vec<f64>) {
        print!(".");
        self.space.get_mut(id).checked = true;
        let request = self.build_request(id, optimize_makespan);
        match self.validator.validate(&request) {
            Ok(res) => (res.valid, res.makespan, res.control_vars),
            Err(e) => {
                tracing::warn!(error = %e, "validator rejected the request shape");
                (false, 0.0, Vec::new())
            }
        }
    }

    /// Invalid nodes poison their descendants; an unchecked parent gets
    /// validated in turn and may propagate further up.
    fn mark_invalid(&mut self, id: PlanId) {
        self.space.get_mut(id).invalid = true;
        self.mark_children_invalid(id);
        let parent = self.space[id].parent;
        if let Some(parent) = parent {
            if !self.space[parent].is_root() && !self.space[parent].checked {
                if !self.check_plan(parent, false).0 {
                    self.mark_invalid(parent);
                }
            }
        }
    }

    fn mark_children_invalid(&mut self, id: PlanId) {
        let children = self.space[id].children.clone().unwrap_or_default();
        for child in children {
            self.space.get_mut(child).invalid = true;
            self.mark_children_invalid(child);
        }
    }

    fn build_request(&mut self, id: PlanId, _optimize_makespan: bool) -> ValidationRequest {
        let mut req = ValidationRequest::default();
        self.components.calculate(&self.space, id);
        let steps = self.components.steps.clone();
        req.num_points = (steps.len() * 2) as u32;
        req.num_init = self.task.num_initial.clone();

        // control variable windows, one block per step
        let mut ctrl_offset = vec![0u32; steps.len()];
        for (i, &sid) in steps.iter().enumerate() {
            ctrl_offset[i] = req.control_vars.len() as u32;
            for cv in &self.space[sid].control_vars {
                req.control_vars.push(ControlVarSpec {
                    lb: cv.min,
                    ub: cv.max,
                });
            }
        }
        // durations, one entry per step (index = step)
        for (i, &sid) in steps.iter().enumerate() {
            let plan = &self.space[sid];
            let (dmin, dmax) = match plan.action {
                ActionRef::Init | ActionRef::Til(_) | ActionRef::Goal(_) => (0.0, 0.0),
                ActionRef::Op(_) => (plan.duration.min.max(0.0), plan.duration.max),
            };
            req.durations
                .push((TimePoint::start_of(i).0, TimePoint::end_of(i).0, dmin, dmax));
        }
        // fixed times: the initial step and every TIL step
        for (i, &sid) in steps.iter().enumerate() {
            let plan = &self.space[sid];
            if plan.fixed_init {
                req.fixed_times.push((TimePoint::start_of(i).0, plan.start.time));
                req.fixed_times.push((TimePoint::end_of(i).0, plan.end.time));
            }
            if matches!(plan.action, ActionRef::Op(_)) {
                req.makespan_points.push(TimePoint::end_of(i).0);
            }
        }
        // ordering separations: ε after a flexible point, 0 after a fixed one
        let fixed = |p: TimePoint| self.space[steps[p.step()]].fixed_init;
        let mut push_sep = |req: &mut ValidationRequest, o: &Ordering| {
            let sep = if fixed(o.earlier) { 0.0 } else { self.config.epsilon };
            req.separations.push((o.earlier.0, o.later.0, sep));
        };
        for (i, &sid) in steps.iter().enumerate() {
            let plan = &self.space[sid];
            for o in &plan.orderings {
                push_sep(&mut req, o);
            }
            for (point, pp) in [
                (TimePoint::start_of(i), &plan.start),
                (TimePoint::end_of(i), &plan.end),
            ] {
                for l in &pp.causal_links {
                    push_sep(
                        &mut req,
                        &Ordering {
                            earlier: l.supporter,
                            later: point,
                        },
                    );
                }
                for l in &pp.num_causal_links {
                    push_sep(
                        &mut req,
                        &Ordering {
                            earlier: l.supporter,
                            later: point,
                        },
                    );
                }
            }
        }

        // numeric events in linearization order
        for point in self.components.linearize() {
            let step = point.step();
            if step == 0 {
                continue;
            }
            let plan = &self.space[steps[step]];
            let Some(action) = self.task.action(plan.action) else {
                continue;
            };
            let conv = |e: &tempo_planning::grounding::GroundNumExpr| {
                convert_term(e, ctrl_offset[step], step as u32)
            };
            let mut checks: Vec<&tempo_planning::grounding::GroundNumCond> = Vec::new();
            let mut assigns: Vec<&tempo_planning::grounding::GroundNumEff> = Vec::new();
            if point.is_start() {
                checks.extend(action.num_cond_start.iter());
                checks.extend(action.num_cond_over_all.iter());
                assigns.extend(action.num_eff_start.iter());
                for &ce in &plan.asserted_cond_effs {
                    checks.extend(action.conditional[ce].num_cond_start.iter());
                    assigns.extend(action.conditional[ce].num_eff_start.iter());
                }
            } else {
                checks.extend(action.num_cond_end.iter());
                checks.extend(action.num_cond_over_all.iter());
                assigns.extend(action.num_eff_end.iter());
                for &ce in &plan.asserted_cond_effs {
                    checks.extend(action.conditional[ce].num_cond_end.iter());
                    assigns.extend(action.conditional[ce].num_eff_end.iter());
                }
            }
            for c in checks {
                req.events.push(Event::Check(Condition {
                    comp: convert_cmp(c.comp),
                    left: conv(&c.left),
                    right: conv(&c.right),
                }));
            }
            for a in assigns {
                req.events.push(Event::Assign(Assignment {
                    var: a.var.0,
                    op: convert_assign(a.op),
                    expr: conv(&a.expr),
                }));
            }
        }
        req
    }

    /// Metric value of a solution: violated goal preferences weigh in
    /// through `is-violated`, `total-time` is the plan makespan.
    pub fn metric_value(&mut self, id: PlanId, makespan: f64) -> Option<f64> {
        let metric = self.task.metric.as_ref()?;
        self.components.calculate(&self.space, id);
        let state = self.space[id].frontier.clone()?;
        let violated: Vec<bool> = self
            .task
            .preferences
            .iter()
            .map(|p| {
                !p.goal.iter().any(|(conds, nums)| {
                    state.holds_all(conds)
                        && nums.iter().all(|c| num_cond_holds(c, &state))
                })
            })
            .collect();
        let raw = eval_metric(&metric.expr, &state, makespan, &violated);
        Some(if metric.minimize { raw } else { -raw })
    }
}

fn num_cond_holds(c: &tempo_planning::grounding::GroundNumCond, state: &State) -> bool {
    fn eval(e: &tempo_planning::grounding::GroundNumExpr, state: &State) -> f64 {
        use tempo_planning::grounding::GroundNumExpr::*;
        match e {
            Number(n) => *n,
            Var(v) => state.num_min[usize::from(*v)],
            Add(a, b) => eval(a, state) + eval(b, state),
            Sub(a, b) => eval(a, state) - eval(b, state),
            Mul(a, b) => eval(a, state) * eval(b, state),
            Div(a, b) => eval(a, state) / eval(b, state),
            _ => 0.0,
        }
    }
    let (l, r) = (eval(&c.left, state), eval(&c.right, state));
    match c.comp {
        tempo_planning::model::Comparator::Eq => (l - r).abs() < 1e-9,
        tempo_planning::model::Comparator::Neq => (l - r).abs() >= 1e-9,
        tempo_planning::model::Comparator::Less => l < r,
        tempo_planning::model::Comparator::LessEq => l <= r,
        tempo_planning::model::Comparator::Greater => l > r,
        tempo_planning::model::Comparator::GreaterEq => l >= r,
    }
}

fn eval_metric(e: &GroundMetricExpr, state: &State, makespan: f64, violated: &[bool]) -> f64 {
    match e {
        GroundMetricExpr::Number(n) => *n,
        GroundMetricExpr::TotalTime => makespan,
        GroundMetricExpr::Var(v) => state.num_min[usize::from(*v)],
        GroundMetricExpr::IsViolated(i) => {
            if violated.get(*i).copied().unwrap_or(false) {
                1.0
            } else {
                0.0
            }
        }
        GroundMetricExpr::Add(sub) => sub.iter().map(|s| eval_metric(s, state, makespan, violated)).sum(),
        GroundMetricExpr::Mul(sub) => sub
            .iter()
            .map(|s| eval_metric(s, state, makespan, violated))
            .product(),
        GroundMetricExpr::Sub(a, b) => {
            eval_metric(a, state, makespan, violated) - eval_metric(b, state, makespan, violated)
        }
        GroundMetricExpr::Div(a, b) => {
            eval_metric(a, state, makespan, violated) / eval_metric(b, state, makespan, violated)
        }
    }
}

fn convert_cmp(c: tempo_planning::model::Comparator) -> Cmp {
    use tempo_planning::model::Comparator::*;
    match c {
        Eq => Cmp::Eq,
        Neq => Cmp::Neq,
        Less => Cmp::Less,
        LessEq => Cmp::LessEq,
        Greater => Cmp::Greater,
        GreaterEq => Cmp::GreaterEq,
    }
}

fn convert_assign(op: tempo_planning::model::AssignOp) -> AssignKind {
    use tempo_planning::model::AssignOp::*;
    match op {
        Assign => AssignKind::Assign,
        Increase => AssignKind::Increase,
        Decrease => AssignKind::Decrease,
        ScaleUp => AssignKind::ScaleUp,
        ScaleDown => AssignKind::ScaleDown,
    }
}

fn convert_term(
    e: &tempo_planning::grounding::GroundNumExpr,
    ctrl_offset: u32,
    step: u32,
) -> Term {
    use tempo_planning::grounding::GroundNumExpr::*;
    match e {
        Number(n) => Term::Number(*n),
        Var(v) => Term::NumVar(v.0),
        Duration => Term::Duration(step),
        // `#t` spans the execution interval, its envelope is the duration
        SharpT => Term::Duration(step),
        ControlVar(i) => Term::ControlVar(ctrl_offset + *i as u32),
        Add(a, b) => Term::Add(
            Box::new(convert_term(a, ctrl_offset, step)),
            Box::new(convert_term(b, ctrl_offset, step)),
        ),
        Sub(a, b) => Term::Sub(
            Box::new(convert_term(a, ctrl_offset, step)),
            Box::new(convert_term(b, ctrl_offset, step)),
        ),
        Mul(a, b) => Term::Mul(
            Box::new(convert_term(a, ctrl_offset, step)),
            Box::new(convert_term(b, ctrl_offset, step)),
        ),
        Div(a, b) => Term::Div(
            Box::new(convert_term(a, ctrl_offset, step)),
            Box::new(convert_term(b, ctrl_offset, step)),
        ),
    }
}

/// Builds the root plan and one fixed step per timed initial literal.
/// Returns the tip of the chain, the base every search starts from.
fn initial_plan_chain(task: &SasTask, space: &mut PlanSpace, _epsilon: f64) -> PlanId {
    let root = space.push(Plan {
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
    });
    let mut tip = root;
    for (i, til) in task.til_actions.iter().enumerate() {
        let mut p = Plan {
            id: PlanId(0),
            parent: Some(tip),
            children: None,
            action: ActionRef::Til(i),
            fixed_init: true,
            start: PlanPoint::default(),
            end: PlanPoint::default(),
            orderings: vec![Ordering {
                earlier: TimePoint::end_of(0),
                later: TimePoint::start_of(i + 1),
            }],
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
        };
        p.start.time = til.til_time;
        p.end.time = til.til_time;
        tip = space.push(p);
    }
    tip
}

/// Outcome of the anytime driver.
pub struct Solved {
    pub plan_text: String,
    pub makespan: f64,
    pub steps: f64,
}

/// Repeated searches under a shrinking makespan bound; every improving
/// solution is printed as it is found. With a metric present, improvement is
/// judged by metric value first.
pub fn solve(task: &SasTask, config: Config) -> Option<Solved> {
    let start = Instant::now();
    let deadline = start + std::time::Duration::from_secs_f64(config.timeout);
    let mut search = Search::new(task, config);
    let mut best: Option<Solved> = None;
    let mut best_makespan = f64::INFINITY;
    let mut best_metric = f64::INFINITY;
    let has_metric = task.metric.is_some();

    loop {
        let Some(solution) = search.plan(best_makespan, deadline) else {
            break;
        };
        let (valid, mut makespan, _cvars) = search.check_plan(solution, true);
        println!();
        if valid {
            search.components.calculate(&search.space, solution);
            let plan_makespan = search.components.makespan(&search.space);
            if makespan <= 0.0 {
                makespan = plan_makespan;
            }
            let g = search.space[solution].g;
            let improves = if has_metric {
                let metric = search.metric_value(solution, makespan).unwrap_or(makespan);
                metric < best_metric - 1e-9
                    || ((metric - best_metric).abs() < 1e-9 && makespan < best_makespan - 1e-9)
            } else {
                makespan < best_makespan - config.epsilon
                    || ((makespan - best_makespan).abs() < config.epsilon
                        && g < best.as_ref().map_or(f64::INFINITY, |b| b.steps))
            };
            if improves {
                let text = fmt::format_plan(task, &search.space, &search.components);
                print!("{text}");
                println!(";Solution found in {:.2}", start.elapsed().as_secs_f64());
                if has_metric {
                    best_metric = search.metric_value(solution, makespan).unwrap_or(makespan);
                } else {
                    best_makespan = makespan;
                }
                best = Some(Solved {
                    plan_text: text,
                    makespan,
                    steps: g,
                });
            }
        }
        if Instant::now() > deadline {
            break;
        }
    }
    best
}
