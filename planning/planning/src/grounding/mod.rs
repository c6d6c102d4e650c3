//! Grounder: instantiates the schematic operators over every parameter
//! assignment reachable from the initial state, by forward chaining.
//!
//! A *ground fluent* is a function applied to objects; symbolic fluents get a
//! [`VarId`], numeric fluents a [`NumVarId`]. Matching works level by level:
//! facts discovered at one level are queued and matched against the operator
//! preconditions that mention their function, until no new fact appears.
//! Negative and numeric preconditions never restrict reachability (they are
//! checked at search time); equality constraints filter bindings during
//! matching.

pub mod printer;
pub mod statics;

use crate::model::*;
use crate::preprocessing::{normalize_goal, subst_goal, NormalizedConj};
use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Index of a ground symbolic fluent in [`GroundedTask::fluents`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct VarId(pub u32);

/// Index of a ground numeric fluent in [`GroundedTask::num_fluents`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct NumVarId(pub u32);

impl From<VarId> for usize {
    fn from(v: VarId) -> usize {
        v.0 as usize
    }
}
impl From<NumVarId> for usize {
    fn from(v: NumVarId) -> usize {
        v.0 as usize
    }
}

/// A ground fluent: a function applied to a tuple of objects.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct GroundFluent {
    pub func: FunctionId,
    pub args: SmallVec<[ObjectId; 4]>,
}

/// Ground condition `var = value` (`var != value` when negated).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct GroundCond {
    pub var: VarId,
    pub value: ObjectId,
    pub negated: bool,
}

/// Ground assignment effect `var := value`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct GroundEff {
    pub var: VarId,
    pub value: ObjectId,
}

/// Ground numeric expression; `Duration`, `SharpT` and `ControlVar` survive
/// until interval evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum GroundNumExpr {
    Number(f64),
    Var(NumVarId),
    Duration,
    SharpT,
    ControlVar(usize),
    Add(Box<GroundNumExpr>, Box<GroundNumExpr>),
    Sub(Box<GroundNumExpr>, Box<GroundNumExpr>),
    Mul(Box<GroundNumExpr>, Box<GroundNumExpr>),
    Div(Box<GroundNumExpr>, Box<GroundNumExpr>),
}

#[derive(Clone, Debug)]
pub struct GroundNumCond {
    pub comp: Comparator,
    pub left: GroundNumExpr,
    pub right: GroundNumExpr,
}

#[derive(Clone, Debug)]
pub struct GroundNumEff {
    pub op: AssignOp,
    pub var: NumVarId,
    pub expr: GroundNumExpr,
}

#[derive(Clone, Debug)]
pub struct GroundDuration {
    pub comp: Comparator,
    pub expr: GroundNumExpr,
}

#[derive(Clone, Debug, Default)]
pub struct GroundCondEffect {
    pub cond_start: Vec<GroundCond>,
    pub num_cond_start: Vec<GroundNumCond>,
    pub cond_end: Vec<GroundCond>,
    pub num_cond_end: Vec<GroundNumCond>,
    pub eff_start: Vec<GroundEff>,
    pub num_eff_start: Vec<GroundNumEff>,
    pub eff_end: Vec<GroundEff>,
    pub num_eff_end: Vec<GroundNumEff>,
}

/// A conjunction of ground conditions; a goal or preference is a disjunction
/// of these.
#[derive(Clone, Debug, Default)]
pub struct GroundConj {
    pub conds: Vec<GroundCond>,
    pub num_conds: Vec<GroundNumCond>,
}

#[derive(Clone, Debug)]
pub struct GroundPreference {
    pub name: String,
    /// Disjunctive normal form; satisfied iff some disjunct holds.
    pub goal: Vec<GroundConj>,
}

#[derive(Clone, Debug)]
pub struct GroundAction {
    pub index: usize,
    pub op_name: String,
    pub params: SmallVec<[ObjectId; 4]>,
    /// Empty iff the action is instantaneous.
    pub duration: Vec<GroundDuration>,
    pub num_control_vars: usize,
    pub cond_start: Vec<GroundCond>,
    pub cond_over_all: Vec<GroundCond>,
    pub cond_end: Vec<GroundCond>,
    pub num_cond_start: Vec<GroundNumCond>,
    pub num_cond_over_all: Vec<GroundNumCond>,
    pub num_cond_end: Vec<GroundNumCond>,
    pub eff_start: Vec<GroundEff>,
    pub eff_end: Vec<GroundEff>,
    pub num_eff_start: Vec<GroundNumEff>,
    pub num_eff_end: Vec<GroundNumEff>,
    pub conditional: Vec<GroundCondEffect>,
    pub preferences: Vec<GroundPreference>,
}

impl GroundAction {
    pub fn is_instantaneous(&self) -> bool {
        self.duration.is_empty()
    }

    /// `(name arg1 arg2)` rendering, used for plans and diagnostics.
    pub fn display_name(&self, task: &Task) -> String {
        let mut s = format!("({}", self.op_name);
        for &p in &self.params {
            s.push(' ');
            s.push_str(task.object_name(p));
        }
        s.push(')');
        s
    }
}

#[derive(Clone, Debug)]
pub enum GroundMetricExpr {
    Number(f64),
    TotalTime,
    Var(NumVarId),
    /// Index into [`GroundedTask::preferences`].
    IsViolated(usize),
    Add(Vec<GroundMetricExpr>),
    Sub(Box<GroundMetricExpr>, Box<GroundMetricExpr>),
    Mul(Vec<GroundMetricExpr>),
    Div(Box<GroundMetricExpr>, Box<GroundMetricExpr>),
}

#[derive(Clone, Debug)]
pub struct GroundMetric {
    pub minimize: bool,
    pub expr: GroundMetricExpr,
}

/// A timed initial literal: `var` takes `value` at absolute time `time`.
#[derive(Copy, Clone, Debug)]
pub struct GroundTil {
    pub time: f64,
    pub var: VarId,
    pub value: ObjectId,
}

/// Output of the grounder: all reachable ground actions and the ground
/// fluents they mention. Fluent ids are stable from here on; provably static
/// fluents are folded away by [`statics::remove_static_variables`] but keep
/// their id.
pub struct GroundedTask {
    pub lifted: Task,
    pub fluents: Vec<GroundFluent>,
    pub num_fluents: Vec<GroundFluent>,
    /// Initial value per symbolic fluent; boolean fluents absent from the
    /// initial state are false.
    pub init: Vec<ObjectId>,
    pub num_init: Vec<f64>,
    pub tils: Vec<GroundTil>,
    pub actions: Vec<GroundAction>,
    /// Goal in disjunctive normal form (usually a single conjunction).
    pub goal: Vec<GroundConj>,
    pub preferences: Vec<GroundPreference>,
    pub metric: Option<GroundMetric>,
    /// Fluents marked static by the folding pass.
    pub static_fluents: fixedbitset::FixedBitSet,
}

impl GroundedTask {
    pub fn fluent_name(&self, v: VarId) -> String {
        let f = &self.fluents[usize::from(v)];
        display_fluent(&self.lifted, f)
    }

    pub fn num_fluent_name(&self, v: NumVarId) -> String {
        let f = &self.num_fluents[usize::from(v)];
        display_fluent(&self.lifted, f)
    }
}

fn display_fluent(task: &Task, f: &GroundFluent) -> String {
    let mut s = format!("({}", task.function_name(f.func));
    for &a in &f.args {
        s.push(' ');
        s.push_str(task.object_name(a));
    }
    s.push(')');
    s
}

/// One positive precondition of an operator, ready for matching.
struct MatchPrec {
    func: FunctionId,
    args: SmallVec<[Term; 4]>,
    /// The required value: an object, or a parameter to bind.
    value: Term,
}

/// Matching view of one normalized operator.
struct MatcherOp {
    op_index: usize,
    /// Positive fluent preconditions across the three buckets.
    precs: Vec<MatchPrec>,
    /// Candidate objects per parameter.
    param_domain: Vec<Vec<ObjectId>>,
    equalities: Vec<EqualityCond>,
}

type Binding = SmallVec<[Option<ObjectId>; 8]>;

struct Grounder {
    task: Task,
    ops: Vec<MatcherOp>,
    /// Operators (op, prec) indexed by the function of the precondition.
    op_requires: Vec<Vec<(usize, usize)>>,
    fluents: Vec<GroundFluent>,
    fluent_index: HashMap<GroundFluent, VarId>,
    num_fluents: Vec<GroundFluent>,
    num_fluent_index: HashMap<GroundFluent, NumVarId>,
    /// Known positive facts, indexed by function for matching.
    facts_by_func: Vec<Vec<(VarId, ObjectId)>>,
    known: HashSet<(VarId, ObjectId)>,
    queue: VecDeque<(VarId, ObjectId)>,
    actions: Vec<GroundAction>,
    action_index: HashSet<(usize, SmallVec<[ObjectId; 4]>)>,
    num_init: Vec<f64>,
    num_init_known: Vec<bool>,
}

/// Grounds the task. The returned task still contains static fluents; the
/// caller runs [`statics::remove_static_variables`] unless static data must
/// be preserved.
pub fn ground(task: Task) -> Result<GroundedTask> {
    let num_functions = task.functions.len();
    let ops = task
        .operators
        .iter()
        .enumerate()
        .map(|(i, op)| matcher_op(&task, i, op))
        .collect::<Vec<_>>();

    let mut op_requires = vec![Vec::new(); num_functions];
    for (i, m) in ops.iter().enumerate() {
        for (j, p) in m.precs.iter().enumerate() {
            op_requires[usize::from(p.func)].push((i, j));
        }
    }

    let mut g = Grounder {
        task,
        ops,
        op_requires,
        fluents: Vec::new(),
        fluent_index: HashMap::new(),
        num_fluents: Vec::new(),
        num_fluent_index: HashMap::new(),
        facts_by_func: vec![Vec::new(); num_functions],
        known: HashSet::new(),
        queue: VecDeque::new(),
        actions: Vec::new(),
        action_index: HashSet::new(),
        num_init: Vec::new(),
        num_init_known: Vec::new(),
    };

    g.init_state()?;
    g.ground_parameterless_operators()?;
    g.saturate()?;
    g.finish()
}

fn matcher_op(task: &Task, op_index: usize, op: &Operator) -> MatcherOp {
    let mut precs = Vec::new();
    let mut equalities = Vec::new();
    for bucket in [&op.cond_start, &op.cond_over_all, &op.cond_end] {
        for c in &bucket.fluents {
            let positive = !c.negated && c.value != Term::Obj(FALSE_OBJECT);
            if positive {
                precs.push(MatchPrec {
                    func: c.atom.func,
                    args: c.atom.args.clone(),
                    value: c.value,
                });
            }
        }
        equalities.extend(bucket.equalities.iter().cloned());
    }
    let param_domain = op
        .params
        .iter()
        .map(|p| task.instances_of(&p.types))
        .collect();
    MatcherOp {
        op_index,
        precs,
        param_domain,
        equalities,
    }
}

impl Grounder {
    fn intern_fluent(&mut self, func: FunctionId, args: SmallVec<[ObjectId; 4]>) -> VarId {
        let f = GroundFluent { func, args };
        if let Some(&v) = self.fluent_index.get(&f) {
            return v;
        }
        let v = VarId(self.fluents.len() as u32);
        self.fluents.push(f.clone());
        self.fluent_index.insert(f, v);
        v
    }

    fn intern_num_fluent(&mut self, func: FunctionId, args: SmallVec<[ObjectId; 4]>) -> NumVarId {
        let f = GroundFluent { func, args };
        if let Some(&v) = self.num_fluent_index.get(&f) {
            return v;
        }
        let v = NumVarId(self.num_fluents.len() as u32);
        self.num_fluents.push(f.clone());
        self.num_fluent_index.insert(f, v);
        self.num_init.push(0.0);
        self.num_init_known.push(false);
        v
    }

    /// Records a fact as known, queueing it for matching if new.
    fn program_fact(&mut self, var: VarId, value: ObjectId) {
        if self.known.insert((var, value)) {
            let func = self.fluents[usize::from(var)].func;
            self.facts_by_func[usize::from(func)].push((var, value));
            self.queue.push_back((var, value));
        }
    }

    fn init_state(&mut self) -> Result<()> {
        let facts = std::mem::take(&mut self.task.init);
        for fact in &facts {
            let decl = &self.task.functions[usize::from(fact.func)];
            match (fact.value, decl.is_numeric()) {
                (FactValue::Num(n), true) => {
                    let v = self.intern_num_fluent(fact.func, fact.args.clone());
                    if self.num_init_known[usize::from(v)] {
                        bail!(
                            "numeric fluent {} initialized twice",
                            display_fluent(&self.task, &self.num_fluents[usize::from(v)])
                        );
                    }
                    self.num_init[usize::from(v)] = n;
                    self.num_init_known[usize::from(v)] = true;
                }
                (FactValue::Obj(o), false) => {
                    let v = self.intern_fluent(fact.func, fact.args.clone());
                    // TILs are known for reachability but do not hold at time 0
                    self.program_fact(v, o);
                }
                _ => bail!("initial value incompatible with function declaration"),
            }
        }
        self.task.init = facts;
        Ok(())
    }

    /// Operators without positive fluent preconditions never get triggered by
    /// a queued fact; instantiate them over their parameter domains directly.
    fn ground_parameterless_operators(&mut self) -> Result<()> {
        for i in 0..self.ops.len() {
            if !self.ops[i].precs.is_empty() {
                continue;
            }
            let binding: Binding = std::iter::repeat(None)
                .take(self.ops[i].param_domain.len())
                .collect();
            let complete = self.enumerate_free_params(i, binding);
            for b in complete {
                self.emit_action(i, &b)?;
            }
        }
        Ok(())
    }

    fn saturate(&mut self) -> Result<()> {
        while let Some((var, value)) = self.queue.pop_front() {
            let func = self.fluents[usize::from(var)].func;
            let watchers = self.op_requires[usize::from(func)].clone();
            for (op_i, prec_i) in watchers {
                let mut binding: Binding = std::iter::repeat(None)
                    .take(self.ops[op_i].param_domain.len())
                    .collect();
                if !self.bind_prec(op_i, prec_i, var, value, &mut binding) {
                    continue;
                }
                let bindings = self.complete_match(op_i, prec_i, binding);
                for b in bindings {
                    self.emit_action(op_i, &b)?;
                }
            }
        }
        tracing::debug!(
            actions = self.actions.len(),
            fluents = self.fluents.len(),
            num_fluents = self.num_fluents.len(),
            "grounding saturated"
        );
        Ok(())
    }

    /// Tries to bind one precondition against a known fact.
    fn bind_prec(
        &self,
        op_i: usize,
        prec_i: usize,
        var: VarId,
        value: ObjectId,
        binding: &mut Binding,
    ) -> bool {
        let prec = &self.ops[op_i].precs[prec_i];
        let fluent = &self.fluents[usize::from(var)];
        if prec.func != fluent.func {
            return false;
        }
        for (term, &obj) in prec.args.iter().zip(fluent.args.iter()) {
            if !self.bind_term(op_i, *term, obj, binding) {
                return false;
            }
        }
        self.bind_term(op_i, prec.value, value, binding)
    }

    fn bind_term(&self, op_i: usize, term: Term, obj: ObjectId, binding: &mut Binding) -> bool {
        match term {
            Term::Obj(o) => o == obj,
            Term::Param(p) => match binding[p] {
                Some(bound) => bound == obj,
                None => {
                    if !self.ops[op_i].param_domain[p].contains(&obj) {
                        return false;
                    }
                    binding[p] = Some(obj);
                    true
                }
            },
        }
    }

    /// Completes a partial binding by matching the remaining positive
    /// preconditions against known facts, then enumerating unconstrained
    /// parameters. Returns every complete binding that passes the equality
    /// filter.
    fn complete_match(&self, op_i: usize, fixed_prec: usize, binding: Binding) -> Vec<Binding> {
        let mut complete = Vec::new();
        self.match_rest(op_i, fixed_prec, 0, binding, &mut complete);
        complete
    }

    fn match_rest(
        &self,
        op_i: usize,
        fixed_prec: usize,
        next: usize,
        binding: Binding,
        out: &mut Vec<Binding>,
    ) {
        if next >= self.ops[op_i].precs.len() {
            out.extend(self.enumerate_free_params(op_i, binding));
            return;
        }
        if next == fixed_prec {
            self.match_rest(op_i, fixed_prec, next + 1, binding, out);
            return;
        }
        let prec = &self.ops[op_i].precs[next];
        for &(var, value) in &self.facts_by_func[usize::from(prec.func)] {
            let mut b = binding.clone();
            if self.bind_prec(op_i, next, var, value, &mut b) {
                self.match_rest(op_i, fixed_prec, next + 1, b, out);
            }
        }
    }

    /// Enumerates the objects of parameters not constrained by any positive
    /// precondition, filtering by the operator's equality constraints.
    fn enumerate_free_params(&self, op_i: usize, binding: Binding) -> Vec<Binding> {
        let m = &self.ops[op_i];
        let mut result = vec![binding];
        for p in 0..m.param_domain.len() {
            let mut next = Vec::new();
            for b in &result {
                if b[p].is_some() {
                    next.push(b.clone());
                } else {
                    for &obj in &m.param_domain[p] {
                        let mut b2 = b.clone();
                        b2[p] = Some(obj);
                        next.push(b2);
                    }
                }
            }
            result = next;
        }
        result.retain(|b| self.equalities_hold(op_i, b));
        result
    }

    fn equalities_hold(&self, op_i: usize, binding: &Binding) -> bool {
        self.ops[op_i].equalities.iter().all(|eq| {
            let left = self.resolve(eq.left, binding);
            let right = self.resolve(eq.right, binding);
            (left == right) != eq.negated
        })
    }

    fn resolve(&self, term: Term, binding: &Binding) -> ObjectId {
        match term {
            Term::Obj(o) => o,
            Term::Param(p) => binding[p].expect("unbound parameter"),
        }
    }

    fn emit_action(&mut self, op_i: usize, binding: &Binding) -> Result<()> {
        let op_index = self.ops[op_i].op_index;
        let params: SmallVec<[ObjectId; 4]> =
            binding.iter().map(|b| b.expect("unbound parameter")).collect();
        if !self.action_index.insert((op_index, params.clone())) {
            return Ok(());
        }
        let op = self.task.operators[op_index].clone();

        let mut a = GroundAction {
            index: self.actions.len(),
            op_name: op.name.clone(),
            params,
            duration: Vec::new(),
            num_control_vars: op.control_params.len(),
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
            preferences: Vec::new(),
        };

        for d in &op.duration {
            let expr = self.ground_num_expr(&d.expr, binding);
            a.duration.push(GroundDuration { comp: d.comp, expr });
        }
        a.cond_start = self.ground_conds(&op.cond_start.fluents, binding);
        a.cond_over_all = self.ground_conds(&op.cond_over_all.fluents, binding);
        a.cond_end = self.ground_conds(&op.cond_end.fluents, binding);
        a.num_cond_start = self.ground_num_conds(&op.cond_start.numeric, binding);
        a.num_cond_over_all = self.ground_num_conds(&op.cond_over_all.numeric, binding);
        a.num_cond_end = self.ground_num_conds(&op.cond_end.numeric, binding);
        a.eff_start = self.ground_effs(&op.eff_start.fluents, binding);
        a.eff_end = self.ground_effs(&op.eff_end.fluents, binding);
        a.num_eff_start = self.ground_num_effs(&op.eff_start.numeric, binding);
        a.num_eff_end = self.ground_num_effs(&op.eff_end.numeric, binding);

        for ce in &op.conditional {
            a.conditional.push(GroundCondEffect {
                cond_start: self.ground_conds(&ce.cond_start.fluents, binding),
                num_cond_start: self.ground_num_conds(&ce.cond_start.numeric, binding),
                cond_end: self.ground_conds(&ce.cond_end.fluents, binding),
                num_cond_end: self.ground_num_conds(&ce.cond_end.numeric, binding),
                eff_start: self.ground_effs(&ce.eff_start.fluents, binding),
                num_eff_start: self.ground_num_effs(&ce.eff_start.numeric, binding),
                eff_end: self.ground_effs(&ce.eff_end.fluents, binding),
                num_eff_end: self.ground_num_effs(&ce.eff_end.numeric, binding),
            });
        }

        for (name, goal) in &op.preferences {
            let objs: Vec<ObjectId> = binding.iter().map(|b| b.unwrap()).collect();
            let obj_refs: Vec<&ObjectId> = objs.iter().collect();
            let substituted = subst_goal(goal, 0, &obj_refs);
            if let Some(p) = self.ground_preference(name, &substituted, objs.len())? {
                a.preferences.push(p);
            }
        }

        // program the effects so they can support further preconditions
        for eff in a
            .eff_start
            .iter()
            .chain(a.eff_end.iter())
            .chain(a.conditional.iter().flat_map(|c| c.eff_start.iter()))
            .chain(a.conditional.iter().flat_map(|c| c.eff_end.iter()))
            .copied()
            .collect::<Vec<_>>()
        {
            self.program_fact(eff.var, eff.value);
        }

        self.actions.push(a);
        Ok(())
    }

    fn ground_conds(&mut self, conds: &[FluentCond], binding: &Binding) -> Vec<GroundCond> {
        conds
            .iter()
            .map(|c| {
                let args = c
                    .atom
                    .args
                    .iter()
                    .map(|t| self.resolve(*t, binding))
                    .collect();
                let var = self.intern_fluent(c.atom.func, args);
                GroundCond {
                    var,
                    value: self.resolve(c.value, binding),
                    negated: c.negated,
                }
            })
            .collect()
    }

    fn ground_effs(&mut self, effs: &[FluentEff], binding: &Binding) -> Vec<GroundEff> {
        effs.iter()
            .map(|e| {
                let args = e
                    .atom
                    .args
                    .iter()
                    .map(|t| self.resolve(*t, binding))
                    .collect();
                let var = self.intern_fluent(e.atom.func, args);
                GroundEff {
                    var,
                    value: self.resolve(e.value, binding),
                }
            })
            .collect()
    }

    fn ground_num_conds(&mut self, conds: &[NumericCond], binding: &Binding) -> Vec<GroundNumCond> {
        conds
            .iter()
            .map(|c| GroundNumCond {
                comp: c.comp,
                left: self.ground_num_expr(&c.left, binding),
                right: self.ground_num_expr(&c.right, binding),
            })
            .collect()
    }

    fn ground_num_effs(&mut self, effs: &[NumericEff], binding: &Binding) -> Vec<GroundNumEff> {
        effs.iter()
            .map(|e| {
                let args = e
                    .fluent
                    .args
                    .iter()
                    .map(|t| self.resolve(*t, binding))
                    .collect();
                let var = self.intern_num_fluent(e.fluent.func, args);
                GroundNumEff {
                    op: e.op,
                    var,
                    expr: self.ground_num_expr(&e.expr, binding),
                }
            })
            .collect()
    }

    fn ground_num_expr(&mut self, e: &NumExpr, binding: &Binding) -> GroundNumExpr {
        match e {
            NumExpr::Number(n) => GroundNumExpr::Number(*n),
            NumExpr::Duration => GroundNumExpr::Duration,
            NumExpr::SharpT => GroundNumExpr::SharpT,
            NumExpr::ControlParam(i) => GroundNumExpr::ControlVar(*i),
            NumExpr::Fluent(a) => {
                let args = a.args.iter().map(|t| self.resolve(*t, binding)).collect();
                GroundNumExpr::Var(self.intern_num_fluent(a.func, args))
            }
            NumExpr::Add(a, b) => GroundNumExpr::Add(
                Box::new(self.ground_num_expr(a, binding)),
                Box::new(self.ground_num_expr(b, binding)),
            ),
            NumExpr::Sub(a, b) => GroundNumExpr::Sub(
                Box::new(self.ground_num_expr(a, binding)),
                Box::new(self.ground_num_expr(b, binding)),
            ),
            NumExpr::Mul(a, b) => GroundNumExpr::Mul(
                Box::new(self.ground_num_expr(a, binding)),
                Box::new(self.ground_num_expr(b, binding)),
            ),
            NumExpr::Div(a, b) => GroundNumExpr::Div(
                Box::new(self.ground_num_expr(a, binding)),
                Box::new(self.ground_num_expr(b, binding)),
            ),
        }
    }

    /// Grounds a (quantifier-bearing) preference body into DNF.
    fn ground_preference(
        &mut self,
        name: &str,
        goal: &GoalDesc,
        depth: usize,
    ) -> Result<Option<GroundPreference>> {
        let task = std::mem::take(&mut self.task);
        let result = normalize_goal(&task, goal, depth);
        self.task = task;
        let disjuncts = result?;
        if disjuncts.iter().any(|d| !d.preferences.is_empty()) {
            bail!("preference `{name}` contains a nested preference");
        }
        let goal = disjuncts
            .into_iter()
            .filter_map(|conj| self.intern_conj(conj))
            .collect();
        Ok(Some(GroundPreference {
            name: name.to_string(),
            goal,
        }))
    }

    /// Interns a ground conjunction; returns `None` if one of its equality
    /// constraints is violated (the disjunct is unsatisfiable).
    fn intern_conj(&mut self, conj: NormalizedConj) -> Option<GroundConj> {
        let binding: Binding = Binding::new();
        for eq in &conj.equalities {
            let l = self.resolve(eq.left, &binding);
            let r = self.resolve(eq.right, &binding);
            if (l == r) == eq.negated {
                return None;
            }
        }
        Some(GroundConj {
            conds: self.ground_conds(&conj.fluents, &binding),
            num_conds: self.ground_num_conds(&conj.numeric, &binding),
        })
    }

    fn finish(mut self) -> Result<GroundedTask> {
        // goal: expand, split preferences out, intern
        let goal_desc = self.task.goal.clone();
        let task = std::mem::take(&mut self.task);
        let result = normalize_goal(&task, &goal_desc, 0);
        self.task = task;
        let goal_disjuncts = result?;

        // a preference appearing in every goal disjunct is a goal preference
        let mut preferences = Vec::new();
        let mut seen = HashSet::new();
        for d in &goal_disjuncts {
            for (name, body) in &d.preferences {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(p) = self.ground_preference(name, body, 0)? {
                    preferences.push(p);
                }
            }
        }
        // preferences declared under (:constraints (preference n (at end g)))
        let constraints = self.task.constraints.clone();
        for c in &constraints {
            if let Constraint::Preference(name, inner) = c {
                if let Constraint::AtEnd(body) = inner.as_ref() {
                    let body = body.clone();
                    if let Some(p) = self.ground_preference(name, &body, 0)? {
                        preferences.push(p);
                    }
                } else {
                    tracing::warn!(name, "unsupported preference kind, assumed satisfied");
                }
            }
        }

        let goal: Vec<GroundConj> = goal_disjuncts
            .into_iter()
            .filter_map(|c| self.intern_conj(c))
            .collect();

        // TILs: intern and record; a TIL fact was already programmed as known
        let mut tils = Vec::new();
        let init_facts = self.task.init.clone();
        for fact in &init_facts {
            if let (Some(t), FactValue::Obj(o)) = (fact.time, fact.value) {
                let var = self.intern_fluent(fact.func, fact.args.clone());
                tils.push(GroundTil {
                    time: t,
                    var,
                    value: o,
                });
            }
        }

        // initial assignment for every materialized symbolic fluent
        let mut init = vec![FALSE_OBJECT; self.fluents.len()];
        for fact in &init_facts {
            if fact.time.is_some() {
                continue;
            }
            if let FactValue::Obj(o) = fact.value {
                let f = GroundFluent {
                    func: fact.func,
                    args: fact.args.clone(),
                };
                if let Some(&v) = self.fluent_index.get(&f) {
                    init[usize::from(v)] = o;
                }
            }
        }

        for (v, known) in self.num_init_known.iter().enumerate() {
            if !known {
                tracing::warn!(
                    fluent = display_fluent(&self.task, &self.num_fluents[v]),
                    "numeric fluent has no initial value, assuming 0"
                );
            }
        }

        let metric = match self.task.metric.clone() {
            None => None,
            Some(m) => {
                let expr = self.ground_metric(&m.expr, &preferences)?;
                Some(GroundMetric {
                    minimize: m.minimize,
                    expr,
                })
            }
        };

        let n = self.fluents.len();
        Ok(GroundedTask {
            lifted: self.task,
            fluents: self.fluents,
            num_fluents: self.num_fluents,
            init,
            num_init: self.num_init,
            tils,
            actions: self.actions,
            goal,
            preferences,
            metric,
            static_fluents: fixedbitset::FixedBitSet::with_capacity(n),
        })
    }

    fn ground_metric(
        &mut self,
        e: &MetricExpr,
        prefs: &[GroundPreference],
    ) -> Result<GroundMetricExpr> {
        Ok(match e {
            MetricExpr::Number(n) => GroundMetricExpr::Number(*n),
            MetricExpr::TotalTime => GroundMetricExpr::TotalTime,
            MetricExpr::Fluent(a) => {
                let binding: Binding = Binding::new();
                let args = a.args.iter().map(|t| self.resolve(*t, &binding)).collect();
                GroundMetricExpr::Var(self.intern_num_fluent(a.func, args))
            }
            MetricExpr::IsViolated(name) => {
                let idx = prefs
                    .iter()
                    .position(|p| &p.name == name)
                    .ok_or_else(|| anyhow::anyhow!("metric references unknown preference `{name}`"))?;
                GroundMetricExpr::IsViolated(idx)
            }
            MetricExpr::Add(sub) => GroundMetricExpr::Add(
                sub.iter()
                    .map(|s| self.ground_metric(s, prefs))
                    .collect::<Result<Vec<_>>>()?,
            ),
            MetricExpr::Mul(sub) => GroundMetricExpr::Mul(
                sub.iter()
                    .map(|s| self.ground_metric(s, prefs))
                    .collect::<Result<Vec<_>>>()?,
            ),
            MetricExpr::Sub(a, b) => GroundMetricExpr::Sub(
                Box::new(self.ground_metric(a, prefs)?),
                Box::new(self.ground_metric(b, prefs)?),
            ),
            MetricExpr::Div(a, b) => GroundMetricExpr::Div(
                Box::new(self.ground_metric(a, prefs)?),
                Box::new(self.ground_metric(b, prefs)?),
            ),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::parsing::{parse_domain, parse_problem, Input};
    use crate::preprocessing::normalize;

    pub(crate) fn build(domain: &str, problem: &str) -> GroundedTask {
        let mut task = Task::new();
        let raw = parse_domain(&mut task, Input::from_string(domain)).unwrap();
        parse_problem(&mut task, Input::from_string(problem)).unwrap();
        normalize(&mut task, raw).unwrap();
        ground(task).unwrap()
    }

    const BRIEFCASE: &str = "(define (domain briefcase)
      (:requirements :strips :typing)
      (:types portable location)
      (:predicates (at-bc ?l - location) (at ?p - portable ?l - location)
                   (in ?p - portable))
      (:action move :parameters (?from ?to - location)
        :precondition (at-bc ?from)
        :effect (and (not (at-bc ?from)) (at-bc ?to)))
      (:action put-in :parameters (?p - portable ?l - location)
        :precondition (and (at ?p ?l) (at-bc ?l))
        :effect (and (not (at ?p ?l)) (in ?p)))
      (:action take-out :parameters (?p - portable ?l - location)
        :precondition (and (in ?p) (at-bc ?l))
        :effect (and (not (in ?p)) (at ?p ?l))))";

    const BRIEFCASE_PB: &str = "(define (problem bc1)
      (:domain briefcase)
      (:objects dict - portable home office - location)
      (:init (at-bc home) (at dict home))
      (:goal (and (at-bc office) (at dict office))))";

    #[test]
    fn reachable_actions_are_grounded() {
        let g = build(BRIEFCASE, BRIEFCASE_PB);
        let names: Vec<String> = g.actions.iter().map(|a| a.display_name(&g.lifted)).collect();
        assert!(names.contains(&"(move home office)".to_string()));
        assert!(names.contains(&"(put-in dict home)".to_string()));
        // dict can only reach the office inside the briefcase
        assert!(names.contains(&"(take-out dict office)".to_string()));
        // put-in at the office requires (at dict office), reachable via take-out
        assert!(names.contains(&"(put-in dict office)".to_string()));
    }

    #[test]
    fn grounding_is_idempotent() {
        let g1 = build(BRIEFCASE, BRIEFCASE_PB);
        let g2 = build(BRIEFCASE, BRIEFCASE_PB);
        assert_eq!(g1.actions.len(), g2.actions.len());
        assert_eq!(g1.fluents.len(), g2.fluents.len());
        for (a, b) in g1.actions.iter().zip(g2.actions.iter()) {
            assert_eq!(a.display_name(&g1.lifted), b.display_name(&g2.lifted));
        }
    }

    #[test]
    fn unreachable_operator_yields_no_action() {
        let g = build(
            BRIEFCASE,
            "(define (problem bc2) (:domain briefcase)
               (:objects dict - portable home - location)
               (:init) (:goal (at dict home)))",
        );
        // nothing holds initially, so no operator ever becomes applicable
        assert!(g.actions.is_empty());
    }
}
