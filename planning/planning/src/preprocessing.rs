//! Lowers parsed operators to the grounder's normal form: no quantifiers,
//! implications or disjunctions in conditions, flattened effects, explicit
//! conditional effects.
//!
//! Quantifiers expand over the objects compatible with the quantified types;
//! disjunctions distribute into operator copies. Preferences keep their
//! structure (including quantifiers) and are expanded later by the grounder.

use crate::model::*;
use crate::parsing::{EffDesc, EffTime, RawOperator, TimeSpec};
use anyhow::{bail, Result};
use itertools::Itertools;

/// Limit on the number of operator copies a single raw operator may expand
/// into through disjunction distribution.
const MAX_SPLITS: usize = 1024;

/// Lowers every raw operator into `task.operators`.
pub fn normalize(task: &mut Task, raw: Vec<RawOperator>) -> Result<()> {
    let mut operators = Vec::new();
    for op in raw {
        let lowered = lower_operator(task, op)?;
        operators.extend(lowered);
    }
    tracing::debug!(operators = operators.len(), "normal form computed");
    task.operators = operators;
    Ok(())
}

/// A conjunction of condition leaves, one disjunct of a DNF.
#[derive(Clone, Default)]
pub struct NormalizedConj {
    pub fluents: Vec<FluentCond>,
    pub numeric: Vec<NumericCond>,
    pub equalities: Vec<EqualityCond>,
    pub preferences: Vec<(String, GoalDesc)>,
}

/// Normalizes a goal description (NNF, quantifier expansion, DNF). `depth`
/// is the number of parameters already in scope. Used for operator
/// conditions, problem goals and preference bodies alike.
pub fn normalize_goal(task: &Task, goal: &GoalDesc, depth: usize) -> Result<Vec<NormalizedConj>> {
    let nnf = to_nnf(goal.clone(), false)?;
    let expanded = expand_quantifiers(task, nnf, depth)?;
    to_dnf(&expanded)
}

impl NormalizedConj {
    fn merge(mut self, other: &NormalizedConj) -> NormalizedConj {
        self.fluents.extend(other.fluents.iter().cloned());
        self.numeric.extend(other.numeric.iter().cloned());
        self.equalities.extend(other.equalities.iter().cloned());
        self.preferences.extend(other.preferences.iter().cloned());
        self
    }
}

fn lower_operator(task: &Task, op: RawOperator) -> Result<Vec<Operator>> {
    let depth = op.params.len();

    // each condition bucket becomes a DNF; operator copies are the cartesian
    // product of the per-bucket disjuncts
    let mut start: Vec<NormalizedConj> = vec![NormalizedConj::default()];
    let mut over_all: Vec<NormalizedConj> = vec![NormalizedConj::default()];
    let mut end: Vec<NormalizedConj> = vec![NormalizedConj::default()];
    for (time, goal) in &op.conditions {
        let nnf = to_nnf(goal.clone(), false)?;
        let expanded = expand_quantifiers(task, nnf, depth)?;
        let dnf = to_dnf(&expanded)?;
        let bucket = match time {
            TimeSpec::AtStart => &mut start,
            TimeSpec::OverAll => &mut over_all,
            TimeSpec::AtEnd => &mut end,
        };
        *bucket = cross(bucket, &dnf)?;
    }

    let mut eff_start = EffSet::default();
    let mut eff_end = EffSet::default();
    let mut conditional = Vec::new();
    for (time, eff) in &op.effects {
        let bucket = match time {
            EffTime::AtStart => &mut eff_start,
            EffTime::AtEnd => &mut eff_end,
        };
        lower_effect(task, eff, depth, *time, bucket, &mut conditional)?;
    }

    let mut result = Vec::new();
    for ((s, o), e) in start
        .iter()
        .cartesian_product(over_all.iter())
        .cartesian_product(end.iter())
    {
        if result.len() >= MAX_SPLITS {
            bail!("operator `{}` expands into too many copies", op.name);
        }
        let mut preferences = Vec::new();
        for conj in [s, o, e] {
            preferences.extend(conj.preferences.iter().cloned());
        }
        result.push(Operator {
            name: op.name.clone(),
            params: op.params.clone(),
            control_params: op.control_params.clone(),
            duration: op.duration.clone(),
            cond_start: conj_to_set(s),
            cond_over_all: conj_to_set(o),
            cond_end: conj_to_set(e),
            eff_start: eff_start.clone(),
            eff_end: eff_end.clone(),
            conditional: conditional.clone(),
            preferences,
        });
    }
    Ok(result)
}

fn conj_to_set(c: &NormalizedConj) -> CondSet {
    CondSet {
        fluents: c.fluents.clone(),
        numeric: c.numeric.clone(),
        equalities: c.equalities.clone(),
    }
}

fn cross(left: &[NormalizedConj], right: &[NormalizedConj]) -> Result<Vec<NormalizedConj>> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            if out.len() >= MAX_SPLITS {
                bail!("disjunctive preconditions expand into too many operator copies");
            }
            out.push(l.clone().merge(r));
        }
    }
    Ok(out)
}

/// Negation normal form: `imply` eliminated, `not` pushed to the leaves.
fn to_nnf(g: GoalDesc, negated: bool) -> Result<GoalDesc> {
    Ok(match g {
        GoalDesc::And(sub) => {
            let sub = sub
                .into_iter()
                .map(|s| to_nnf(s, negated))
                .collect::<Result<Vec<_>>>()?;
            if negated {
                GoalDesc::Or(sub)
            } else {
                GoalDesc::And(sub)
            }
        }
        GoalDesc::Or(sub) => {
            let sub = sub
                .into_iter()
                .map(|s| to_nnf(s, negated))
                .collect::<Result<Vec<_>>>()?;
            if negated {
                GoalDesc::And(sub)
            } else {
                GoalDesc::Or(sub)
            }
        }
        GoalDesc::Not(inner) => to_nnf(*inner, !negated)?,
        GoalDesc::Imply(a, b) => {
            let lhs = to_nnf(*a, !negated)?;
            let rhs = to_nnf(*b, negated)?;
            if negated {
                GoalDesc::And(vec![lhs, rhs])
            } else {
                GoalDesc::Or(vec![lhs, rhs])
            }
        }
        GoalDesc::Forall(params, body) => {
            let body = to_nnf(*body, negated)?;
            if negated {
                GoalDesc::Exists(params, Box::new(body))
            } else {
                GoalDesc::Forall(params, Box::new(body))
            }
        }
        GoalDesc::Exists(params, body) => {
            let body = to_nnf(*body, negated)?;
            if negated {
                GoalDesc::Forall(params, Box::new(body))
            } else {
                GoalDesc::Exists(params, Box::new(body))
            }
        }
        GoalDesc::Fluent(mut c) => {
            if negated {
                // boolean fluents flip their value, object fluents keep a
                // disequality marker for the translator
                if c.value == Term::Obj(TRUE_OBJECT) && !c.negated {
                    c.value = Term::Obj(FALSE_OBJECT);
                } else if c.value == Term::Obj(FALSE_OBJECT) && !c.negated {
                    c.value = Term::Obj(TRUE_OBJECT);
                } else {
                    c.negated = !c.negated;
                }
            }
            GoalDesc::Fluent(c)
        }
        GoalDesc::Numeric(mut c) => {
            if negated {
                c.comp = c.comp.negated();
            }
            GoalDesc::Numeric(c)
        }
        GoalDesc::Equality(mut c) => {
            if negated {
                c.negated = !c.negated;
            }
            GoalDesc::Equality(c)
        }
        GoalDesc::Preference(name, body) => {
            if negated {
                bail!("preference `{name}` under a negation");
            }
            GoalDesc::Preference(name, body)
        }
    })
}

/// Expands `forall` into conjunctions and `exists` into disjunctions over the
/// compatible objects. `depth` is the number of parameters in scope outside
/// the current node.
pub fn expand_quantifiers(task: &Task, g: GoalDesc, depth: usize) -> Result<GoalDesc> {
    Ok(match g {
        GoalDesc::And(sub) => GoalDesc::And(
            sub.into_iter()
                .map(|s| expand_quantifiers(task, s, depth))
                .collect::<Result<Vec<_>>>()?,
        ),
        GoalDesc::Or(sub) => GoalDesc::Or(
            sub.into_iter()
                .map(|s| expand_quantifiers(task, s, depth))
                .collect::<Result<Vec<_>>>()?,
        ),
        GoalDesc::Forall(params, body) => {
            let domains: Vec<Vec<ObjectId>> =
                params.iter().map(|p| task.instances_of(&p.types)).collect();
            let mut sub = Vec::new();
            for combo in domains.iter().multi_cartesian_product_or_single() {
                let s = subst_goal(&body, depth, &combo);
                sub.push(expand_quantifiers(task, s, depth + params.len())?);
            }
            GoalDesc::And(sub)
        }
        GoalDesc::Exists(params, body) => {
            let domains: Vec<Vec<ObjectId>> =
                params.iter().map(|p| task.instances_of(&p.types)).collect();
            let mut sub = Vec::new();
            for combo in domains.iter().multi_cartesian_product_or_single() {
                let s = subst_goal(&body, depth, &combo);
                sub.push(expand_quantifiers(task, s, depth + params.len())?);
            }
            GoalDesc::Or(sub)
        }
        GoalDesc::Not(inner) => {
            GoalDesc::Not(Box::new(expand_quantifiers(task, *inner, depth)?))
        }
        GoalDesc::Imply(a, b) => GoalDesc::Imply(
            Box::new(expand_quantifiers(task, *a, depth)?),
            Box::new(expand_quantifiers(task, *b, depth)?),
        ),
        GoalDesc::Preference(name, body) => {
            // preferences keep their quantifiers, the grounder expands them
            GoalDesc::Preference(name, body)
        }
        leaf @ (GoalDesc::Fluent(_) | GoalDesc::Numeric(_) | GoalDesc::Equality(_)) => leaf,
    })
}

/// Lowers an effect tree into the given bucket, collecting conditional
/// effects separately.
fn lower_effect(
    task: &Task,
    eff: &EffDesc,
    depth: usize,
    time: EffTime,
    bucket: &mut EffSet,
    conditional: &mut Vec<CondEffect>,
) -> Result<()> {
    match eff {
        EffDesc::And(sub) => {
            for e in sub {
                lower_effect(task, e, depth, time, bucket, conditional)?;
            }
        }
        EffDesc::Forall(params, body) => {
            let domains: Vec<Vec<ObjectId>> =
                params.iter().map(|p| task.instances_of(&p.types)).collect();
            for combo in domains.iter().multi_cartesian_product_or_single() {
                let substituted = subst_eff(body, depth, &combo);
                lower_effect(task, &substituted, depth + params.len(), time, bucket, conditional)?;
            }
        }
        EffDesc::When(cond, body) => {
            let nnf = to_nnf(cond.clone(), false)?;
            let expanded = expand_quantifiers(task, nnf, depth)?;
            let dnf = to_dnf(&expanded)?;
            let mut eff_set = EffSet::default();
            let mut nested = Vec::new();
            lower_effect(task, body, depth, time, &mut eff_set, &mut nested)?;
            if !nested.is_empty() {
                bail!("nested conditional effects are not supported");
            }
            for conj in &dnf {
                if !conj.preferences.is_empty() {
                    bail!("preference inside a conditional effect");
                }
                let mut ce = CondEffect::default();
                ce.cond_start = conj_to_set(conj);
                match time {
                    EffTime::AtStart => ce.eff_start = eff_set.clone(),
                    EffTime::AtEnd => ce.eff_end = eff_set.clone(),
                }
                conditional.push(ce);
            }
        }
        EffDesc::TimedWhen(conds, effs) => {
            let mut cond_start: Vec<NormalizedConj> = vec![NormalizedConj::default()];
            let mut cond_end: Vec<NormalizedConj> = vec![NormalizedConj::default()];
            for (t, goal) in conds {
                let nnf = to_nnf(goal.clone(), false)?;
                let expanded = expand_quantifiers(task, nnf, depth)?;
                let dnf = to_dnf(&expanded)?;
                // over-all trigger conditions are checked at the start point
                let target = match t {
                    TimeSpec::AtEnd => &mut cond_end,
                    _ => &mut cond_start,
                };
                *target = cross(target, &dnf)?;
            }
            let mut eff_start = EffSet::default();
            let mut eff_end = EffSet::default();
            let mut nested = Vec::new();
            for (t, e) in effs {
                let b = match t {
                    EffTime::AtStart => &mut eff_start,
                    EffTime::AtEnd => &mut eff_end,
                };
                lower_effect(task, e, depth, *t, b, &mut nested)?;
            }
            if !nested.is_empty() {
                bail!("nested conditional effects are not supported");
            }
            for s in &cond_start {
                for e in &cond_end {
                    if !s.preferences.is_empty() || !e.preferences.is_empty() {
                        bail!("preference inside a conditional effect");
                    }
                    conditional.push(CondEffect {
                        cond_start: conj_to_set(s),
                        cond_end: conj_to_set(e),
                        eff_start: eff_start.clone(),
                        eff_end: eff_end.clone(),
                    });
                }
            }
        }
        EffDesc::Fluent(f) => bucket.fluents.push(f.clone()),
        EffDesc::Numeric(n) => bucket.numeric.push(n.clone()),
    }
    Ok(())
}

/// Substitutes the quantified parameters `[depth, depth + objs.len())` with
/// concrete objects in an effect tree.
fn subst_eff(eff: &EffDesc, depth: usize, objs: &[&ObjectId]) -> EffDesc {
    let subst_term = |t: &Term| -> Term {
        match t {
            Term::Param(i) if *i >= depth && *i < depth + objs.len() => Term::Obj(*objs[*i - depth]),
            other => *other,
        }
    };
    let subst_atom = |a: &Atom| -> Atom {
        Atom {
            func: a.func,
            args: a.args.iter().map(subst_term).collect(),
        }
    };
    match eff {
        EffDesc::And(sub) => EffDesc::And(sub.iter().map(|e| subst_eff(e, depth, objs)).collect()),
        // parameter indices are absolute scope positions, entering a nested
        // quantifier does not shift the substituted range
        EffDesc::Forall(params, body) => {
            EffDesc::Forall(params.clone(), Box::new(subst_eff(body, depth, objs)))
        }
        EffDesc::When(cond, body) => EffDesc::When(
            subst_goal(cond, depth, objs),
            Box::new(subst_eff(body, depth, objs)),
        ),
        EffDesc::TimedWhen(conds, effs) => EffDesc::TimedWhen(
            conds
                .iter()
                .map(|(t, g)| (*t, subst_goal(g, depth, objs)))
                .collect(),
            effs.iter()
                .map(|(t, e)| (*t, subst_eff(e, depth, objs)))
                .collect(),
        ),
        EffDesc::Fluent(f) => EffDesc::Fluent(FluentEff {
            atom: subst_atom(&f.atom),
            value: subst_term(&f.value),
        }),
        EffDesc::Numeric(n) => EffDesc::Numeric(NumericEff {
            op: n.op,
            fluent: subst_atom(&n.fluent),
            expr: subst_num(&n.expr, depth, objs),
        }),
    }
}

/// Substitutes quantified parameters in a goal description.
pub fn subst_goal(g: &GoalDesc, depth: usize, objs: &[&ObjectId]) -> GoalDesc {
    let subst_term = |t: &Term| -> Term {
        match t {
            Term::Param(i) if *i >= depth && *i < depth + objs.len() => Term::Obj(*objs[*i - depth]),
            other => *other,
        }
    };
    let subst_atom = |a: &Atom| -> Atom {
        Atom {
            func: a.func,
            args: a.args.iter().map(subst_term).collect(),
        }
    };
    match g {
        GoalDesc::And(sub) => GoalDesc::And(sub.iter().map(|s| subst_goal(s, depth, objs)).collect()),
        GoalDesc::Or(sub) => GoalDesc::Or(sub.iter().map(|s| subst_goal(s, depth, objs)).collect()),
        GoalDesc::Not(inner) => GoalDesc::Not(Box::new(subst_goal(inner, depth, objs))),
        GoalDesc::Imply(a, b) => GoalDesc::Imply(
            Box::new(subst_goal(a, depth, objs)),
            Box::new(subst_goal(b, depth, objs)),
        ),
        GoalDesc::Forall(params, body) => {
            GoalDesc::Forall(params.clone(), Box::new(subst_goal(body, depth, objs)))
        }
        GoalDesc::Exists(params, body) => {
            GoalDesc::Exists(params.clone(), Box::new(subst_goal(body, depth, objs)))
        }
        GoalDesc::Preference(name, body) => {
            GoalDesc::Preference(name.clone(), Box::new(subst_goal(body, depth, objs)))
        }
        GoalDesc::Fluent(c) => GoalDesc::Fluent(FluentCond {
            atom: subst_atom(&c.atom),
            value: subst_term(&c.value),
            negated: c.negated,
        }),
        GoalDesc::Numeric(c) => GoalDesc::Numeric(NumericCond {
            comp: c.comp,
            left: subst_num(&c.left, depth, objs),
            right: subst_num(&c.right, depth, objs),
        }),
        GoalDesc::Equality(c) => GoalDesc::Equality(EqualityCond {
            left: subst_term(&c.left),
            right: subst_term(&c.right),
            negated: c.negated,
        }),
    }
}

fn subst_num(e: &NumExpr, depth: usize, objs: &[&ObjectId]) -> NumExpr {
    let subst_term = |t: &Term| -> Term {
        match t {
            Term::Param(i) if *i >= depth && *i < depth + objs.len() => Term::Obj(*objs[*i - depth]),
            other => *other,
        }
    };
    match e {
        NumExpr::Fluent(a) => NumExpr::Fluent(Atom {
            func: a.func,
            args: a.args.iter().map(subst_term).collect(),
        }),
        NumExpr::Add(a, b) => NumExpr::Add(
            Box::new(subst_num(a, depth, objs)),
            Box::new(subst_num(b, depth, objs)),
        ),
        NumExpr::Sub(a, b) => NumExpr::Sub(
            Box::new(subst_num(a, depth, objs)),
            Box::new(subst_num(b, depth, objs)),
        ),
        NumExpr::Mul(a, b) => NumExpr::Mul(
            Box::new(subst_num(a, depth, objs)),
            Box::new(subst_num(b, depth, objs)),
        ),
        NumExpr::Div(a, b) => NumExpr::Div(
            Box::new(subst_num(a, depth, objs)),
            Box::new(subst_num(b, depth, objs)),
        ),
        other => other.clone(),
    }
}

/// Disjunctive normal form of a quantifier-free NNF goal.
fn to_dnf(g: &GoalDesc) -> Result<Vec<NormalizedConj>> {
    Ok(match g {
        GoalDesc::And(sub) => {
            let mut acc = vec![NormalizedConj::default()];
            for s in sub {
                let d = to_dnf(s)?;
                acc = cross(&acc, &d)?;
            }
            acc
        }
        GoalDesc::Or(sub) => {
            let mut acc = Vec::new();
            for s in sub {
                acc.extend(to_dnf(s)?);
                if acc.len() > MAX_SPLITS {
                    bail!("disjunction expands into too many cases");
                }
            }
            acc
        }
        GoalDesc::Fluent(c) => vec![NormalizedConj {
            fluents: vec![c.clone()],
            ..Default::default()
        }],
        GoalDesc::Numeric(c) => vec![NormalizedConj {
            numeric: vec![c.clone()],
            ..Default::default()
        }],
        GoalDesc::Equality(c) => vec![NormalizedConj {
            equalities: vec![c.clone()],
            ..Default::default()
        }],
        GoalDesc::Preference(name, body) => vec![NormalizedConj {
            preferences: vec![(name.clone(), (**body).clone())],
            ..Default::default()
        }],
        GoalDesc::Not(_) | GoalDesc::Imply(_, _) => {
            bail!("goal not in negation normal form")
        }
        GoalDesc::Forall(_, _) | GoalDesc::Exists(_, _) => {
            bail!("quantifier not expanded before DNF")
        }
    })
}

/// `multi_cartesian_product` yields nothing on an empty input; effects with
/// zero quantified variables must still fire once.
trait CartesianOrSingle<'a> {
    fn multi_cartesian_product_or_single(self) -> Vec<Vec<&'a ObjectId>>;
}

impl<'a> CartesianOrSingle<'a> for std::slice::Iter<'a, Vec<ObjectId>> {
    fn multi_cartesian_product_or_single(self) -> Vec<Vec<&'a ObjectId>> {
        if self.len() == 0 {
            vec![Vec::new()]
        } else {
            self.map(|v| v.iter()).multi_cartesian_product().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::{parse_domain, Input};

    fn ops(domain: &str) -> (Task, Vec<Operator>) {
        let mut task = Task::new();
        let raw = parse_domain(&mut task, Input::from_string(domain)).unwrap();
        // quantified effects need the objects, declare them as constants
        normalize(&mut task, raw).unwrap();
        let operators = std::mem::take(&mut task.operators);
        (task, operators)
    }

    #[test]
    fn disjunction_splits_operator() {
        let (_, ops) = ops(
            "(define (domain d)
               (:predicates (p) (q) (r))
               (:action a :parameters ()
                 :precondition (or (p) (q))
                 :effect (r)))",
        );
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].cond_start.fluents.len(), 1);
        assert_eq!(ops[1].cond_start.fluents.len(), 1);
    }

    #[test]
    fn imply_becomes_disjunction() {
        let (_, ops) = ops(
            "(define (domain d)
               (:predicates (p) (q) (r))
               (:action a :parameters ()
                 :precondition (imply (p) (q))
                 :effect (r)))",
        );
        // not-p or q
        assert_eq!(ops.len(), 2);
        let negs: Vec<bool> = ops
            .iter()
            .map(|o| o.cond_start.fluents[0].value == Term::Obj(FALSE_OBJECT))
            .collect();
        assert!(negs.contains(&true) && negs.contains(&false));
    }

    #[test]
    fn forall_effect_expands_over_objects() {
        let (_, ops) = ops(
            "(define (domain d)
               (:constants a b - object)
               (:predicates (wet ?x) (raining))
               (:action rain :parameters ()
                 :precondition (raining)
                 :effect (forall (?x) (wet ?x))))",
        );
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].eff_start.fluents.len(), 2);
    }

    #[test]
    fn when_becomes_conditional_effect() {
        let (_, ops) = ops(
            "(define (domain d)
               (:predicates (p) (q) (r))
               (:action a :parameters ()
                 :precondition (p)
                 :effect (when (q) (r))))",
        );
        assert_eq!(ops[0].conditional.len(), 1);
        let ce = &ops[0].conditional[0];
        assert_eq!(ce.cond_start.fluents.len(), 1);
        assert_eq!(ce.eff_start.fluents.len(), 1);
    }
}
