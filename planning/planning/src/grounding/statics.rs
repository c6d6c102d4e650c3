//! Static-fluent analysis: a fluent no reachable effect ever writes keeps its
//! initial value forever. Conditions on such fluents are decided now and
//! folded away; actions contradicting static data are dropped.

use super::*;
use crate::model::Comparator;
use fixedbitset::FixedBitSet;

/// Folds static fluents into the task. Fluent ids stay stable; the static
/// ones are recorded in `GroundedTask::static_fluents` and carry no SAS
/// variable later on.
pub fn remove_static_variables(g: &mut GroundedTask) {
    let mut touched = FixedBitSet::with_capacity(g.fluents.len());
    let mut num_touched = FixedBitSet::with_capacity(g.num_fluents.len());
    for a in &g.actions {
        for e in a.eff_start.iter().chain(a.eff_end.iter()) {
            touched.insert(usize::from(e.var));
        }
        for e in a.num_eff_start.iter().chain(a.num_eff_end.iter()) {
            num_touched.insert(usize::from(e.var));
        }
        for ce in &a.conditional {
            for e in ce.eff_start.iter().chain(ce.eff_end.iter()) {
                touched.insert(usize::from(e.var));
            }
            for e in ce.num_eff_start.iter().chain(ce.num_eff_end.iter()) {
                num_touched.insert(usize::from(e.var));
            }
        }
    }
    for til in &g.tils {
        touched.insert(usize::from(til.var));
    }

    let is_static = |v: VarId| !touched.contains(usize::from(v));
    let is_static_num = |v: NumVarId| !num_touched.contains(usize::from(v));

    let init = g.init.clone();
    let num_init = g.num_init.clone();

    // decide a condition on a static fluent: Some(true) holds forever,
    // Some(false) never holds, None not static
    let decide = |c: &GroundCond| -> Option<bool> {
        if is_static(c.var) {
            Some((init[usize::from(c.var)] == c.value) != c.negated)
        } else {
            None
        }
    };

    let fold_conds = |conds: &mut Vec<GroundCond>| -> bool {
        let mut dead = false;
        conds.retain(|c| match decide(c) {
            Some(true) => false,
            Some(false) => {
                dead = true;
                true
            }
            None => true,
        });
        !dead
    };

    let fold_num = |conds: &mut Vec<GroundNumCond>| -> bool {
        let mut dead = false;
        conds.retain_mut(|c| {
            c.left = fold_expr(&c.left, &is_static_num, &num_init);
            c.right = fold_expr(&c.right, &is_static_num, &num_init);
            match (const_value(&c.left), const_value(&c.right)) {
                (Some(l), Some(r)) => {
                    if holds(c.comp, l, r) {
                        false
                    } else {
                        dead = true;
                        true
                    }
                }
                _ => true,
            }
        });
        !dead
    };

    let mut kept = Vec::new();
    let before = g.actions.len();
    for mut a in std::mem::take(&mut g.actions) {
        let alive = fold_conds(&mut a.cond_start)
            && fold_conds(&mut a.cond_over_all)
            && fold_conds(&mut a.cond_end)
            && fold_num(&mut a.num_cond_start)
            && fold_num(&mut a.num_cond_over_all)
            && fold_num(&mut a.num_cond_end);
        if !alive {
            continue;
        }
        for d in &mut a.duration {
            d.expr = fold_expr(&d.expr, &is_static_num, &num_init);
        }
        for e in a.num_eff_start.iter_mut().chain(a.num_eff_end.iter_mut()) {
            e.expr = fold_expr(&e.expr, &is_static_num, &num_init);
        }
        // a conditional effect with a statically false condition never fires
        a.conditional.retain_mut(|ce| {
            fold_conds(&mut ce.cond_start)
                && fold_conds(&mut ce.cond_end)
                && fold_num(&mut ce.num_cond_start)
                && fold_num(&mut ce.num_cond_end)
        });
        for ce in &mut a.conditional {
            for e in ce.num_eff_start.iter_mut().chain(ce.num_eff_end.iter_mut()) {
                e.expr = fold_expr(&e.expr, &is_static_num, &num_init);
            }
        }
        a.index = kept.len();
        kept.push(a);
    }
    g.actions = kept;

    g.goal.retain_mut(|conj| fold_conds(&mut conj.conds) && fold_num(&mut conj.num_conds));
    for p in &mut g.preferences {
        p.goal
            .retain_mut(|conj| fold_conds(&mut conj.conds) && fold_num(&mut conj.num_conds));
    }
    if let Some(m) = &mut g.metric {
        m.expr = fold_metric(&m.expr, &is_static_num, &num_init);
    }

    let mut statics = FixedBitSet::with_capacity(g.fluents.len());
    for v in 0..g.fluents.len() {
        if !touched.contains(v) {
            statics.insert(v);
        }
    }
    tracing::debug!(
        static_fluents = statics.count_ones(..),
        dropped_actions = before - g.actions.len(),
        "static folding done"
    );
    g.static_fluents = statics;
}

fn holds(comp: Comparator, l: f64, r: f64) -> bool {
    match comp {
        Comparator::Eq => l == r,
        Comparator::Neq => l != r,
        Comparator::Less => l < r,
        Comparator::LessEq => l <= r,
        Comparator::Greater => l > r,
        Comparator::GreaterEq => l >= r,
    }
}

fn fold_expr(
    e: &GroundNumExpr,
    is_static_num: &dyn Fn(NumVarId) -> bool,
    num_init: &[f64],
) -> GroundNumExpr {
    let bin = |a: &GroundNumExpr, b: &GroundNumExpr| {
        (
            Box::new(fold_expr(a, is_static_num, num_init)),
            Box::new(fold_expr(b, is_static_num, num_init)),
        )
    };
    match e {
        GroundNumExpr::Var(v) if is_static_num(*v) => {
            GroundNumExpr::Number(num_init[usize::from(*v)])
        }
        GroundNumExpr::Add(a, b) => {
            let (a, b) = bin(a, b);
            match (const_value(&a), const_value(&b)) {
                (Some(x), Some(y)) => GroundNumExpr::Number(x + y),
                _ => GroundNumExpr::Add(a, b),
            }
        }
        GroundNumExpr::Sub(a, b) => {
            let (a, b) = bin(a, b);
            match (const_value(&a), const_value(&b)) {
                (Some(x), Some(y)) => GroundNumExpr::Number(x - y),
                _ => GroundNumExpr::Sub(a, b),
            }
        }
        GroundNumExpr::Mul(a, b) => {
            let (a, b) = bin(a, b);
            match (const_value(&a), const_value(&b)) {
                (Some(x), Some(y)) => GroundNumExpr::Number(x * y),
                _ => GroundNumExpr::Mul(a, b),
            }
        }
        GroundNumExpr::Div(a, b) => {
            let (a, b) = bin(a, b);
            match (const_value(&a), const_value(&b)) {
                (Some(x), Some(y)) if y != 0.0 => GroundNumExpr::Number(x / y),
                _ => GroundNumExpr::Div(a, b),
            }
        }
        other => other.clone(),
    }
}

/// The value of a constant expression, `None` if it mentions any variable.
pub fn const_value(e: &GroundNumExpr) -> Option<f64> {
    match e {
        GroundNumExpr::Number(n) => Some(*n),
        _ => None,
    }
}

fn fold_metric(
    e: &GroundMetricExpr,
    is_static_num: &dyn Fn(NumVarId) -> bool,
    num_init: &[f64],
) -> GroundMetricExpr {
    match e {
        GroundMetricExpr::Var(v) if is_static_num(*v) => {
            GroundMetricExpr::Number(num_init[usize::from(*v)])
        }
        GroundMetricExpr::Add(sub) => GroundMetricExpr::Add(
            sub.iter().map(|s| fold_metric(s, is_static_num, num_init)).collect(),
        ),
        GroundMetricExpr::Mul(sub) => GroundMetricExpr::Mul(
            sub.iter().map(|s| fold_metric(s, is_static_num, num_init)).collect(),
        ),
        GroundMetricExpr::Sub(a, b) => GroundMetricExpr::Sub(
            Box::new(fold_metric(a, is_static_num, num_init)),
            Box::new(fold_metric(b, is_static_num, num_init)),
        ),
        GroundMetricExpr::Div(a, b) => GroundMetricExpr::Div(
            Box::new(fold_metric(a, is_static_num, num_init)),
            Box::new(fold_metric(b, is_static_num, num_init)),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::build;
    use super::*;

    const DOM: &str = "(define (domain d)
      (:requirements :strips :typing :numeric-fluents)
      (:types truck location)
      (:predicates (at ?t - truck ?l - location) (link ?a ?b - location))
      (:functions (speed ?t - truck) (fuel ?t - truck))
      (:action drive :parameters (?t - truck ?a ?b - location)
        :precondition (and (at ?t ?a) (link ?a ?b) (>= (speed ?t) 1))
        :effect (and (not (at ?t ?a)) (at ?t ?b)
                     (decrease (fuel ?t) 1))))";

    const PB: &str = "(define (problem p) (:domain d)
      (:objects tr - truck a b c - location)
      (:init (at tr a) (link a b) (link b c) (= (speed tr) 2) (= (fuel tr) 9))
      (:goal (at tr c)))";

    #[test]
    fn static_conditions_are_folded() {
        let mut g = build(DOM, PB);
        let before: Vec<usize> = g.actions.iter().map(|a| a.cond_start.len()).collect();
        assert!(before.iter().all(|&n| n == 2), "{before:?}");
        remove_static_variables(&mut g);
        // `link` is static and `speed` constant: both conditions disappear
        for a in &g.actions {
            assert_eq!(a.cond_start.len(), 1, "{}", a.display_name(&g.lifted));
            assert!(a.num_cond_start.is_empty());
        }
        // only links a->b and b->c survive
        assert_eq!(g.actions.len(), 2);
    }

    #[test]
    fn fuel_stays_dynamic() {
        let mut g = build(DOM, PB);
        remove_static_variables(&mut g);
        for a in &g.actions {
            assert_eq!(a.num_eff_start.len(), 1);
            assert!(matches!(
                a.num_eff_start[0].expr,
                GroundNumExpr::Number(n) if n == 1.0
            ));
        }
    }
}
