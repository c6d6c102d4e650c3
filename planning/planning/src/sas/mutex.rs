//! Pairwise mutex relation between ground fluent literals.
//!
//! Two literals are mutex when no reachable state makes both hold. The proof
//! is the standard over-approximation refuted to a fixpoint: every
//! cross-fluent pair not jointly true at time 0 starts out mutex, and a pair
//! `(p, q)` loses its mutex as soon as some reachable action can add `p`
//! while leaving `q` true. Conditional adds count as adds; conditional
//! deletes are ignored (they may not fire).

use super::LiteralUniverse;
use crate::grounding::{GroundedTask, VarId};
use crate::model::{ObjectId, FALSE_OBJECT, TRUE_OBJECT};
use fixedbitset::FixedBitSet;

pub struct MutexGraph {
    n: usize,
    bits: FixedBitSet,
    /// Fluent of each literal, for the implicit intra-fluent exclusivity.
    fluent_of: Vec<VarId>,
}

impl MutexGraph {
    pub fn are_mutex(&self, a: u32, b: u32) -> bool {
        let (a, b) = (a as usize, b as usize);
        if self.fluent_of[a] == self.fluent_of[b] {
            // a fluent holds exactly one value at a time
            return a != b;
        }
        self.bits.contains(a * self.n + b)
    }

    fn clear(&mut self, a: u32, b: u32) -> bool {
        let (a, b) = (a as usize, b as usize);
        let was = self.bits.contains(a * self.n + b);
        self.bits.set(a * self.n + b, false);
        self.bits.set(b * self.n + a, false);
        was
    }

    /// All literal pairs `(a, b)` with `a < b` that are mutex across
    /// different fluents.
    pub fn cross_pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.n as u32).flat_map(move |a| {
            ((a + 1)..self.n as u32).filter_map(move |b| {
                if self.fluent_of[a as usize] != self.fluent_of[b as usize]
                    && self.bits.contains(a as usize * self.n + b as usize)
                {
                    Some((a, b))
                } else {
                    None
                }
            })
        })
    }
}

/// Effects of one action flattened for the mutex fixpoint.
struct ActionView {
    /// Literal ids the action may make true (conditional included).
    adds: Vec<u32>,
    /// Fluents unconditionally assigned, with the assigned value.
    assigns: Vec<(VarId, ObjectId)>,
    /// Positive preconditions (literal ids) across all buckets.
    precs: Vec<u32>,
}

pub fn compute(g: &GroundedTask, universe: &LiteralUniverse) -> MutexGraph {
    let n = universe.len();
    let mut graph = MutexGraph {
        n,
        bits: FixedBitSet::with_capacity(n * n),
        fluent_of: universe.literals.iter().map(|&(f, _)| f).collect(),
    };

    // the literals holding at time 0 (TILs not included, they hold later and
    // their pseudo-actions participate below)
    let holds_initially = |lit: u32| -> bool {
        let (f, v) = universe.literals[lit as usize];
        let init = g.init[usize::from(f)];
        init == v || (v == FALSE_OBJECT && init == FALSE_OBJECT)
    };

    for a in 0..n as u32 {
        for b in (a + 1)..n as u32 {
            if graph.fluent_of[a as usize] == graph.fluent_of[b as usize] {
                continue;
            }
            if !(holds_initially(a) && holds_initially(b)) {
                graph.bits.insert(a as usize * n + b as usize);
                graph.bits.insert(b as usize * n + a as usize);
            }
        }
    }

    let mut views: Vec<ActionView> = g.actions.iter().map(|a| action_view(g, universe, a)).collect();
    // TILs add their literal unconditionally and require nothing
    for til in &g.tils {
        let mut adds = Vec::new();
        if let Some(l) = universe.lit(til.var, til.value) {
            adds.push(l);
        }
        views.push(ActionView {
            adds,
            assigns: vec![(til.var, til.value)],
            precs: Vec::new(),
        });
    }

    // refute to fixpoint
    let mut changed = true;
    while changed {
        changed = false;
        for view in &views {
            for &p in &view.adds {
                for q in 0..n as u32 {
                    if graph.fluent_of[p as usize] == graph.fluent_of[q as usize] {
                        continue;
                    }
                    if !graph.are_mutex(p, q) {
                        continue;
                    }
                    if leaves_true(&graph, universe, view, q) {
                        changed |= graph.clear(p, q);
                    }
                }
            }
        }
    }
    tracing::debug!(
        literals = n,
        mutex_pairs = graph.cross_pairs().count(),
        "mutex fixpoint reached"
    );
    graph
}

/// Whether the action can terminate with `q` true: it adds `q`, or it leaves
/// `q`'s fluent alone and can be applied while `q` holds.
fn leaves_true(graph: &MutexGraph, universe: &LiteralUniverse, view: &ActionView, q: u32) -> bool {
    if view.adds.contains(&q) {
        return true;
    }
    let (qf, qv) = universe.literals[q as usize];
    for &(f, v) in &view.assigns {
        if f == qf {
            // the fluent is rewritten; q survives only if rewritten to q
            // (boolean deletes write the complement)
            return v == qv;
        }
    }
    // fluent untouched: applicable in a state where q holds?
    view.precs.iter().all(|&r| !graph.are_mutex(r, q))
}

fn action_view(
    _g: &GroundedTask,
    universe: &LiteralUniverse,
    a: &crate::grounding::GroundAction,
) -> ActionView {
    let mut adds = Vec::new();
    let mut assigns = Vec::new();
    for e in a.eff_start.iter().chain(a.eff_end.iter()) {
        if let Some(l) = universe.lit(e.var, e.value) {
            adds.push(l);
        }
        assigns.push((e.var, e.value));
    }
    for ce in &a.conditional {
        for e in ce.eff_start.iter().chain(ce.eff_end.iter()) {
            if let Some(l) = universe.lit(e.var, e.value) {
                adds.push(l);
            }
            // conditional assignments are not guaranteed, so not in `assigns`
        }
    }
    let mut precs = Vec::new();
    for c in a
        .cond_start
        .iter()
        .chain(a.cond_over_all.iter())
        .chain(a.cond_end.iter())
    {
        if c.negated {
            continue;
        }
        if let Some(l) = universe.lit(c.var, c.value) {
            precs.push(l);
        }
    }
    ActionView {
        adds,
        assigns,
        precs,
    }
}

#[cfg(test)]
mod tests {
    use super::super::LiteralUniverse;
    use super::*;
    use crate::grounding::statics::remove_static_variables;
    use crate::grounding::tests::build;
    use crate::model::TRUE_OBJECT;

    const DOM: &str = "(define (domain d)
      (:types loc)
      (:predicates (at ?l - loc) (flag))
      (:action go :parameters (?a ?b - loc)
        :precondition (at ?a)
        :effect (and (not (at ?a)) (at ?b)))
      (:action raise :parameters ()
        :precondition (and)
        :effect (flag)))";

    const PB: &str = "(define (problem p) (:domain d)
      (:objects x y - loc)
      (:init (at x))
      (:goal (and (at y) (flag))))";

    #[test]
    fn positions_are_mutex_but_flag_is_not() {
        let mut g = build(DOM, PB);
        remove_static_variables(&mut g);
        let u = LiteralUniverse::build(&g);
        let graph = compute(&g, &u);
        let lit = |name: &str| {
            let idx = (0..g.fluents.len())
                .find(|&i| g.fluent_name(crate::grounding::VarId(i as u32)) == name)
                .unwrap();
            u.lit(crate::grounding::VarId(idx as u32), TRUE_OBJECT).unwrap()
        };
        let at_x = lit("(at x)");
        let at_y = lit("(at y)");
        let flag = lit("(flag)");
        assert!(graph.are_mutex(at_x, at_y));
        assert!(!graph.are_mutex(at_x, flag));
        assert!(!graph.are_mutex(at_y, flag));
    }
}
