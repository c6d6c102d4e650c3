//! SAS translation: partitions the ground boolean literals into multi-valued
//! variables backed by the mutex graph, and rewrites every action over them.
//!
//! Object-valued fluents become multi-valued variables directly (their values
//! are exclusive by construction). Boolean literals of the same function are
//! covered greedily with mutex cliques; a clique is only kept when every
//! delete of a member is accompanied by a sibling add at the same time point,
//! or the variable owns a `none-of-those` value to fall back to.

use super::mutex::MutexGraph;
use super::*;
use crate::grounding::{GroundAction, GroundCond, GroundCondEffect, GroundEff, GroundTil, VarId};
use crate::model::{FunctionId, ObjectId, ValueKind, FALSE_OBJECT, TRUE_OBJECT};
use anyhow::{bail, Result};
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use std::io::Write as _;
use std::path::Path;

/// Limit on action copies produced by disequality expansion.
const MAX_ACTION_SPLITS: usize = 256;

pub struct TranslateOptions {
    /// Skip literal grouping: every fluent keeps its own variable.
    pub no_sas: bool,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        TranslateOptions { no_sas: false }
    }
}

pub fn translate(g: GroundedTask, options: &TranslateOptions) -> Result<SasTask> {
    let universe = LiteralUniverse::build(&g);
    let graph = mutex::compute(&g, &universe);
    let mut t = Translator {
        g,
        universe,
        graph,
        variables: Vec::new(),
        initial_state: Vec::new(),
        lit_map: HashMap::new(),
        none_of: HashMap::new(),
    };
    t.build_variables(options.no_sas)?;
    t.finish()
}

struct Translator {
    g: GroundedTask,
    universe: LiteralUniverse,
    graph: MutexGraph,
    variables: Vec<SasVariable>,
    initial_state: Vec<u16>,
    /// literal `(fluent, value)` -> its `(variable, value index)`.
    lit_map: HashMap<(VarId, ObjectId), SasCondition>,
    /// `none-of-those` index of variables that have one.
    none_of: HashMap<SasVarId, u16>,
}

impl Translator {
    fn push_variable(&mut self, name: String, values: Vec<SasValue>, initial: u16) -> SasVarId {
        assert!(self.variables.len() < u16::MAX as usize, "too many variables");
        assert!(values.len() < u16::MAX as usize, "domain too large");
        let var = SasVarId(self.variables.len() as u32);
        for (i, v) in values.iter().enumerate() {
            if let SasValue::Literal { fluent, value } = v {
                self.lit_map
                    .insert((*fluent, *value), SasCondition { var, val: i as u16 });
            } else {
                self.none_of.insert(var, i as u16);
            }
        }
        self.variables.push(SasVariable { name, values });
        self.initial_state.push(initial);
        var
    }

    fn build_variables(&mut self, no_sas: bool) -> Result<()> {
        let num_fluents = self.g.fluents.len();
        let mut covered = vec![false; num_fluents];

        // object-valued fluents first: already multi-valued
        for f in 0..num_fluents {
            if self.g.static_fluents.contains(f) {
                covered[f] = true;
                continue;
            }
            let func = self.g.fluents[f].func;
            if self.g.lifted.functions[usize::from(func)].value == ValueKind::Boolean {
                continue;
            }
            let fluent = VarId(f as u32);
            let observed = self.universe.values_of[f].clone();
            let init = self.g.init[f];
            let mut values: Vec<SasValue> = observed
                .iter()
                .map(|&value| SasValue::Literal { fluent, value })
                .collect();
            let initial = if init == FALSE_OBJECT {
                values.push(SasValue::NoneOfThose);
                (values.len() - 1) as u16
            } else {
                observed.iter().position(|&v| v == init).unwrap() as u16
            };
            let name = self.g.fluent_name(fluent);
            self.push_variable(name, values, initial);
            covered[f] = true;
        }

        // boolean literals: greedy clique cover per function
        if !no_sas {
            let mut by_func: HashMap<crate::model::FunctionId, Vec<VarId>> = HashMap::new();
            for f in 0..num_fluents {
                if covered[f] {
                    continue;
                }
                by_func
                    .entry(self.g.fluents[f].func)
                    .or_default()
                    .push(VarId(f as u32));
            }
            let funcs: Vec<_> = by_func.keys().copied().sorted().collect();
            for func in funcs {
                let members = by_func[&func].clone();
                let mut grouped = vec![false; members.len()];
                for i in 0..members.len() {
                    if grouped[i] {
                        continue;
                    }
                    let mut clique = vec![members[i]];
                    let mut clique_pos = vec![i];
                    for (j, &cand) in members.iter().enumerate().skip(i + 1) {
                        if grouped[j] {
                            continue;
                        }
                        let cl = self.universe.lit(cand, TRUE_OBJECT).unwrap();
                        let all_mutex = clique.iter().all(|&m| {
                            let ml = self.universe.lit(m, TRUE_OBJECT).unwrap();
                            self.graph.are_mutex(ml, cl)
                        });
                        if all_mutex {
                            clique.push(cand);
                            clique_pos.push(j);
                        }
                    }
                    if clique.len() > 1 && self.clique_is_groupable(&clique) {
                        let initially_true = clique
                            .iter()
                            .position(|&m| self.g.init[usize::from(m)] == TRUE_OBJECT);
                        let mut values: Vec<SasValue> = clique
                            .iter()
                            .map(|&fluent| SasValue::Literal {
                                fluent,
                                value: TRUE_OBJECT,
                            })
                            .collect();
                        let initial = match initially_true {
                            Some(k) => k as u16,
                            None => {
                                values.push(SasValue::NoneOfThose);
                                (values.len() - 1) as u16
                            }
                        };
                        let name = clique.iter().map(|&m| self.g.fluent_name(m)).join(":");
                        self.push_variable(name, values, initial);
                        for &p in &clique_pos {
                            grouped[p] = true;
                        }
                        for &m in &clique {
                            covered[usize::from(m)] = true;
                        }
                    }
                }
            }
        }

        // whatever remains keeps a plain boolean variable
        for f in 0..num_fluents {
            if covered[f] {
                continue;
            }
            let fluent = VarId(f as u32);
            let values = vec![
                SasValue::Literal {
                    fluent,
                    value: TRUE_OBJECT,
                },
                SasValue::Literal {
                    fluent,
                    value: FALSE_OBJECT,
                },
            ];
            let initial = if self.g.init[f] == TRUE_OBJECT { 0 } else { 1 };
            let name = self.g.fluent_name(fluent);
            self.push_variable(name, values, initial);
        }
        tracing::debug!(variables = self.variables.len(), "SAS variables inferred");
        Ok(())
    }

    /// A clique can become one variable iff every unconditional delete of a
    /// member at some time point comes with a sibling add at the same point,
    /// or the group will own a `none-of-those` value (no member holds
    /// initially). Conditional deletes always need the sibling add.
    fn clique_is_groupable(&self, clique: &[VarId]) -> bool {
        let has_none = clique
            .iter()
            .all(|&m| self.g.init[usize::from(m)] != TRUE_OBJECT);
        let is_member = |v: VarId| clique.contains(&v);
        let point_ok = |effs: &[GroundEff], guaranteed: bool| -> bool {
            let deletes = effs
                .iter()
                .any(|e| is_member(e.var) && e.value == FALSE_OBJECT);
            let adds = effs
                .iter()
                .filter(|e| is_member(e.var) && e.value == TRUE_OBJECT)
                .count();
            if adds > 1 {
                return false; // two members cannot hold together
            }
            if deletes && adds == 0 {
                // falls back to none-of-those, only sound for sure-fire effects
                guaranteed && has_none
            } else {
                true
            }
        };
        for a in &self.g.actions {
            if !point_ok(&a.eff_start, true) || !point_ok(&a.eff_end, true) {
                return false;
            }
            for ce in &a.conditional {
                if !point_ok(&ce.eff_start, false) || !point_ok(&ce.eff_end, false) {
                    return false;
                }
            }
        }
        for til in &self.g.tils {
            let eff = [GroundEff {
                var: til.var,
                value: til.value,
            }];
            if !point_ok(&eff, true) {
                return false;
            }
        }
        true
    }

    /// Rewrites one condition into its alternatives. A positive literal maps
    /// to a single `(var, val)`; a disequality expands to every other value
    /// of the variable.
    fn rewrite_cond(&self, c: &GroundCond) -> Result<Vec<SasCondition>> {
        let func = self.g.fluents[usize::from(c.var)].func;
        let boolean = self.g.lifted.functions[usize::from(func)].value == ValueKind::Boolean;
        // normalize boolean negation to a value flip
        let (value, negated) = if boolean && c.negated {
            let flipped = if c.value == TRUE_OBJECT {
                FALSE_OBJECT
            } else {
                TRUE_OBJECT
            };
            (flipped, false)
        } else {
            (c.value, c.negated)
        };

        if !negated {
            if let Some(&sc) = self.lit_map.get(&(c.var, value)) {
                return Ok(vec![sc]);
            }
            // boolean false of a grouped member: any sibling value works
            if boolean && value == FALSE_OBJECT {
                let member = self
                    .lit_map
                    .get(&(c.var, TRUE_OBJECT))
                    .expect("boolean literal not mapped");
                return Ok(self.all_values_but(member.var, member.val));
            }
            bail!(
                "condition on unobserved value of {}",
                self.g.fluent_name(c.var)
            );
        }
        // disequality on an object fluent
        let Some(&sc) = self.lit_map.get(&(c.var, value)) else {
            // the excluded value can never hold, the condition is free
            return Ok(Vec::new());
        };
        Ok(self.all_values_but(sc.var, sc.val))
    }

    fn all_values_but(&self, var: SasVarId, excluded: u16) -> Vec<SasCondition> {
        (0..self.variables[usize::from(var)].values.len() as u16)
            .filter(|&v| v != excluded)
            .map(|val| SasCondition { var, val })
            .collect()
    }

    /// Rewrites a condition list into the cartesian product of the
    /// per-condition alternatives (usually a single combination).
    fn rewrite_conds(&self, conds: &[GroundCond]) -> Result<Vec<Vec<SasCondition>>> {
        let mut combos: Vec<Vec<SasCondition>> = vec![Vec::new()];
        for c in conds {
            let alts = self.rewrite_cond(c)?;
            if alts.is_empty() {
                if c.negated {
                    continue; // trivially satisfied disequality
                }
                bail!("unsatisfiable condition");
            }
            let mut next = Vec::with_capacity(combos.len() * alts.len());
            for combo in &combos {
                for &alt in &alts {
                    if next.len() > MAX_ACTION_SPLITS {
                        bail!("disequality expansion produces too many action copies");
                    }
                    let mut c2 = combo.clone();
                    c2.push(alt);
                    next.push(c2);
                }
            }
            combos = next;
        }
        Ok(combos)
    }

    /// Rewrites the effects at one time point. Deletes of grouped members are
    /// dropped when a sibling add at the same point implies them, and map to
    /// `none-of-those` otherwise.
    fn rewrite_effs(&self, effs: &[GroundEff]) -> Vec<SasCondition> {
        let mut out = Vec::with_capacity(effs.len());
        for e in effs {
            if let Some(&sc) = self.lit_map.get(&(e.var, e.value)) {
                out.push(sc);
                continue;
            }
            let func = self.g.fluents[usize::from(e.var)].func;
            let boolean = self.g.lifted.functions[usize::from(func)].value == ValueKind::Boolean;
            if boolean && e.value == FALSE_OBJECT {
                let member = self
                    .lit_map
                    .get(&(e.var, TRUE_OBJECT))
                    .expect("boolean literal not mapped");
                // PDDL applies deletes before adds: any add on the same
                // variable (sibling or the member itself) wins over the delete
                let sibling_add = effs.iter().any(|other| {
                    other.value == TRUE_OBJECT
                        && self
                            .lit_map
                            .get(&(other.var, TRUE_OBJECT))
                            .is_some_and(|sc| sc.var == member.var)
                });
                if sibling_add {
                    continue;
                }
                let none = self.none_of.get(&member.var).copied()
                    .expect("delete without sibling add in a group without none-of-those");
                out.push(SasCondition {
                    var: member.var,
                    val: none,
                });
            } else {
                unreachable!("effect value not observed by the literal universe");
            }
        }
        // a variable written twice at one point keeps the last write only
        let mut dedup: Vec<SasCondition> = Vec::with_capacity(out.len());
        for sc in out.into_iter().rev() {
            if !dedup.iter().any(|d| d.var == sc.var) {
                dedup.push(sc);
            }
        }
        dedup.reverse();
        dedup
    }

    fn rewrite_action(&self, a: &GroundAction, out: &mut Vec<SasAction>) -> Result<()> {
        let start_combos = self.rewrite_conds(&a.cond_start)?;
        let over_combos = self.rewrite_conds(&a.cond_over_all)?;
        let end_combos = self.rewrite_conds(&a.cond_end)?;
        if start_combos.len() * over_combos.len() * end_combos.len() > MAX_ACTION_SPLITS {
            bail!("action `{}` splits into too many copies", a.op_name);
        }

        let eff_start = self.rewrite_effs(&a.eff_start);
        let eff_end = self.rewrite_effs(&a.eff_end);
        let mut conditional = Vec::new();
        for ce in &a.conditional {
            conditional.extend(self.rewrite_cond_effect(ce)?);
        }

        for s in &start_combos {
            for o in &over_combos {
                for e in &end_combos {
                    out.push(SasAction {
                        index: 0,
                        name: a.display_name(&self.g.lifted),
                        duration: a.duration.clone(),
                        num_control_vars: a.num_control_vars,
                        cond_start: s.clone(),
                        cond_over_all: o.clone(),
                        cond_end: e.clone(),
                        num_cond_start: a.num_cond_start.clone(),
                        num_cond_over_all: a.num_cond_over_all.clone(),
                        num_cond_end: a.num_cond_end.clone(),
                        eff_start: eff_start.clone(),
                        eff_end: eff_end.clone(),
                        num_eff_start: a.num_eff_start.clone(),
                        num_eff_end: a.num_eff_end.clone(),
                        conditional: conditional.clone(),
                        is_til: false,
                        til_time: 0.0,
                        is_goal: false,
                        cost: None,
                    });
                }
            }
        }
        Ok(())
    }

    fn rewrite_cond_effect(&self, ce: &GroundCondEffect) -> Result<Vec<SasCondEffect>> {
        let starts = self.rewrite_conds(&ce.cond_start)?;
        let ends = self.rewrite_conds(&ce.cond_end)?;
        let eff_start = self.rewrite_effs(&ce.eff_start);
        let eff_end = self.rewrite_effs(&ce.eff_end);
        let mut out = Vec::new();
        for s in &starts {
            for e in &ends {
                out.push(SasCondEffect {
                    cond_start: s.clone(),
                    num_cond_start: ce.num_cond_start.clone(),
                    cond_end: e.clone(),
                    num_cond_end: ce.num_cond_end.clone(),
                    eff_start: eff_start.clone(),
                    num_eff_start: ce.num_eff_start.clone(),
                    eff_end: eff_end.clone(),
                    num_eff_end: ce.num_eff_end.clone(),
                });
            }
        }
        Ok(out)
    }

    fn finish(mut self) -> Result<SasTask> {
        let mut actions = Vec::new();
        let ground_actions = std::mem::take(&mut self.g.actions);
        for a in &ground_actions {
            self.rewrite_action(a, &mut actions)?;
        }
        self.g.actions = ground_actions;

        // metric-driven costs: constant increases of the metric fluent
        if let Some(metric) = &self.g.metric {
            if let crate::grounding::GroundMetricExpr::Var(mv) = metric.expr {
                for a in &mut actions {
                    let inc: Option<f64> = a
                        .num_eff_start
                        .iter()
                        .chain(a.num_eff_end.iter())
                        .find(|e| {
                            e.var == mv && e.op == crate::model::AssignOp::Increase
                        })
                        .and_then(|e| match &e.expr {
                            crate::grounding::GroundNumExpr::Number(n) => Some(*n),
                            _ => None,
                        });
                    a.cost = inc;
                }
            }
        }

        for (i, a) in actions.iter_mut().enumerate() {
            a.index = i;
        }

        let mut til_actions = Vec::new();
        let tils = self.g.tils.clone();
        for (i, til) in tils.iter().enumerate() {
            til_actions.push(self.til_action(i, til));
        }

        let mut goal_actions = Vec::new();
        let goal = self.g.goal.clone();
        for conj in &goal {
            let combos = self.rewrite_conds(&conj.conds)?;
            for combo in combos {
                goal_actions.push(SasAction {
                    index: goal_actions.len(),
                    name: "#goal".to_string(),
                    duration: Vec::new(),
                    num_control_vars: 0,
                    cond_start: Vec::new(),
                    cond_over_all: Vec::new(),
                    cond_end: combo,
                    num_cond_start: Vec::new(),
                    num_cond_over_all: Vec::new(),
                    num_cond_end: conj.num_conds.clone(),
                    eff_start: Vec::new(),
                    eff_end: Vec::new(),
                    num_eff_start: Vec::new(),
                    num_eff_end: Vec::new(),
                    conditional: Vec::new(),
                    is_til: false,
                    til_time: 0.0,
                    is_goal: true,
                    cost: None,
                });
            }
        }

        let mut preferences = Vec::new();
        let ground_prefs = self.g.preferences.clone();
        for p in &ground_prefs {
            let mut disjuncts = Vec::new();
            for conj in &p.goal {
                for combo in self.rewrite_conds(&conj.conds)? {
                    disjuncts.push((combo, conj.num_conds.clone()));
                }
            }
            preferences.push(SasPreference {
                name: p.name.clone(),
                goal: disjuncts,
            });
        }

        // permanent mutexes between values of different variables
        let mut permanent_mutex = HashSet::new();
        for (la, lb) in self.graph.cross_pairs() {
            let (fa, va) = self.universe.literals[la as usize];
            let (fb, vb) = self.universe.literals[lb as usize];
            let (Some(&a), Some(&b)) = (self.lit_map.get(&(fa, va)), self.lit_map.get(&(fb, vb)))
            else {
                continue;
            };
            if a.var == b.var {
                continue; // implied by the exactly-one invariant
            }
            let (x, y) = (a.var_val().raw(), b.var_val().raw());
            permanent_mutex.insert(if x < y { (x, y) } else { (y, x) });
        }

        // reverse indexes over ordinary actions
        let mut producers: Vec<Vec<Vec<usize>>> = self
            .variables
            .iter()
            .map(|v| vec![Vec::new(); v.values.len()])
            .collect();
        let mut requirers = producers.clone();
        for a in &actions {
            for e in a.eff_start.iter().chain(a.eff_end.iter()).chain(
                a.conditional
                    .iter()
                    .flat_map(|c| c.eff_start.iter().chain(c.eff_end.iter())),
            ) {
                let list = &mut producers[usize::from(e.var)][e.val as usize];
                if list.last() != Some(&a.index) {
                    list.push(a.index);
                }
            }
            // one entry per condition occurrence: reachability counts down
            // the number of unsatisfied conditions through this index
            for c in a
                .cond_start
                .iter()
                .chain(a.cond_over_all.iter())
                .chain(a.cond_end.iter())
            {
                requirers[usize::from(c.var)][c.val as usize].push(a.index);
            }
        }

        let num_initial = self.g.num_init.clone();
        tracing::debug!(
            actions = actions.len(),
            goal_actions = goal_actions.len(),
            tils = til_actions.len(),
            mutex_pairs = permanent_mutex.len(),
            "SAS translation done"
        );
        Ok(SasTask {
            grounded: self.g,
            variables: self.variables,
            initial_state: self.initial_state,
            num_initial,
            actions,
            til_actions,
            goal_actions,
            permanent_mutex,
            producers,
            requirers,
            preferences,
            metric: None,
        }
        .with_metric())
    }

    fn til_action(&self, i: usize, til: &GroundTil) -> SasAction {
        let eff = self.rewrite_effs(&[GroundEff {
            var: til.var,
            value: til.value,
        }]);
        SasAction {
            index: i,
            name: format!("#til{}", i),
            duration: Vec::new(),
            num_control_vars: 0,
            cond_start: Vec::new(),
            cond_over_all: Vec::new(),
            cond_end: Vec::new(),
            num_cond_start: Vec::new(),
            num_cond_over_all: Vec::new(),
            num_cond_end: Vec::new(),
            eff_start: eff,
            eff_end: Vec::new(),
            num_eff_start: Vec::new(),
            num_eff_end: Vec::new(),
            conditional: Vec::new(),
            is_til: true,
            til_time: til.time,
            is_goal: false,
            cost: None,
        }
    }
}

impl SasTask {
    fn with_metric(mut self) -> SasTask {
        self.metric = self.grounded.metric.clone();
        self
    }
}

/// Writes the permanent mutex pairs to `mutex.txt`, one pair per line.
pub fn write_mutex_file(task: &SasTask, dir: &Path) -> std::io::Result<()> {
    let mut out = std::fs::File::create(dir.join("mutex.txt"))?;
    let mut lines: Vec<String> = task
        .permanent_mutex
        .iter()
        .map(|&(a, b)| {
            format!(
                "{} {}",
                task.value_name(VarVal(a)),
                task.value_name(VarVal(b))
            )
        })
        .collect();
    lines.sort();
    for l in &lines {
        writeln!(out, "{l}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::statics::remove_static_variables;
    use crate::grounding::tests::build;

    fn translated(domain: &str, problem: &str) -> SasTask {
        let mut g = build(domain, problem);
        remove_static_variables(&mut g);
        translate(g, &TranslateOptions::default()).unwrap()
    }

    const DOM: &str = "(define (domain d)
      (:types loc)
      (:predicates (at ?l - loc) (seen ?l - loc))
      (:action go :parameters (?a ?b - loc)
        :precondition (at ?a)
        :effect (and (not (at ?a)) (at ?b) (seen ?b))))";

    const PB: &str = "(define (problem p) (:domain d)
      (:objects x y z - loc)
      (:init (at x))
      (:goal (and (at z) (seen y))))";

    #[test]
    fn position_literals_group_into_one_variable() {
        let t = translated(DOM, PB);
        // (at x) (at y) (at z) collapse; seen-* stay boolean
        let grouped = t
            .variables
            .iter()
            .find(|v| v.name.contains("(at x)"))
            .unwrap();
        assert_eq!(grouped.values.len(), 3);
        assert!(grouped.values.iter().all(|v| matches!(v, SasValue::Literal { .. })));
        let booleans = t.variables.iter().filter(|v| v.values.len() == 2).count();
        assert_eq!(booleans, 3); // seen x, seen y, seen z
    }

    #[test]
    fn initial_state_has_exactly_one_value_per_variable() {
        let t = translated(DOM, PB);
        assert_eq!(t.initial_state.len(), t.variables.len());
        for (var, &val) in t.variables.iter().zip(t.initial_state.iter()) {
            assert!((val as usize) < var.values.len());
        }
    }

    #[test]
    fn implied_deletes_are_dropped() {
        let t = translated(DOM, PB);
        let go = t.actions.iter().find(|a| a.name == "(go x y)").unwrap();
        // one grouped assignment for position, one for seen
        assert_eq!(go.eff_start.len(), 2);
        assert_eq!(go.cond_start.len(), 1);
    }

    #[test]
    fn producers_and_requirers_cover_effects() {
        let t = translated(DOM, PB);
        for a in &t.actions {
            for e in &a.eff_start {
                assert!(t.producers[usize::from(e.var)][e.val as usize].contains(&a.index));
            }
            for c in &a.cond_start {
                assert!(t.requirers[usize::from(c.var)][c.val as usize].contains(&a.index));
            }
        }
    }

    #[test]
    fn cross_variable_mutex_pairs_survive_translation() {
        let t = translated(DOM, PB);
        // position and seen variables are not mutex with anything
        for &(a, b) in &t.permanent_mutex {
            assert_ne!(VarVal(a).var(), VarVal(b).var());
        }
    }
}
