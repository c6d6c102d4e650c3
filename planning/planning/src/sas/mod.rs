//! SAS task: multi-valued state variables inferred from groups of mutually
//! exclusive ground fluents, and the normalized actions over them.
//!
//! Numeric variables keep the ids assigned by the grounder
//! ([`crate::grounding::NumVarId`]) and numeric expressions pass through
//! unchanged.

pub mod mutex;
pub mod translator;

use crate::grounding::{
    GroundDuration, GroundNumCond, GroundNumEff, GroundedTask, NumVarId, VarId,
};
use crate::model::{ObjectId, ValueKind, FALSE_OBJECT, TRUE_OBJECT};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

/// Index of a SAS variable.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct SasVarId(pub u32);

impl From<SasVarId> for usize {
    fn from(v: SasVarId) -> usize {
        v.0 as usize
    }
}

/// A `(variable, value)` pair packed into 32 bits, used as causal-link
/// payload and hash key. Variable in the high half, value in the low half.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct VarVal(u32);

impl VarVal {
    pub fn new(var: SasVarId, val: u16) -> VarVal {
        VarVal((var.0 << 16) | val as u32)
    }
    pub fn var(self) -> SasVarId {
        SasVarId(self.0 >> 16)
    }
    pub fn val(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// One value of a SAS variable's domain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SasValue {
    /// The value corresponding to one ground fluent literal.
    Literal { fluent: VarId, value: ObjectId },
    /// Synthetic value: none of the grouped literals holds.
    NoneOfThose,
}

#[derive(Clone, Debug)]
pub struct SasVariable {
    pub name: String,
    pub values: Vec<SasValue>,
}

impl SasVariable {
    pub fn value_name(&self, g: &GroundedTask, val: u16) -> String {
        match &self.values[val as usize] {
            SasValue::NoneOfThose => "<none of those>".to_string(),
            SasValue::Literal { fluent, value } => {
                let name = g.fluent_name(*fluent);
                if *value == TRUE_OBJECT {
                    name
                } else if *value == FALSE_OBJECT {
                    format!("(not {name})")
                } else {
                    format!("(= {name} {})", g.lifted.object_name(*value))
                }
            }
        }
    }
}

/// Equality condition `var = val`, also used to record assignment effects.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct SasCondition {
    pub var: SasVarId,
    pub val: u16,
}

impl SasCondition {
    pub fn var_val(self) -> VarVal {
        VarVal::new(self.var, self.val)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SasCondEffect {
    pub cond_start: Vec<SasCondition>,
    pub num_cond_start: Vec<GroundNumCond>,
    pub cond_end: Vec<SasCondition>,
    pub num_cond_end: Vec<GroundNumCond>,
    pub eff_start: Vec<SasCondition>,
    pub num_eff_start: Vec<GroundNumEff>,
    pub eff_end: Vec<SasCondition>,
    pub num_eff_end: Vec<GroundNumEff>,
}

#[derive(Clone, Debug)]
pub struct SasAction {
    pub index: usize,
    pub name: String,
    /// Empty iff the action is instantaneous.
    pub duration: Vec<GroundDuration>,
    pub num_control_vars: usize,
    pub cond_start: Vec<SasCondition>,
    pub cond_over_all: Vec<SasCondition>,
    pub cond_end: Vec<SasCondition>,
    pub num_cond_start: Vec<GroundNumCond>,
    pub num_cond_over_all: Vec<GroundNumCond>,
    pub num_cond_end: Vec<GroundNumCond>,
    pub eff_start: Vec<SasCondition>,
    pub eff_end: Vec<SasCondition>,
    pub num_eff_start: Vec<GroundNumEff>,
    pub num_eff_end: Vec<GroundNumEff>,
    pub conditional: Vec<SasCondEffect>,
    pub is_til: bool,
    /// Absolute trigger time, for TIL pseudo-actions.
    pub til_time: f64,
    pub is_goal: bool,
    /// Explicit cost, when the action increases the metric fluent by a
    /// constant. Plan length `g` advances by this instead of 1.
    pub cost: Option<f64>,
}

impl SasAction {
    pub fn is_instantaneous(&self) -> bool {
        self.duration.is_empty()
    }

    pub fn has_numeric_conditions(&self) -> bool {
        !self.num_cond_start.is_empty()
            || !self.num_cond_over_all.is_empty()
            || !self.num_cond_end.is_empty()
    }

    /// Conditions at the given point, in causal-link order: at-start then
    /// over-all on the start point, at-end on the end point.
    pub fn start_conditions(&self) -> impl Iterator<Item = &SasCondition> {
        self.cond_start.iter().chain(self.cond_over_all.iter())
    }
}

#[derive(Clone, Debug)]
pub struct SasPreference {
    pub name: String,
    /// DNF over SAS conditions; empty means unsatisfiable.
    pub goal: Vec<(Vec<SasCondition>, Vec<GroundNumCond>)>,
}

pub struct SasTask {
    pub grounded: GroundedTask,
    pub variables: Vec<SasVariable>,
    pub initial_state: Vec<u16>,
    pub num_initial: Vec<f64>,
    /// Ordinary actions; TIL and goal pseudo-actions live separately.
    pub actions: Vec<SasAction>,
    pub til_actions: Vec<SasAction>,
    /// One pseudo-action per goal disjunct, with at-end conditions only.
    pub goal_actions: Vec<SasAction>,
    /// Permanent mutexes between values of different variables, packed as
    /// `(min(raw), max(raw))`.
    pub permanent_mutex: HashSet<(u32, u32)>,
    /// `producers[var][val]`: ordinary actions with an effect `var := val`
    /// (conditional effects included).
    pub producers: Vec<Vec<Vec<usize>>>,
    /// `requirers[var][val]`: ordinary actions with a condition `var = val`.
    pub requirers: Vec<Vec<Vec<usize>>>,
    pub preferences: Vec<SasPreference>,
    pub metric: Option<crate::grounding::GroundMetric>,
}

impl SasTask {
    pub fn num_vars(&self) -> usize {
        self.variables.len()
    }

    pub fn num_num_vars(&self) -> usize {
        self.num_initial.len()
    }

    pub fn are_mutex(&self, a: VarVal, b: VarVal) -> bool {
        if a.var() == b.var() {
            return a.val() != b.val();
        }
        let key = if a.raw() < b.raw() {
            (a.raw(), b.raw())
        } else {
            (b.raw(), a.raw())
        };
        self.permanent_mutex.contains(&key)
    }

    pub fn value_name(&self, vv: VarVal) -> String {
        self.variables[usize::from(vv.var())].value_name(&self.grounded, vv.val())
    }

    /// Whether any action carries numeric conditions or conditional effects,
    /// which decides the heuristic variant and validator gating.
    pub fn has_numeric_conditions_or_conditional_effects(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.has_numeric_conditions() || !a.conditional.is_empty())
    }
}

/// The set of `(ground fluent, value)` literals observed anywhere in the
/// grounded task, indexed densely for the mutex graph.
pub struct LiteralUniverse {
    pub literals: Vec<(VarId, ObjectId)>,
    pub index: HashMap<(VarId, ObjectId), u32>,
    /// Values observed per ground fluent, in discovery order.
    pub values_of: Vec<SmallVec<[ObjectId; 4]>>,
}

impl LiteralUniverse {
    pub fn lit(&self, fluent: VarId, value: ObjectId) -> Option<u32> {
        self.index.get(&(fluent, value)).copied()
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Collects every value observed for every non-static fluent: initial
    /// values, effect values and TIL values, plus `false` for booleans.
    pub fn build(g: &GroundedTask) -> LiteralUniverse {
        let mut u = LiteralUniverse {
            literals: Vec::new(),
            index: HashMap::new(),
            values_of: vec![SmallVec::new(); g.fluents.len()],
        };
        let mut observe = |u: &mut LiteralUniverse, f: VarId, v: ObjectId| {
            if g.static_fluents.contains(usize::from(f)) {
                return;
            }
            if !u.values_of[usize::from(f)].contains(&v) {
                u.values_of[usize::from(f)].push(v);
                let id = u.literals.len() as u32;
                u.literals.push((f, v));
                u.index.insert((f, v), id);
            }
        };
        for (i, _) in g.fluents.iter().enumerate() {
            let f = VarId(i as u32);
            if g.static_fluents.contains(i) {
                continue;
            }
            let kind = g.lifted.functions[usize::from(g.fluents[i].func)].value;
            if kind == ValueKind::Boolean {
                observe(&mut u, f, TRUE_OBJECT);
                observe(&mut u, f, FALSE_OBJECT);
            } else if g.init[i] != FALSE_OBJECT {
                observe(&mut u, f, g.init[i]);
            }
        }
        for a in &g.actions {
            for e in a
                .eff_start
                .iter()
                .chain(a.eff_end.iter())
                .chain(a.conditional.iter().flat_map(|c| c.eff_start.iter()))
                .chain(a.conditional.iter().flat_map(|c| c.eff_end.iter()))
            {
                observe(&mut u, e.var, e.value);
            }
            for c in a
                .cond_start
                .iter()
                .chain(a.cond_over_all.iter())
                .chain(a.cond_end.iter())
            {
                observe(&mut u, c.var, c.value);
            }
        }
        for til in &g.tils {
            observe(&mut u, til.var, til.value);
        }
        for conj in g.goal.iter().chain(g.preferences.iter().flat_map(|p| p.goal.iter())) {
            for c in &conj.conds {
                observe(&mut u, c.var, c.value);
            }
        }
        u
    }
}
