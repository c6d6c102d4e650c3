//! Lifted task model: the output of parsing and normal-form preprocessing,
//! and the input of the grounder.
//!
//! Types, objects and functions are interned and referenced through compact
//! `u32` ids so that later stages can use plain `Vec`s as lookup tables.

use smallvec::SmallVec;
use std::fmt::{Display, Error, Formatter};

/// Index into [`Task::types`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct TypeId(pub u32);

/// Index into [`Task::objects`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct ObjectId(pub u32);

/// Index into [`Task::functions`].
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct FunctionId(pub u32);

impl From<TypeId> for usize {
    fn from(t: TypeId) -> usize {
        t.0 as usize
    }
}
impl From<ObjectId> for usize {
    fn from(o: ObjectId) -> usize {
        o.0 as usize
    }
}
impl From<FunctionId> for usize {
    fn from(f: FunctionId) -> usize {
        f.0 as usize
    }
}

/// A type in the (DAG-shaped) type hierarchy.
pub struct Tpe {
    pub name: String,
    /// Direct supertypes. Empty only for the universal type.
    pub parents: SmallVec<[TypeId; 2]>,
}

pub struct Object {
    pub name: String,
    /// The smallest set of types this object satisfies (direct declarations).
    pub types: SmallVec<[TypeId; 2]>,
}

/// Value domain of a function.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ValueKind {
    /// Boolean predicate, value in `{true, false}`.
    Boolean,
    /// `#number`-valued fluent.
    Numeric,
    /// Object fluent whose values are instances of the given type.
    Symbolic(TypeId),
}

pub struct Function {
    pub name: String,
    pub params: Vec<TypeId>,
    pub value: ValueKind,
}

impl Function {
    pub fn is_numeric(&self) -> bool {
        self.value == ValueKind::Numeric
    }
}

/// Either an operator parameter or a concrete object.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Term {
    Param(usize),
    Obj(ObjectId),
}

/// A schematic fluent reference: a function applied to terms.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Atom {
    pub func: FunctionId,
    pub args: SmallVec<[Term; 4]>,
}

/// Comparator of a numeric condition or duration constraint.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Comparator {
    Eq,
    Neq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Comparator {
    pub fn negated(self) -> Comparator {
        match self {
            Comparator::Eq => Comparator::Neq,
            Comparator::Neq => Comparator::Eq,
            Comparator::Less => Comparator::GreaterEq,
            Comparator::LessEq => Comparator::Greater,
            Comparator::Greater => Comparator::LessEq,
            Comparator::GreaterEq => Comparator::Less,
        }
    }
}

impl Display for Comparator {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        let s = match self {
            Comparator::Eq => "=",
            Comparator::Neq => "!=",
            Comparator::Less => "<",
            Comparator::LessEq => "<=",
            Comparator::Greater => ">",
            Comparator::GreaterEq => ">=",
        };
        write!(f, "{s}")
    }
}

/// Schematic numeric expression.
#[derive(Clone, Debug, PartialEq)]
pub enum NumExpr {
    Number(f64),
    Fluent(Atom),
    /// `?duration` inside a durative action.
    Duration,
    /// `#t`, the continuous-time variable of a continuous effect.
    SharpT,
    /// A control parameter of the enclosing operator, by index.
    ControlParam(usize),
    Add(Box<NumExpr>, Box<NumExpr>),
    Sub(Box<NumExpr>, Box<NumExpr>),
    Mul(Box<NumExpr>, Box<NumExpr>),
    Div(Box<NumExpr>, Box<NumExpr>),
}

/// Fluent condition in normal form: `atom = value` (or `!=` when negated).
#[derive(Clone, Debug)]
pub struct FluentCond {
    pub atom: Atom,
    pub value: Term,
    pub negated: bool,
}

#[derive(Clone, Debug)]
pub struct NumericCond {
    pub comp: Comparator,
    pub left: NumExpr,
    pub right: NumExpr,
}

/// Equality constraint between two terms, used to filter parameter bindings.
#[derive(Clone, Debug)]
pub struct EqualityCond {
    pub left: Term,
    pub right: Term,
    pub negated: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum AssignOp {
    Assign,
    Increase,
    Decrease,
    ScaleUp,
    ScaleDown,
}

/// Fluent assignment effect: `atom := value`.
#[derive(Clone, Debug)]
pub struct FluentEff {
    pub atom: Atom,
    pub value: Term,
}

#[derive(Clone, Debug)]
pub struct NumericEff {
    pub op: AssignOp,
    pub fluent: Atom,
    pub expr: NumExpr,
}

/// One bucket of conditions (at-start, over-all or at-end).
#[derive(Clone, Debug, Default)]
pub struct CondSet {
    pub fluents: Vec<FluentCond>,
    pub numeric: Vec<NumericCond>,
    pub equalities: Vec<EqualityCond>,
}

impl CondSet {
    pub fn is_empty(&self) -> bool {
        self.fluents.is_empty() && self.numeric.is_empty() && self.equalities.is_empty()
    }
}

/// One bucket of effects (at-start or at-end).
#[derive(Clone, Debug, Default)]
pub struct EffSet {
    pub fluents: Vec<FluentEff>,
    pub numeric: Vec<NumericEff>,
}

impl EffSet {
    pub fn is_empty(&self) -> bool {
        self.fluents.is_empty() && self.numeric.is_empty()
    }
}

/// Conditional effect in normal form: a miniature action.
#[derive(Clone, Debug, Default)]
pub struct CondEffect {
    pub cond_start: CondSet,
    pub cond_end: CondSet,
    pub eff_start: EffSet,
    pub eff_end: EffSet,
}

#[derive(Clone, Debug)]
pub struct DurationConstraint {
    pub comp: Comparator,
    pub expr: NumExpr,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub types: SmallVec<[TypeId; 2]>,
}

/// A schematic operator after preprocessing: no quantifiers, implications or
/// disjunctions in its condition sets, effects flattened, conditional effects
/// explicit.
#[derive(Clone, Debug)]
pub struct Operator {
    pub name: String,
    pub params: Vec<Param>,
    /// Free numeric parameters (control variables), by name.
    pub control_params: Vec<String>,
    /// Empty iff the operator is instantaneous.
    pub duration: Vec<DurationConstraint>,
    pub cond_start: CondSet,
    pub cond_over_all: CondSet,
    pub cond_end: CondSet,
    pub eff_start: EffSet,
    pub eff_end: EffSet,
    pub conditional: Vec<CondEffect>,
    pub preferences: Vec<(String, GoalDesc)>,
}

impl Operator {
    pub fn is_durative(&self) -> bool {
        !self.duration.is_empty()
    }
}

/// Goal description, as used in problem goals, preferences and constraints.
/// Unlike operator conditions, quantifiers survive preprocessing here and are
/// expanded by the grounder over the compatible objects.
#[derive(Clone, Debug)]
pub enum GoalDesc {
    Fluent(FluentCond),
    Numeric(NumericCond),
    Equality(EqualityCond),
    And(Vec<GoalDesc>),
    Or(Vec<GoalDesc>),
    Not(Box<GoalDesc>),
    Imply(Box<GoalDesc>, Box<GoalDesc>),
    Forall(Vec<Param>, Box<GoalDesc>),
    Exists(Vec<Param>, Box<GoalDesc>),
    Preference(String, Box<GoalDesc>),
}

/// Value of a ground fact in the initial state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum FactValue {
    Obj(ObjectId),
    Num(f64),
}

/// A ground fact of the initial state; `time` is set for timed initial literals.
#[derive(Clone, Debug)]
pub struct Fact {
    pub func: FunctionId,
    pub args: SmallVec<[ObjectId; 4]>,
    pub value: FactValue,
    pub time: Option<f64>,
}

#[derive(Clone, Debug)]
pub enum MetricExpr {
    Number(f64),
    TotalTime,
    Fluent(Atom),
    IsViolated(String),
    Add(Vec<MetricExpr>),
    Sub(Box<MetricExpr>, Box<MetricExpr>),
    Mul(Vec<MetricExpr>),
    Div(Box<MetricExpr>, Box<MetricExpr>),
}

#[derive(Clone, Debug)]
pub struct Metric {
    pub minimize: bool,
    pub expr: MetricExpr,
}

/// State trajectory constraint kinds of PDDL 3, kept as parsed.
#[derive(Clone, Debug)]
pub enum Constraint {
    AtEnd(GoalDesc),
    Always(GoalDesc),
    Sometime(GoalDesc),
    Within(f64, GoalDesc),
    AtMostOnce(GoalDesc),
    SometimeAfter(GoalDesc, GoalDesc),
    SometimeBefore(GoalDesc, GoalDesc),
    Preference(String, Box<Constraint>),
    Forall(Vec<Param>, Box<Constraint>),
}

/// A complete lifted task: one domain plus one problem.
pub struct Task {
    pub domain_name: String,
    pub problem_name: String,
    pub types: Vec<Tpe>,
    pub objects: Vec<Object>,
    pub functions: Vec<Function>,
    pub operators: Vec<Operator>,
    pub init: Vec<Fact>,
    pub goal: GoalDesc,
    pub constraints: Vec<Constraint>,
    pub metric: Option<Metric>,
}

/// Index of the universal type, always present at position 0.
pub const OBJECT_TYPE: TypeId = TypeId(0);
/// Index of the `#number` type.
pub const NUMBER_TYPE: TypeId = TypeId(1);
/// Index of the `#integer` type.
pub const INTEGER_TYPE: TypeId = TypeId(2);

/// The two boolean constants, always the first two objects of a task.
pub const TRUE_OBJECT: ObjectId = ObjectId(0);
pub const FALSE_OBJECT: ObjectId = ObjectId(1);

impl Task {
    /// Creates an empty task holding only the built-in types and constants.
    pub fn new() -> Task {
        Task {
            domain_name: String::new(),
            problem_name: String::new(),
            types: vec![
                Tpe {
                    name: "object".to_string(),
                    parents: SmallVec::new(),
                },
                Tpe {
                    name: "#number".to_string(),
                    parents: SmallVec::from_slice(&[OBJECT_TYPE]),
                },
                Tpe {
                    name: "#integer".to_string(),
                    parents: SmallVec::from_slice(&[NUMBER_TYPE]),
                },
            ],
            objects: vec![
                Object {
                    name: "#true".to_string(),
                    types: SmallVec::new(),
                },
                Object {
                    name: "#false".to_string(),
                    types: SmallVec::new(),
                },
            ],
            functions: Vec::new(),
            operators: Vec::new(),
            init: Vec::new(),
            goal: GoalDesc::And(Vec::new()),
            constraints: Vec::new(),
            metric: None,
        }
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }

    pub fn object_id(&self, name: &str) -> Option<ObjectId> {
        self.objects
            .iter()
            .position(|o| o.name == name)
            .map(|i| ObjectId(i as u32))
    }

    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FunctionId(i as u32))
    }

    /// Whether `sub` is `sup` or a (transitive) subtype of it.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup || sup == OBJECT_TYPE {
            return true;
        }
        self.types[usize::from(sub)]
            .parents
            .iter()
            .any(|&p| self.is_subtype(p, sup))
    }

    /// Whether the object can instantiate a parameter of any of the given types.
    pub fn object_compatible(&self, obj: ObjectId, types: &[TypeId]) -> bool {
        types.iter().any(|&t| {
            self.objects[usize::from(obj)]
                .types
                .iter()
                .any(|&ot| self.is_subtype(ot, t))
        })
    }

    /// All objects compatible with any of the given types, in id order.
    pub fn instances_of(&self, types: &[TypeId]) -> Vec<ObjectId> {
        (0..self.objects.len())
            .map(|i| ObjectId(i as u32))
            .filter(|&o| o != TRUE_OBJECT && o != FALSE_OBJECT)
            .filter(|&o| self.object_compatible(o, types))
            .collect()
    }

    pub fn type_name(&self, t: TypeId) -> &str {
        &self.types[usize::from(t)].name
    }

    pub fn object_name(&self, o: ObjectId) -> &str {
        &self.objects[usize::from(o)].name
    }

    pub fn function_name(&self, f: FunctionId) -> &str {
        &self.functions[usize::from(f)].name
    }
}

impl Default for Task {
    fn default() -> Self {
        Task::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_types() -> Task {
        let mut task = Task::new();
        let vehicle = TypeId(task.types.len() as u32);
        task.types.push(Tpe {
            name: "vehicle".to_string(),
            parents: SmallVec::from_slice(&[OBJECT_TYPE]),
        });
        task.types.push(Tpe {
            name: "truck".to_string(),
            parents: SmallVec::from_slice(&[vehicle]),
        });
        task
    }

    #[test]
    fn subtyping_is_transitive() {
        let task = task_with_types();
        let vehicle = task.type_id("vehicle").unwrap();
        let truck = task.type_id("truck").unwrap();
        assert!(task.is_subtype(truck, vehicle));
        assert!(task.is_subtype(truck, OBJECT_TYPE));
        assert!(!task.is_subtype(vehicle, truck));
    }

    #[test]
    fn instances_respect_types() {
        let mut task = task_with_types();
        let truck = task.type_id("truck").unwrap();
        let vehicle = task.type_id("vehicle").unwrap();
        task.objects.push(Object {
            name: "t1".to_string(),
            types: SmallVec::from_slice(&[truck]),
        });
        task.objects.push(Object {
            name: "house".to_string(),
            types: SmallVec::from_slice(&[OBJECT_TYPE]),
        });
        let t1 = task.object_id("t1").unwrap();
        assert_eq!(task.instances_of(&[vehicle]), vec![t1]);
        assert_eq!(task.instances_of(&[OBJECT_TYPE]).len(), 2);
    }
}
