//! PDDL front-end: located S-expressions and the domain/problem reader.

pub mod pddl;
pub mod sexpr;

use crate::model::{DurationConstraint, GoalDesc, Param};
use thiserror::Error;

pub use pddl::{parse_domain, parse_problem};
pub use sexpr::{ErrLoc, Input};

/// A fatal front-end error. Both kinds carry the source location and render
/// it with the offending line underlined.
#[derive(Debug, Error)]
pub enum PddlError {
    /// The input is not well-formed PDDL text.
    #[error("parse error\n{0}")]
    Syntax(ErrLoc),
    /// The input is well-formed but uses an undefined symbol, a wrong arity
    /// or an incompatible type.
    #[error("semantic error\n{0}")]
    Semantic(ErrLoc),
}

/// Moment a condition is required at, relative to its action.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimeSpec {
    AtStart,
    OverAll,
    AtEnd,
}

/// Moment an effect takes place at.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EffTime {
    AtStart,
    AtEnd,
}

/// Effect tree as parsed, before normal-form lowering.
#[derive(Clone, Debug)]
pub enum EffDesc {
    And(Vec<EffDesc>),
    Forall(Vec<Param>, Box<EffDesc>),
    When(GoalDesc, Box<EffDesc>),
    /// Durative conditional effect: `(when <timed conds> <timed effs>)`.
    TimedWhen(Vec<(TimeSpec, GoalDesc)>, Vec<(EffTime, EffDesc)>),
    Fluent(crate::model::FluentEff),
    Numeric(crate::model::NumericEff),
}

/// An operator as parsed: conditions and effects are arbitrary goal/effect
/// trees attached to time specifiers. `preprocessing::normalize` lowers this
/// to [`crate::model::Operator`].
#[derive(Clone, Debug)]
pub struct RawOperator {
    pub name: String,
    pub durative: bool,
    pub params: Vec<Param>,
    pub control_params: Vec<String>,
    pub duration: Vec<DurationConstraint>,
    pub conditions: Vec<(TimeSpec, GoalDesc)>,
    pub effects: Vec<(EffTime, EffDesc)>,
}

impl RawOperator {
    pub fn new(name: String) -> RawOperator {
        RawOperator {
            name,
            durative: false,
            params: Vec::new(),
            control_params: Vec::new(),
            duration: Vec::new(),
            conditions: Vec::new(),
            effects: Vec::new(),
        }
    }
}
