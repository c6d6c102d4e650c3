//! Temporal-numeric plan validation.
//!
//! The planner serializes a candidate plan into a [`ValidationRequest`]:
//! time points, separation and duration constraints, fixed times, an ordered
//! stream of numeric events and the control-variable windows. The checker
//! answers whether the combined system is consistent, the minimal makespan
//! schedule, and one binding per control variable. The caller treats the
//! answer as authoritative.
//!
//! Temporal consistency is a difference-constraint system solved by
//! longest-path relaxation (a positive cycle means inconsistency); the
//! numeric side replays the event stream over intervals.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("event references unknown time point {0}")]
    UnknownPoint(u32),
    #[error("event references unknown variable {0}")]
    UnknownVariable(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Neq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssignKind {
    Assign,
    Increase,
    Decrease,
    ScaleUp,
    ScaleDown,
}

/// Numeric expression over the request's variables.
#[derive(Clone, Debug)]
pub enum Term {
    Number(f64),
    /// Numeric state variable, by request index.
    NumVar(u32),
    /// Control variable, by request index.
    ControlVar(u32),
    /// Duration of the given step (end minus start time).
    Duration(u32),
    Add(Box<Term>, Box<Term>),
    Sub(Box<Term>, Box<Term>),
    Mul(Box<Term>, Box<Term>),
    Div(Box<Term>, Box<Term>),
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub var: u32,
    pub op: AssignKind,
    pub expr: Term,
}

#[derive(Clone, Debug)]
pub struct Condition {
    pub comp: Cmp,
    pub left: Term,
    pub right: Term,
}

/// One element of the linearized numeric stream.
#[derive(Clone, Debug)]
pub enum Event {
    Assign(Assignment),
    Check(Condition),
}

#[derive(Copy, Clone, Debug)]
pub struct ControlVarSpec {
    pub lb: f64,
    pub ub: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ValidationRequest {
    pub num_points: u32,
    /// `point = time`, for the initial state and timed initial literals.
    pub fixed_times: Vec<(u32, f64)>,
    /// `later >= earlier + separation`.
    pub separations: Vec<(u32, u32, f64)>,
    /// `(start, end, min, max)`: the step's duration window.
    pub durations: Vec<(u32, u32, f64, f64)>,
    /// Points whose schedule defines the makespan.
    pub makespan_points: Vec<u32>,
    pub num_init: Vec<f64>,
    pub control_vars: Vec<ControlVarSpec>,
    /// Numeric events in linearization order.
    pub events: Vec<Event>,
}

#[derive(Clone, Debug)]
pub struct ValidationResult {
    pub valid: bool,
    /// Minimal makespan of a consistent schedule (0 when invalid).
    pub makespan: f64,
    /// One feasible value per control variable.
    pub control_vars: Vec<f64>,
}

pub trait Validator {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult, ValidationError>;
}

/// The built-in checker: simple temporal network plus interval replay.
#[derive(Default)]
pub struct StnValidator;

impl Validator for StnValidator {
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationResult, ValidationError> {
        let Some(times) = solve_stn(request)? else {
            return Ok(rejected());
        };
        let Some(control_vars) = replay_events(request)? else {
            return Ok(rejected());
        };
        let makespan = request
            .makespan_points
            .iter()
            .map(|&p| times[p as usize])
            .fold(0.0f64, f64::max);
        Ok(ValidationResult {
            valid: true,
            makespan,
            control_vars,
        })
    }
}

fn rejected() -> ValidationResult {
    ValidationResult {
        valid: false,
        makespan: 0.0,
        control_vars: Vec::new(),
    }
}

/// Earliest-time schedule by longest-path relaxation from a virtual origin.
/// Returns `None` on a positive cycle (inconsistent constraints).
fn solve_stn(request: &ValidationRequest) -> Result<Option<Vec<f64>>, ValidationError> {
    let n = request.num_points as usize;
    let check = |p: u32| -> Result<usize, ValidationError> {
        if (p as usize) < n {
            Ok(p as usize)
        } else {
            Err(ValidationError::UnknownPoint(p))
        }
    };
    // edge (a, b, w) encodes t_b >= t_a + w; origin is the extra node `n`
    let mut edges: Vec<(usize, usize, f64)> = Vec::new();
    for p in 0..n {
        edges.push((n, p, 0.0));
    }
    for &(p, t) in &request.fixed_times {
        let p = check(p)?;
        edges.push((n, p, t));
        edges.push((p, n, -t));
    }
    for &(a, b, sep) in &request.separations {
        edges.push((check(a)?, check(b)?, sep));
    }
    for &(s, e, dmin, dmax) in &request.durations {
        let (s, e) = (check(s)?, check(e)?);
        edges.push((s, e, dmin.max(0.0)));
        if dmax.is_finite() {
            edges.push((e, s, -dmax));
        }
    }

    let mut dist = vec![f64::NEG_INFINITY; n + 1];
    dist[n] = 0.0;
    for _ in 0..=n {
        let mut changed = false;
        for &(a, b, w) in &edges {
            if dist[a] > f64::NEG_INFINITY && dist[a] + w > dist[b] + 1e-9 {
                dist[b] = dist[a] + w;
                changed = true;
            }
        }
        if !changed {
            dist.pop();
            return Ok(Some(dist));
        }
    }
    // still relaxing after n+1 sweeps: positive cycle
    Ok(None)
}

#[derive(Copy, Clone)]
struct Interval {
    min: f64,
    max: f64,
}

impl Interval {
    fn point(v: f64) -> Interval {
        Interval { min: v, max: v }
    }
    fn add(self, o: Interval) -> Interval {
        Interval {
            min: self.min + o.min,
            max: self.max + o.max,
        }
    }
    fn sub(self, o: Interval) -> Interval {
        Interval {
            min: self.min - o.max,
            max: self.max - o.min,
        }
    }
    fn mul(self, o: Interval) -> Interval {
        let c = [
            self.min * o.min,
            self.min * o.max,
            self.max * o.min,
            self.max * o.max,
        ];
        let clean = |v: f64| if v.is_nan() { 0.0 } else { v };
        Interval {
            min: c.iter().copied().map(clean).fold(f64::INFINITY, f64::min),
            max: c.iter().copied().map(clean).fold(f64::NEG_INFINITY, f64::max),
        }
    }
    fn div(self, o: Interval) -> Option<Interval> {
        if o.min <= 0.0 && o.max >= 0.0 {
            return None;
        }
        Some(self.mul(Interval {
            min: 1.0 / o.max,
            max: 1.0 / o.min,
        }))
    }
}

/// Replays the numeric event stream over intervals. Control variables keep
/// their given windows; a condition that cannot hold rejects the plan.
fn replay_events(request: &ValidationRequest) -> Result<Option<Vec<f64>>, ValidationError> {
    let mut values: Vec<Interval> = request.num_init.iter().map(|&v| Interval::point(v)).collect();
    let durations: Vec<Interval> = request
        .durations
        .iter()
        .map(|&(_, _, dmin, dmax)| Interval {
            min: dmin.max(0.0),
            max: dmax,
        })
        .collect();
    let controls: Vec<Interval> = request
        .control_vars
        .iter()
        .map(|c| Interval {
            min: c.lb,
            max: c.ub,
        })
        .collect();

    let eval = |t: &Term, values: &[Interval]| -> Result<Option<Interval>, ValidationError> {
        eval_term(t, values, &controls, &durations)
    };

    for event in &request.events {
        match event {
            Event::Assign(a) => {
                let var = a.var as usize;
                if var >= values.len() {
                    return Err(ValidationError::UnknownVariable(a.var));
                }
                let Some(rhs) = eval(&a.expr, &values)? else {
                    return Ok(None);
                };
                let old = values[var];
                values[var] = match a.op {
                    AssignKind::Assign => rhs,
                    AssignKind::Increase => old.add(rhs),
                    AssignKind::Decrease => old.sub(rhs),
                    AssignKind::ScaleUp => old.mul(rhs),
                    AssignKind::ScaleDown => match old.div(rhs) {
                        Some(v) => v,
                        None => return Ok(None),
                    },
                };
            }
            Event::Check(c) => {
                let (Some(l), Some(r)) = (eval(&c.left, &values)?, eval(&c.right, &values)?)
                else {
                    return Ok(None);
                };
                let ok = match c.comp {
                    Cmp::Eq => l.max >= r.min && r.max >= l.min,
                    Cmp::Neq => !(l.min == l.max && r.min == r.max && l.min == r.min),
                    Cmp::Less => l.min < r.max,
                    Cmp::LessEq => l.min <= r.max,
                    Cmp::Greater => l.max > r.min,
                    Cmp::GreaterEq => l.max >= r.min,
                };
                if !ok {
                    return Ok(None);
                }
            }
        }
    }
    // bind each control variable to the midpoint of its (finite) window
    let bindings = controls
        .iter()
        .map(|c| {
            if c.min.is_finite() && c.max.is_finite() {
                (c.min + c.max) / 2.0
            } else if c.min.is_finite() {
                c.min
            } else if c.max.is_finite() {
                c.max
            } else {
                0.0
            }
        })
        .collect();
    Ok(Some(bindings))
}

fn eval_term(
    t: &Term,
    values: &[Interval],
    controls: &[Interval],
    durations: &[Interval],
) -> Result<Option<Interval>, ValidationError> {
    Ok(match t {
        Term::Number(n) => Some(Interval::point(*n)),
        Term::NumVar(v) => Some(
            *values
                .get(*v as usize)
                .ok_or(ValidationError::UnknownVariable(*v))?,
        ),
        Term::ControlVar(c) => Some(
            *controls
                .get(*c as usize)
                .ok_or(ValidationError::UnknownVariable(*c))?,
        ),
        Term::Duration(step) => Some(
            *durations
                .get(*step as usize)
                .ok_or(ValidationError::UnknownPoint(*step))?,
        ),
        Term::Add(a, b) => match (
            eval_term(a, values, controls, durations)?,
            eval_term(b, values, controls, durations)?,
        ) {
            (Some(a), Some(b)) => Some(a.add(b)),
            _ => None,
        },
        Term::Sub(a, b) => match (
            eval_term(a, values, controls, durations)?,
            eval_term(b, values, controls, durations)?,
        ) {
            (Some(a), Some(b)) => Some(a.sub(b)),
            _ => None,
        },
        Term::Mul(a, b) => match (
            eval_term(a, values, controls, durations)?,
            eval_term(b, values, controls, durations)?,
        ) {
            (Some(a), Some(b)) => Some(a.mul(b)),
            _ => None,
        },
        Term::Div(a, b) => match (
            eval_term(a, values, controls, durations)?,
            eval_term(b, values, controls, durations)?,
        ) {
            (Some(a), Some(b)) => a.div(b),
            _ => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(points: u32) -> ValidationRequest {
        ValidationRequest {
            num_points: points,
            ..Default::default()
        }
    }

    #[test]
    fn consistent_chain_minimizes_makespan() {
        // two steps of duration 2 and 3 in sequence
        let mut req = base(4);
        req.durations = vec![(0, 1, 2.0, 2.0), (2, 3, 3.0, 3.0)];
        req.separations = vec![(1, 2, 0.001)];
        req.makespan_points = vec![1, 3];
        let res = StnValidator.validate(&req).unwrap();
        assert!(res.valid);
        assert!((res.makespan - 5.001).abs() < 1e-9, "{}", res.makespan);
    }

    #[test]
    fn contradictory_orderings_are_rejected() {
        let mut req = base(2);
        req.separations = vec![(0, 1, 1.0), (1, 0, 1.0)];
        let res = StnValidator.validate(&req).unwrap();
        assert!(!res.valid);
    }

    #[test]
    fn fixed_times_anchor_the_schedule() {
        let mut req = base(2);
        req.fixed_times = vec![(0, 3.0)];
        req.durations = vec![(0, 1, 1.0, 1.0)];
        req.makespan_points = vec![1];
        let res = StnValidator.validate(&req).unwrap();
        assert!(res.valid);
        assert!((res.makespan - 4.0).abs() < 1e-9);
    }

    #[test]
    fn numeric_replay_rejects_violated_conditions() {
        let mut req = base(2);
        req.num_init = vec![5.0];
        req.events = vec![
            Event::Assign(Assignment {
                var: 0,
                op: AssignKind::Decrease,
                expr: Term::Number(4.0),
            }),
            Event::Check(Condition {
                comp: Cmp::GreaterEq,
                left: Term::NumVar(0),
                right: Term::Number(2.0),
            }),
        ];
        let res = StnValidator.validate(&req).unwrap();
        assert!(!res.valid);
    }

    #[test]
    fn control_variables_get_bound() {
        let mut req = base(2);
        req.control_vars = vec![ControlVarSpec { lb: 2.0, ub: 6.0 }];
        req.events = vec![Event::Check(Condition {
            comp: Cmp::LessEq,
            left: Term::ControlVar(0),
            right: Term::Number(10.0),
        })];
        let res = StnValidator.validate(&req).unwrap();
        assert!(res.valid);
        assert!((res.control_vars[0] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn division_by_possible_zero_rejects() {
        let mut req = base(1);
        req.num_init = vec![1.0, 0.0];
        req.events = vec![Event::Assign(Assignment {
            var: 0,
            op: AssignKind::ScaleDown,
            expr: Term::NumVar(1),
        })];
        let res = StnValidator.validate(&req).unwrap();
        assert!(!res.valid);
    }
}
