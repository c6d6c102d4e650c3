//! Interval arithmetic over numeric fluents, and the per-action interval
//! obligations evaluated when an action is added to a plan: control-variable
//! domains, the duration window, satisfiability of numeric conditions and the
//! numeric state changes of both action points.

use crate::grounding::{GroundNumCond, GroundNumExpr, NumVarId};
use crate::model::Comparator;
use crate::sas::SasAction;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub const FULL: Interval = Interval {
        min: f64::NEG_INFINITY,
        max: f64::INFINITY,
    };

    pub fn new(min: f64, max: f64) -> Interval {
        Interval { min, max }
    }

    pub fn point(v: f64) -> Interval {
        Interval { min: v, max: v }
    }

    pub fn is_empty(self) -> bool {
        self.min > self.max
    }

    pub fn is_point(self) -> bool {
        self.min == self.max
    }

    pub fn intersect(self, other: Interval) -> Interval {
        Interval {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    pub fn add(self, o: Interval) -> Interval {
        Interval::new(self.min + o.min, self.max + o.max)
    }

    pub fn sub(self, o: Interval) -> Interval {
        Interval::new(self.min - o.max, self.max - o.min)
    }

    /// Sign-respecting product: the hull of the four corner products.
    pub fn mul(self, o: Interval) -> Interval {
        let c = [
            self.min * o.min,
            self.min * o.max,
            self.max * o.min,
            self.max * o.max,
        ];
        let mut min = c[0];
        let mut max = c[0];
        for &x in &c[1..] {
            if x < min {
                min = x;
            }
            if x > max {
                max = x;
            }
        }
        // 0 * inf is NaN, treat it as 0
        Interval::new(
            if min.is_nan() { 0.0 } else { min },
            if max.is_nan() { 0.0 } else { max },
        )
    }

    /// Division widens to the full line when the divisor may be zero; the
    /// caller records the action as validator-required in that case.
    pub fn div(self, o: Interval, flag: &mut bool) -> Interval {
        if o.min <= 0.0 && o.max >= 0.0 {
            *flag = true;
            return Interval::FULL;
        }
        self.mul(Interval::new(1.0 / o.max, 1.0 / o.min))
    }
}

/// Read access to the numeric state an action is evaluated against.
pub trait NumericState {
    fn min_value(&self, v: NumVarId) -> f64;
    fn max_value(&self, v: NumVarId) -> f64;

    fn interval(&self, v: NumVarId) -> Interval {
        Interval::new(self.min_value(v), self.max_value(v))
    }
}

/// A numeric-state change produced by one action point.
#[derive(Copy, Clone, Debug)]
pub struct NumChange {
    pub var: NumVarId,
    pub interval: Interval,
}

/// Interval evaluation of one action against a numeric state.
pub struct ActionIntervals {
    /// Current interval per numeric variable, mutated by start effects.
    fluents: Vec<Interval>,
    pub duration: Interval,
    pub control_vars: Vec<Interval>,
    /// Set when a division by a possibly-zero interval occurred; such an
    /// action must be confirmed by the validator.
    pub division_by_zero: bool,
}

impl ActionIntervals {
    pub fn new(action: &SasAction, state: &dyn NumericState, num_vars: usize) -> ActionIntervals {
        let fluents = (0..num_vars)
            .map(|i| state.interval(NumVarId(i as u32)))
            .collect();
        let mut calc = ActionIntervals {
            fluents,
            duration: Interval::FULL,
            control_vars: vec![Interval::FULL; action.num_control_vars],
            division_by_zero: false,
        };
        calc.constrain_control_vars(action);
        calc.compute_duration(action);
        calc
    }

    fn eval_in(&mut self, e: &GroundNumExpr, sharp_t: Interval) -> Interval {
        match e {
            GroundNumExpr::Number(n) => Interval::point(*n),
            GroundNumExpr::Var(v) => self.fluents[usize::from(*v)],
            GroundNumExpr::Duration => self.duration,
            GroundNumExpr::SharpT => sharp_t,
            GroundNumExpr::ControlVar(i) => self.control_vars[*i],
            GroundNumExpr::Add(a, b) => {
                let (a, b) = (self.eval_in(a, sharp_t), self.eval_in(b, sharp_t));
                a.add(b)
            }
            GroundNumExpr::Sub(a, b) => {
                let (a, b) = (self.eval_in(a, sharp_t), self.eval_in(b, sharp_t));
                a.sub(b)
            }
            GroundNumExpr::Mul(a, b) => {
                let (a, b) = (self.eval_in(a, sharp_t), self.eval_in(b, sharp_t));
                a.mul(b)
            }
            GroundNumExpr::Div(a, b) => {
                let (a, b) = (self.eval_in(a, sharp_t), self.eval_in(b, sharp_t));
                let mut flag = false;
                let r = a.div(b, &mut flag);
                self.division_by_zero |= flag;
                r
            }
        }
    }

    /// Evaluates an expression at the start point (`#t` = 0).
    pub fn eval(&mut self, e: &GroundNumExpr) -> Interval {
        self.eval_in(e, Interval::point(0.0))
    }

    /// Evaluates an expression at the end point (`#t` spans the duration).
    pub fn eval_at_end(&mut self, e: &GroundNumExpr) -> Interval {
        let d = self.duration;
        self.eval_in(e, Interval::new(0.0f64.min(d.min), d.max))
    }

    /// Narrows each control variable by the conditions of the simple shape
    /// `cv <op> expr` / `expr <op> cv`. Conditions where the control variable
    /// is buried deeper stay with the validator.
    fn constrain_control_vars(&mut self, action: &SasAction) {
        let conds: Vec<GroundNumCond> = action
            .num_cond_start
            .iter()
            .chain(action.num_cond_over_all.iter())
            .chain(action.num_cond_end.iter())
            .cloned()
            .collect();
        for c in &conds {
            if let GroundNumExpr::ControlVar(i) = c.left {
                let bound = self.eval(&c.right);
                self.control_vars[i] = constrain(self.control_vars[i], c.comp, bound);
            } else if let GroundNumExpr::ControlVar(i) = c.right {
                let bound = self.eval(&c.left);
                self.control_vars[i] = constrain(self.control_vars[i], flip(c.comp), bound);
            }
        }
        for d in &action.duration {
            // a duration constraint with a lone control variable pins it too
            if let GroundNumExpr::ControlVar(i) = d.expr {
                let dur = self.duration;
                self.control_vars[i] = constrain(self.control_vars[i], flip(d.comp), dur);
            }
        }
    }

    fn compute_duration(&mut self, action: &SasAction) {
        let mut duration = Interval::FULL;
        for d in &action.duration {
            let bound = self.eval(&d.expr);
            duration = constrain(duration, d.comp, bound);
        }
        // durations are never negative
        self.duration = duration.intersect(Interval::new(0.0, f64::INFINITY));
    }

    /// Whether a condition is satisfiable under the current intervals.
    pub fn satisfiable(&mut self, c: &GroundNumCond) -> bool {
        let (l, r) = (self.eval(&c.left), self.eval(&c.right));
        match c.comp {
            Comparator::Eq => l.max >= r.min && r.max >= l.min,
            Comparator::Neq => !(l.is_point() && r.is_point() && l.min == r.min),
            Comparator::Less => l.min < r.max,
            Comparator::LessEq => l.min <= r.max,
            Comparator::Greater => l.max > r.min,
            Comparator::GreaterEq => l.max >= r.min,
        }
    }

    /// Whether a condition necessarily holds for every value in the current
    /// intervals.
    pub fn necessarily(&mut self, c: &GroundNumCond) -> bool {
        let (l, r) = (self.eval(&c.left), self.eval(&c.right));
        match c.comp {
            Comparator::Eq => l.is_point() && r.is_point() && l.min == r.min,
            Comparator::Neq => l.min > r.max || r.min > l.max,
            Comparator::Less => l.max < r.min,
            Comparator::LessEq => l.max <= r.min,
            Comparator::Greater => l.min > r.max,
            Comparator::GreaterEq => l.min >= r.max,
        }
    }

    pub fn all_satisfiable(&mut self, conds: &[GroundNumCond]) -> bool {
        conds.iter().all(|c| self.satisfiable(c))
    }

    /// Applies numeric effects of one point, recording the changes.
    pub fn apply_effects(
        &mut self,
        effs: &[crate::grounding::GroundNumEff],
        at_end: bool,
        out: &mut Vec<NumChange>,
    ) {
        for e in effs {
            let val = if at_end {
                self.eval_at_end(&e.expr)
            } else {
                self.eval(&e.expr)
            };
            let old = self.fluents[usize::from(e.var)];
            let new = match e.op {
                crate::model::AssignOp::Assign => val,
                crate::model::AssignOp::Increase => old.add(val),
                crate::model::AssignOp::Decrease => old.sub(val),
                crate::model::AssignOp::ScaleUp => old.mul(val),
                crate::model::AssignOp::ScaleDown => {
                    let mut flag = false;
                    let r = old.div(val, &mut flag);
                    self.division_by_zero |= flag;
                    r
                }
            };
            self.fluents[usize::from(e.var)] = new;
            out.push(NumChange {
                var: e.var,
                interval: new,
            });
        }
    }

    pub fn fluent(&self, v: NumVarId) -> Interval {
        self.fluents[usize::from(v)]
    }
}

/// Narrows `target` so that `target <comp> bound` can hold.
fn constrain(target: Interval, comp: Comparator, bound: Interval) -> Interval {
    match comp {
        Comparator::Eq => target.intersect(bound),
        Comparator::Neq => target,
        Comparator::Less | Comparator::LessEq => {
            target.intersect(Interval::new(f64::NEG_INFINITY, bound.max))
        }
        Comparator::Greater | Comparator::GreaterEq => {
            target.intersect(Interval::new(bound.min, f64::INFINITY))
        }
    }
}

fn flip(comp: Comparator) -> Comparator {
    match comp {
        Comparator::Less => Comparator::Greater,
        Comparator::LessEq => Comparator::GreaterEq,
        Comparator::Greater => Comparator::Less,
        Comparator::GreaterEq => Comparator::LessEq,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_respects_signs() {
        let a = Interval::new(-2.0, 3.0);
        let b = Interval::new(4.0, 5.0);
        assert_eq!(a.add(b), Interval::new(2.0, 8.0));
        assert_eq!(a.sub(b), Interval::new(-7.0, -1.0));
        assert_eq!(a.mul(b), Interval::new(-10.0, 15.0));
    }

    #[test]
    fn division_by_possible_zero_widens_and_flags() {
        let mut flag = false;
        let r = Interval::new(1.0, 2.0).div(Interval::new(-1.0, 1.0), &mut flag);
        assert!(flag);
        assert_eq!(r, Interval::FULL);

        let mut flag = false;
        let r = Interval::new(4.0, 8.0).div(Interval::new(2.0, 4.0), &mut flag);
        assert!(!flag);
        assert_eq!(r, Interval::new(1.0, 4.0));
    }

    #[test]
    fn constrain_narrows_bounds() {
        let d = constrain(Interval::FULL, Comparator::Eq, Interval::point(5.0));
        assert_eq!(d, Interval::point(5.0));
        let d = constrain(
            Interval::new(0.0, 10.0),
            Comparator::LessEq,
            Interval::point(4.0),
        );
        assert_eq!(d, Interval::new(0.0, 4.0));
        let d = constrain(d, Comparator::GreaterEq, Interval::point(6.0));
        assert!(d.is_empty());
    }
}
