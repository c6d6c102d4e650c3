//! Writes the grounded task back out as PDDL (`GroundedDomain.pddl` and
//! `GroundedProblem.pddl`), for inspection or for feeding other planners.

use super::*;
use crate::model::{AssignOp, Comparator, Function, FunctionId, Task, ValueKind, FALSE_OBJECT, TRUE_OBJECT};
use itertools::Itertools;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

pub fn write_pddl_domain(g: &GroundedTask, dir: &Path) -> std::io::Result<()> {
    let mut out = String::new();
    let t = &g.lifted;
    writeln!(out, "(define (domain {}-grounded)", t.domain_name).unwrap();
    writeln!(
        out,
        "  (:requirements :strips :typing :equality :durative-actions :numeric-fluents)"
    )
    .unwrap();
    // built-in types and constants are skipped (the first three / two entries)
    let types = t
        .types
        .iter()
        .skip(3)
        .map(|tp| {
            let parents = tp.parents.iter().map(|&p| t.type_name(p)).join(" ");
            format!("{} - {}", tp.name, parents)
        })
        .join(" ");
    if !types.is_empty() {
        writeln!(out, "  (:types {types})").unwrap();
    }
    let consts = t
        .objects
        .iter()
        .skip(2)
        .map(|o| {
            let tps = o.types.iter().map(|&p| t.type_name(p)).join(" ");
            format!("{} - {}", o.name, tps)
        })
        .join(" ");
    if !consts.is_empty() {
        writeln!(out, "  (:constants {consts})").unwrap();
    }
    let preds = t
        .functions
        .iter()
        .filter(|f| f.value == ValueKind::Boolean)
        .map(|f| decl_string(t, f))
        .join(" ");
    writeln!(out, "  (:predicates {preds})").unwrap();
    let fns = t
        .functions
        .iter()
        .filter(|f| f.value != ValueKind::Boolean)
        .map(|f| decl_string(t, f))
        .join(" ");
    if !fns.is_empty() {
        writeln!(out, "  (:functions {fns})").unwrap();
    }
    for a in &g.actions {
        write_action(g, a, &mut out);
    }
    writeln!(out, ")").unwrap();
    std::fs::File::create(dir.join("GroundedDomain.pddl"))?.write_all(out.as_bytes())
}

pub fn write_pddl_problem(g: &GroundedTask, dir: &Path) -> std::io::Result<()> {
    let mut out = String::new();
    let t = &g.lifted;
    writeln!(out, "(define (problem {})", t.problem_name).unwrap();
    writeln!(out, "  (:domain {}-grounded)", t.domain_name).unwrap();
    writeln!(out, "  (:init").unwrap();
    for (i, f) in g.fluents.iter().enumerate() {
        let v = g.init[i];
        let name = display_fluent(t, f);
        if func_kind(t, f.func) == ValueKind::Boolean {
            if v == TRUE_OBJECT {
                writeln!(out, "    {name}").unwrap();
            }
        } else if v != FALSE_OBJECT {
            writeln!(out, "    (= {name} {})", t.object_name(v)).unwrap();
        }
    }
    for (i, f) in g.num_fluents.iter().enumerate() {
        writeln!(out, "    (= {} {})", display_fluent(t, f), g.num_init[i]).unwrap();
    }
    for til in &g.tils {
        let name = g.fluent_name(til.var);
        let lit = if til.value == TRUE_OBJECT {
            name
        } else if til.value == FALSE_OBJECT {
            format!("(not {name})")
        } else {
            format!("(= {name} {})", t.object_name(til.value))
        };
        writeln!(out, "    (at {} {lit})", til.time).unwrap();
    }
    writeln!(out, "  )").unwrap();
    let goal = g
        .goal
        .iter()
        .map(|conj| conj_string(g, conj))
        .collect::<Vec<_>>();
    match goal.len() {
        0 => writeln!(out, "  (:goal (and))").unwrap(),
        1 => writeln!(out, "  (:goal {})", goal[0]).unwrap(),
        _ => writeln!(out, "  (:goal (or {}))", goal.join(" ")).unwrap(),
    }
    writeln!(out, ")").unwrap();
    std::fs::File::create(dir.join("GroundedProblem.pddl"))?.write_all(out.as_bytes())
}

fn func_kind(t: &Task, f: FunctionId) -> ValueKind {
    t.functions[usize::from(f)].value
}

fn decl_string(t: &Task, f: &Function) -> String {
    let params = f
        .params
        .iter()
        .enumerate()
        .map(|(i, &tp)| format!("?x{i} - {}", t.type_name(tp)))
        .join(" ");
    if params.is_empty() {
        format!("({})", f.name)
    } else {
        format!("({} {params})", f.name)
    }
}

fn cond_string(g: &GroundedTask, c: &GroundCond) -> String {
    let name = g.fluent_name(c.var);
    let f = &g.fluents[usize::from(c.var)];
    if func_kind(&g.lifted, f.func) == ValueKind::Boolean {
        let positive = (c.value == TRUE_OBJECT) != c.negated;
        if positive {
            name
        } else {
            format!("(not {name})")
        }
    } else {
        let eq = format!("(= {name} {})", g.lifted.object_name(c.value));
        if c.negated {
            format!("(not {eq})")
        } else {
            eq
        }
    }
}

fn eff_string(g: &GroundedTask, e: &GroundEff) -> String {
    let name = g.fluent_name(e.var);
    let f = &g.fluents[usize::from(e.var)];
    if func_kind(&g.lifted, f.func) == ValueKind::Boolean {
        if e.value == TRUE_OBJECT {
            name
        } else {
            format!("(not {name})")
        }
    } else {
        format!("(assign {name} {})", g.lifted.object_name(e.value))
    }
}

pub fn expr_string(g: &GroundedTask, e: &GroundNumExpr) -> String {
    match e {
        GroundNumExpr::Number(n) => format!("{n}"),
        GroundNumExpr::Var(v) => g.num_fluent_name(*v),
        GroundNumExpr::Duration => "?duration".to_string(),
        GroundNumExpr::SharpT => "#t".to_string(),
        GroundNumExpr::ControlVar(i) => format!("?_cv{i}"),
        GroundNumExpr::Add(a, b) => format!("(+ {} {})", expr_string(g, a), expr_string(g, b)),
        GroundNumExpr::Sub(a, b) => format!("(- {} {})", expr_string(g, a), expr_string(g, b)),
        GroundNumExpr::Mul(a, b) => format!("(* {} {})", expr_string(g, a), expr_string(g, b)),
        GroundNumExpr::Div(a, b) => format!("(/ {} {})", expr_string(g, a), expr_string(g, b)),
    }
}

fn num_cond_string(g: &GroundedTask, c: &GroundNumCond) -> String {
    let comp = match c.comp {
        Comparator::Neq => return format!(
            "(not (= {} {}))",
            expr_string(g, &c.left),
            expr_string(g, &c.right)
        ),
        other => other,
    };
    format!(
        "({comp} {} {})",
        expr_string(g, &c.left),
        expr_string(g, &c.right)
    )
}

fn num_eff_string(g: &GroundedTask, e: &GroundNumEff) -> String {
    let op = match e.op {
        AssignOp::Assign => "assign",
        AssignOp::Increase => "increase",
        AssignOp::Decrease => "decrease",
        AssignOp::ScaleUp => "scale-up",
        AssignOp::ScaleDown => "scale-down",
    };
    format!(
        "({op} {} {})",
        g.num_fluent_name(e.var),
        expr_string(g, &e.expr)
    )
}

fn conj_string(g: &GroundedTask, conj: &GroundConj) -> String {
    let parts = conj
        .conds
        .iter()
        .map(|c| cond_string(g, c))
        .chain(conj.num_conds.iter().map(|c| num_cond_string(g, c)))
        .join(" ");
    format!("(and {parts})")
}

fn write_action(g: &GroundedTask, a: &GroundAction, out: &mut String) {
    let mangled = std::iter::once(a.op_name.as_str())
        .chain(a.params.iter().map(|&p| g.lifted.object_name(p)))
        .join("_");
    if a.is_instantaneous() {
        let pre = a
            .cond_start
            .iter()
            .map(|c| cond_string(g, c))
            .chain(a.num_cond_start.iter().map(|c| num_cond_string(g, c)))
            .join(" ");
        let eff = a
            .eff_start
            .iter()
            .map(|e| eff_string(g, e))
            .chain(a.num_eff_start.iter().map(|e| num_eff_string(g, e)))
            .join(" ");
        writeln!(
            out,
            "  (:action {mangled}\n    :parameters ()\n    :precondition (and {pre})\n    :effect (and {eff}))"
        )
        .unwrap();
    } else {
        let duration = a
            .duration
            .iter()
            .map(|d| format!("({} ?duration {})", d.comp, expr_string(g, &d.expr)))
            .join(" ");
        let duration = if a.duration.len() == 1 {
            duration
        } else {
            format!("(and {duration})")
        };
        let conds = [
            ("at start", &a.cond_start, &a.num_cond_start),
            ("over all", &a.cond_over_all, &a.num_cond_over_all),
            ("at end", &a.cond_end, &a.num_cond_end),
        ]
        .iter()
        .flat_map(|(tag, cs, ns)| {
            cs.iter()
                .map(|c| format!("({tag} {})", cond_string(g, c)))
                .chain(ns.iter().map(|c| format!("({tag} {})", num_cond_string(g, c))))
                .collect::<Vec<_>>()
        })
        .join(" ");
        let effs = [
            ("at start", &a.eff_start, &a.num_eff_start),
            ("at end", &a.eff_end, &a.num_eff_end),
        ]
        .iter()
        .flat_map(|(tag, es, ns)| {
            es.iter()
                .map(|e| format!("({tag} {})", eff_string(g, e)))
                .chain(ns.iter().map(|e| format!("({tag} {})", num_eff_string(g, e))))
                .collect::<Vec<_>>()
        })
        .join(" ");
        writeln!(
            out,
            "  (:durative-action {mangled}\n    :parameters ()\n    :duration {duration}\n    :condition (and {conds})\n    :effect (and {effs}))"
        )
        .unwrap();
    }
}
