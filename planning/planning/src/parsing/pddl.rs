//! PDDL 2.1 reader: domains and problems with durative actions, numeric
//! fluents, conditional effects, timed initial literals, preferences and
//! constraints.
//!
//! The reader resolves every name against the task being built (types,
//! objects, functions, parameters in scope), so undefined-symbol and arity
//! errors are reported here, with their source location. Operator bodies are
//! kept in raw form ([`RawOperator`]) and lowered to the grounder's normal
//! form by the `preprocessing` module.

use crate::model::*;
use crate::parsing::sexpr::{parse, ErrLoc, Input, ListIter, SExpr, SList, Sym};
use crate::parsing::{EffDesc, EffTime, PddlError, RawOperator, TimeSpec};
use smallvec::SmallVec;

type R<T> = Result<T, ErrLoc>;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum PddlFeature {
    Strips,
    Typing,
    Equality,
    NegativePreconditions,
    DisjunctivePreconditions,
    ExistentialPreconditions,
    UniversalPreconditions,
    QuantifiedPreconditions,
    Adl,
    Fluents,
    NumericFluents,
    ObjectFluents,
    DurativeActions,
    DurationInequalities,
    ContinuousEffects,
    ConditionalEffects,
    TimedInitialLiterals,
    Preferences,
    Constraints,
}

impl PddlFeature {
    fn from_sym(s: &Sym) -> R<PddlFeature> {
        use PddlFeature::*;
        match s.as_str() {
            ":strips" => Ok(Strips),
            ":typing" => Ok(Typing),
            ":equality" => Ok(Equality),
            ":negative-preconditions" => Ok(NegativePreconditions),
            ":disjunctive-preconditions" => Ok(DisjunctivePreconditions),
            ":existential-preconditions" => Ok(ExistentialPreconditions),
            ":universal-preconditions" => Ok(UniversalPreconditions),
            ":quantified-preconditions" => Ok(QuantifiedPreconditions),
            ":adl" => Ok(Adl),
            ":fluents" => Ok(Fluents),
            ":numeric-fluents" => Ok(NumericFluents),
            ":object-fluents" => Ok(ObjectFluents),
            ":durative-actions" => Ok(DurativeActions),
            ":duration-inequalities" => Ok(DurationInequalities),
            ":continuous-effects" => Ok(ContinuousEffects),
            ":conditional-effects" => Ok(ConditionalEffects),
            ":timed-initial-literals" => Ok(TimedInitialLiterals),
            ":preferences" => Ok(Preferences),
            ":constraints" => Ok(Constraints),
            _ => Err(s.invalid("unsupported requirement")),
        }
    }
}

/// Parses a domain file into `task`, returning the raw operators.
pub fn parse_domain(task: &mut Task, input: Input) -> Result<Vec<RawOperator>, PddlError> {
    let e = parse(input).map_err(PddlError::Syntax)?;
    read_domain(task, &e).map_err(PddlError::Semantic)
}

/// Parses a problem file into `task`.
pub fn parse_problem(task: &mut Task, input: Input) -> Result<(), PddlError> {
    let e = parse(input).map_err(PddlError::Syntax)?;
    read_problem(task, &e).map_err(PddlError::Semantic)
}

fn read_domain(task: &mut Task, e: &SExpr) -> R<Vec<RawOperator>> {
    let mut it = e
        .as_list_iter()
        .ok_or_else(|| e.invalid("expected a list"))?;
    it.pop_known_atom("define")?;
    let mut head = it.pop_list()?.iter();
    head.pop_known_atom("domain")?;
    task.domain_name = head.pop_atom()?.as_str().to_string();

    let mut operators = Vec::new();
    for block in it {
        let list = block
            .as_list()
            .ok_or_else(|| block.invalid("expected a list"))?;
        let mut content = list.iter();
        let key = content.pop_atom()?;
        match key.as_str() {
            ":requirements" => {
                for r in content {
                    let sym = r.as_atom().ok_or_else(|| r.invalid("expected an atom"))?;
                    PddlFeature::from_sym(sym)?;
                }
            }
            ":types" => read_types(task, content)?,
            ":constants" => read_objects(task, content)?,
            ":predicates" => {
                for p in content {
                    read_function(task, p, ValueKind::Boolean)?;
                }
            }
            ":functions" => read_functions(task, content)?,
            ":action" => operators.push(read_action(task, content, list)?),
            ":durative-action" => operators.push(read_durative_action(task, content, list)?),
            ":constraints" => {
                let parsed = {
                    let scope = Scope::root(task);
                    content
                        .map(|c| read_constraint(task, &scope, c))
                        .collect::<R<Vec<_>>>()?
                };
                task.constraints.extend(parsed);
            }
            _ => return Err(key.invalid("unexpected domain block")),
        }
    }
    Ok(operators)
}

fn read_problem(task: &mut Task, e: &SExpr) -> R<()> {
    let mut it = e
        .as_list_iter()
        .ok_or_else(|| e.invalid("expected a list"))?;
    it.pop_known_atom("define")?;
    let mut head = it.pop_list()?.iter();
    head.pop_known_atom("problem")?;
    task.problem_name = head.pop_atom()?.as_str().to_string();

    for block in it {
        let list = block
            .as_list()
            .ok_or_else(|| block.invalid("expected a list"))?;
        let mut content = list.iter();
        let key = content.pop_atom()?;
        match key.as_str() {
            ":domain" => {
                let name = content.pop_atom()?;
                if name.as_str() != task.domain_name {
                    return Err(name.invalid(format!(
                        "problem is declared for domain `{}`, not `{}`",
                        name,
                        task.domain_name
                    )));
                }
            }
            ":requirements" => {
                for r in content {
                    let sym = r.as_atom().ok_or_else(|| r.invalid("expected an atom"))?;
                    PddlFeature::from_sym(sym)?;
                }
            }
            ":objects" => read_objects(task, content)?,
            ":init" => {
                for f in content {
                    let fact = read_init_element(task, f)?;
                    task.init.push(fact);
                }
            }
            ":goal" => {
                let g = content.pop()?;
                let scope = Scope::root(task);
                task.goal = read_goal(task, &scope, g)?;
            }
            ":constraints" => {
                let parsed = {
                    let scope = Scope::root(task);
                    content
                        .map(|c| read_constraint(task, &scope, c))
                        .collect::<R<Vec<_>>>()?
                };
                task.constraints.extend(parsed);
            }
            ":metric" => {
                let dir = content.pop_atom()?;
                let minimize = match dir.as_str() {
                    "minimize" => true,
                    "maximize" => false,
                    _ => return Err(dir.invalid("expected `minimize` or `maximize`")),
                };
                let scope = Scope::root(task);
                let expr = read_metric_expr(task, &scope, content.pop()?)?;
                task.metric = Some(Metric { minimize, expr });
            }
            _ => return Err(key.invalid("unexpected problem block")),
        }
    }
    Ok(())
}

/// Parses a typed list of symbols: `a b - t c d - (either t1 t2) e`.
/// Untyped trailing symbols get the universal type.
fn read_typed_symbols(task: &Task, it: ListIter) -> R<Vec<(Sym, SmallVec<[TypeId; 2]>)>> {
    let mut result: Vec<(Sym, SmallVec<[TypeId; 2]>)> = Vec::new();
    let mut untyped: Vec<Sym> = Vec::new();
    let mut it = it.peekable();
    while let Some(e) = it.next() {
        if e.is_atom("-") {
            let tpe = it
                .next()
                .ok_or_else(|| e.invalid("expected a type after `-`"))?;
            let types = read_type_ref(task, tpe)?;
            for sym in untyped.drain(..) {
                result.push((sym, types.clone()));
            }
        } else {
            let sym = e.as_atom().ok_or_else(|| e.invalid("expected a name"))?;
            untyped.push(sym.clone());
        }
    }
    for sym in untyped {
        result.push((sym, SmallVec::from_slice(&[OBJECT_TYPE])));
    }
    Ok(result)
}

/// A type reference: a name or `(either t1 t2)`.
fn read_type_ref(task: &Task, e: &SExpr) -> R<SmallVec<[TypeId; 2]>> {
    match e {
        SExpr::Atom(a) => {
            let name = if a.as_str() == "number" { "#number" } else { a.as_str() };
            let t = task
                .type_id(name)
                .ok_or_else(|| a.invalid("undefined type"))?;
            Ok(SmallVec::from_slice(&[t]))
        }
        SExpr::List(l) => {
            let mut it = l.iter();
            it.pop_known_atom("either")?;
            let mut types = SmallVec::new();
            for t in it {
                let a = t.as_atom().ok_or_else(|| t.invalid("expected a type"))?;
                types.push(
                    task.type_id(a.as_str())
                        .ok_or_else(|| a.invalid("undefined type"))?,
                );
            }
            Ok(types)
        }
    }
}

fn read_types(task: &mut Task, it: ListIter) -> R<()> {
    for (name, parents) in read_typed_symbols(task, it)? {
        if task.type_id(name.as_str()).is_some() {
            // redeclaring a type only adds parents in PDDL, reject instead
            return Err(name.invalid("type declared twice"));
        }
        task.types.push(Tpe {
            name: name.as_str().to_string(),
            parents,
        });
    }
    Ok(())
}

fn read_objects(task: &mut Task, it: ListIter) -> R<()> {
    for (name, types) in read_typed_symbols(task, it)? {
        if task.object_id(name.as_str()).is_some() {
            return Err(name.invalid("object declared twice"));
        }
        task.objects.push(Object {
            name: name.as_str().to_string(),
            types,
        });
    }
    Ok(())
}

fn read_functions(task: &mut Task, it: ListIter) -> R<()> {
    // functions come as `(f ?x - t) - <type>` groups; an untyped group is numeric
    let mut pending: Vec<&SExpr> = Vec::new();
    let mut it = it.peekable();
    while let Some(e) = it.next() {
        if e.is_atom("-") {
            let tpe = it
                .next()
                .ok_or_else(|| e.invalid("expected a type after `-`"))?;
            let value = match tpe {
                SExpr::Atom(a) if a.as_str() == "number" || a.as_str() == "#number" => {
                    ValueKind::Numeric
                }
                _ => {
                    let types = read_type_ref(task, tpe)?;
                    if types.len() != 1 {
                        return Err(tpe.invalid("function value type cannot be an `either`"));
                    }
                    ValueKind::Symbolic(types[0])
                }
            };
            for decl in pending.drain(..) {
                read_function(task, decl, value)?;
            }
        } else {
            pending.push(e);
        }
    }
    for decl in pending {
        read_function(task, decl, ValueKind::Numeric)?;
    }
    Ok(())
}

fn read_function(task: &mut Task, decl: &SExpr, value: ValueKind) -> R<()> {
    let mut it = decl
        .as_list_iter()
        .ok_or_else(|| decl.invalid("expected a declaration"))?;
    let name = it.pop_atom()?;
    if task.function_id(name.as_str()).is_some() {
        return Err(name.invalid("function declared twice"));
    }
    let params = read_typed_symbols(task, it)?
        .into_iter()
        .map(|(_, types)| types[0])
        .collect();
    task.functions.push(Function {
        name: name.as_str().to_string(),
        params,
        value,
    });
    Ok(())
}

/// Name-resolution scope for the body of an operator or goal.
struct Scope<'a> {
    task: &'a Task,
    /// Parameters in scope, outermost first; index is the `Term::Param` index.
    vars: Vec<String>,
    /// Control parameters of the enclosing durative action.
    control: Vec<String>,
    in_durative: bool,
}

impl<'a> Scope<'a> {
    fn root(task: &'a Task) -> Scope<'a> {
        Scope {
            task,
            vars: Vec::new(),
            control: Vec::new(),
            in_durative: false,
        }
    }

    fn with_vars(&self, params: &[Param]) -> Scope<'a> {
        let mut vars = self.vars.clone();
        vars.extend(params.iter().map(|p| p.name.clone()));
        Scope {
            task: self.task,
            vars,
            control: self.control.clone(),
            in_durative: self.in_durative,
        }
    }

    fn term(&self, s: &Sym) -> R<Term> {
        if s.as_str().starts_with('?') {
            match self.vars.iter().rposition(|v| v == s.as_str()) {
                Some(i) => Ok(Term::Param(i)),
                None => Err(s.invalid("unbound variable")),
            }
        } else {
            match self.task.object_id(s.as_str()) {
                Some(o) => Ok(Term::Obj(o)),
                None => Err(s.invalid("undefined object")),
            }
        }
    }
}

fn read_params(task: &Task, list: &SList) -> R<Vec<Param>> {
    let params = read_typed_symbols(task, list.iter())?;
    Ok(params
        .into_iter()
        .map(|(name, types)| Param {
            name: name.as_str().to_string(),
            types,
        })
        .collect())
}

/// Reads a fluent reference `(f t1 t2)`, checking arity and argument kinds.
fn read_atom(scope: &Scope, list: &SList) -> R<(Atom, &'static str)> {
    let mut it = list.iter();
    let name = it.pop_atom()?;
    let func = scope
        .task
        .function_id(name.as_str())
        .ok_or_else(|| name.invalid("undefined predicate or function"))?;
    let decl = &scope.task.functions[usize::from(func)];
    if it.len() != decl.params.len() {
        return Err(list.invalid(format!(
            "`{}` takes {} arguments, {} given",
            name,
            decl.params.len(),
            it.len()
        )));
    }
    let mut args = SmallVec::new();
    for a in it {
        let sym = a.as_atom().ok_or_else(|| a.invalid("expected a term"))?;
        args.push(scope.term(sym)?);
    }
    let kind = match decl.value {
        ValueKind::Boolean => "bool",
        ValueKind::Numeric => "num",
        ValueKind::Symbolic(_) => "sym",
    };
    Ok((Atom { func, args }, kind))
}

fn comparator(s: &str) -> Option<Comparator> {
    match s {
        "=" => Some(Comparator::Eq),
        "<" => Some(Comparator::Less),
        "<=" => Some(Comparator::LessEq),
        ">" => Some(Comparator::Greater),
        ">=" => Some(Comparator::GreaterEq),
        _ => None,
    }
}

fn read_num_expr(scope: &Scope, e: &SExpr) -> R<NumExpr> {
    match e {
        SExpr::Atom(a) => {
            if let Ok(n) = a.as_str().parse::<f64>() {
                Ok(NumExpr::Number(n))
            } else if a.as_str() == "?duration" {
                if !scope.in_durative {
                    return Err(a.invalid("`?duration` outside a durative action"));
                }
                Ok(NumExpr::Duration)
            } else if a.as_str() == "#t" {
                Ok(NumExpr::SharpT)
            } else if let Some(i) = scope.control.iter().position(|c| c == a.as_str()) {
                Ok(NumExpr::ControlParam(i))
            } else {
                Err(a.invalid("expected a number, `?duration`, `#t` or a control parameter"))
            }
        }
        SExpr::List(l) => {
            let head = l[0]
                .as_atom()
                .ok_or_else(|| l.invalid("expected an expression"))?;
            match head.as_str() {
                "+" | "-" | "*" | "/" => {
                    let mut it = l.iter();
                    it.pop()?;
                    let first = read_num_expr(scope, it.pop()?)?;
                    if it.is_empty() {
                        // unary minus
                        return match head.as_str() {
                            "-" => Ok(NumExpr::Sub(
                                Box::new(NumExpr::Number(0.0)),
                                Box::new(first),
                            )),
                            _ => Err(l.invalid("missing operand")),
                        };
                    }
                    let mut acc = first;
                    for operand in it {
                        let rhs = read_num_expr(scope, operand)?;
                        acc = match head.as_str() {
                            "+" => NumExpr::Add(Box::new(acc), Box::new(rhs)),
                            "-" => NumExpr::Sub(Box::new(acc), Box::new(rhs)),
                            "*" => NumExpr::Mul(Box::new(acc), Box::new(rhs)),
                            _ => NumExpr::Div(Box::new(acc), Box::new(rhs)),
                        };
                    }
                    Ok(acc)
                }
                _ => {
                    let (atom, kind) = read_atom(scope, l)?;
                    if kind != "num" {
                        return Err(l.invalid("expected a numeric fluent"));
                    }
                    Ok(NumExpr::Fluent(atom))
                }
            }
        }
    }
}

/// Reads a goal description (precondition, goal, preference body).
fn read_goal(task: &Task, scope: &Scope, e: &SExpr) -> R<GoalDesc> {
    let list = e.as_list().ok_or_else(|| e.invalid("expected a condition"))?;
    if list.is_empty() {
        return Ok(GoalDesc::And(Vec::new()));
    }
    let head = list[0]
        .as_atom()
        .ok_or_else(|| list.invalid("expected a condition"))?;
    let mut it = list.iter();
    match head.as_str() {
        "and" | "or" => {
            it.pop()?;
            let sub: Vec<GoalDesc> = it
                .map(|g| read_goal(task, scope, g))
                .collect::<R<Vec<_>>>()?;
            if head.as_str() == "and" {
                Ok(GoalDesc::And(sub))
            } else {
                Ok(GoalDesc::Or(sub))
            }
        }
        "not" => {
            it.pop()?;
            let inner = read_goal(task, scope, it.pop()?)?;
            Ok(GoalDesc::Not(Box::new(inner)))
        }
        "imply" => {
            it.pop()?;
            let a = read_goal(task, scope, it.pop()?)?;
            let b = read_goal(task, scope, it.pop()?)?;
            Ok(GoalDesc::Imply(Box::new(a), Box::new(b)))
        }
        "forall" | "exists" => {
            it.pop()?;
            let params = read_params(task, it.pop_list()?)?;
            let inner_scope = scope.with_vars(&params);
            let body = read_goal(task, &inner_scope, it.pop()?)?;
            if head.as_str() == "forall" {
                Ok(GoalDesc::Forall(params, Box::new(body)))
            } else {
                Ok(GoalDesc::Exists(params, Box::new(body)))
            }
        }
        "preference" => {
            it.pop()?;
            let name = it.pop_atom()?.as_str().to_string();
            let body = read_goal(task, scope, it.pop()?)?;
            Ok(GoalDesc::Preference(name, Box::new(body)))
        }
        "=" | "<" | "<=" | ">" | ">=" => read_comparison(scope, list),
        _ => {
            let (atom, kind) = read_atom(scope, list)?;
            if kind != "bool" {
                return Err(list.invalid("expected a predicate"));
            }
            Ok(GoalDesc::Fluent(FluentCond {
                atom,
                value: Term::Obj(TRUE_OBJECT),
                negated: false,
            }))
        }
    }
}

/// `(= x y)` may be an object equality, an object-fluent condition or a
/// numeric comparison; the other comparators are always numeric.
fn read_comparison(scope: &Scope, list: &SList) -> R<GoalDesc> {
    let mut it = list.iter();
    let head = it.pop_atom()?;
    let comp = comparator(head.as_str()).unwrap();
    let lhs = it.pop()?;
    let rhs = it.pop()?;
    if comp == Comparator::Eq {
        match lhs {
            SExpr::Atom(a) if a.as_str().parse::<f64>().is_err() && a.as_str() != "?duration" => {
                // (= term term): parameter-binding constraint
                let left = scope.term(a)?;
                let r = rhs
                    .as_atom()
                    .ok_or_else(|| rhs.invalid("expected a term"))?;
                let right = scope.term(r)?;
                return Ok(GoalDesc::Equality(EqualityCond {
                    left,
                    right,
                    negated: false,
                }));
            }
            SExpr::List(l) => {
                let (atom, kind) = read_atom(scope, l)?;
                if kind == "sym" {
                    let r = rhs
                        .as_atom()
                        .ok_or_else(|| rhs.invalid("expected a term"))?;
                    let value = scope.term(r)?;
                    return Ok(GoalDesc::Fluent(FluentCond {
                        atom,
                        value,
                        negated: false,
                    }));
                }
            }
            _ => {}
        }
    }
    let left = read_num_expr(scope, lhs)?;
    let right = read_num_expr(scope, rhs)?;
    Ok(GoalDesc::Numeric(NumericCond { comp, left, right }))
}

/// Reads an effect tree (instantaneous form, no time specifiers).
fn read_effect(task: &Task, scope: &Scope, e: &SExpr) -> R<EffDesc> {
    let list = e.as_list().ok_or_else(|| e.invalid("expected an effect"))?;
    if list.is_empty() {
        return Ok(EffDesc::And(Vec::new()));
    }
    let head = list[0]
        .as_atom()
        .ok_or_else(|| list.invalid("expected an effect"))?;
    let mut it = list.iter();
    match head.as_str() {
        "and" => {
            it.pop()?;
            let sub = it
                .map(|x| read_effect(task, scope, x))
                .collect::<R<Vec<_>>>()?;
            Ok(EffDesc::And(sub))
        }
        "forall" => {
            it.pop()?;
            let params = read_params(task, it.pop_list()?)?;
            let inner_scope = scope.with_vars(&params);
            let body = read_effect(task, &inner_scope, it.pop()?)?;
            Ok(EffDesc::Forall(params, Box::new(body)))
        }
        "when" => {
            it.pop()?;
            let cond = read_goal(task, scope, it.pop()?)?;
            let body = read_effect(task, scope, it.pop()?)?;
            Ok(EffDesc::When(cond, Box::new(body)))
        }
        "not" => {
            it.pop()?;
            let inner = it.pop_list()?;
            let (atom, kind) = read_atom(scope, inner)?;
            if kind != "bool" {
                return Err(inner.invalid("only predicates can be deleted"));
            }
            Ok(EffDesc::Fluent(FluentEff {
                atom,
                value: Term::Obj(FALSE_OBJECT),
            }))
        }
        "assign" | "increase" | "decrease" | "scale-up" | "scale-down" => {
            it.pop()?;
            let target = it.pop_list()?;
            let (atom, kind) = read_atom(scope, target)?;
            if kind == "sym" && head.as_str() == "assign" {
                let v = it.pop_atom()?;
                let value = scope.term(v)?;
                return Ok(EffDesc::Fluent(FluentEff { atom, value }));
            }
            if kind != "num" {
                return Err(target.invalid("expected a numeric fluent"));
            }
            let op = match head.as_str() {
                "assign" => AssignOp::Assign,
                "increase" => AssignOp::Increase,
                "decrease" => AssignOp::Decrease,
                "scale-up" => AssignOp::ScaleUp,
                _ => AssignOp::ScaleDown,
            };
            let expr = read_num_expr(scope, it.pop()?)?;
            Ok(EffDesc::Numeric(NumericEff {
                op,
                fluent: atom,
                expr,
            }))
        }
        _ => {
            let (atom, kind) = read_atom(scope, list)?;
            if kind != "bool" {
                return Err(list.invalid("expected a predicate effect"));
            }
            Ok(EffDesc::Fluent(FluentEff {
                atom,
                value: Term::Obj(TRUE_OBJECT),
            }))
        }
    }
}

fn read_action(task: &Task, mut it: ListIter, list: &SList) -> R<RawOperator> {
    let name = it.pop_atom()?.as_str().to_string();
    let mut op = RawOperator::new(name);
    let mut scope = Scope::root(task);
    while let Some(key) = it.next() {
        let key = key.as_atom().ok_or_else(|| key.invalid("expected a keyword"))?;
        match key.as_str() {
            ":parameters" => {
                op.params = read_params(task, it.pop_list()?)?;
                scope = Scope::root(task).with_vars(&op.params);
            }
            ":precondition" => {
                let g = read_goal(task, &scope, it.pop()?)?;
                op.conditions.push((TimeSpec::AtStart, g));
            }
            ":effect" => {
                // instantaneous actions apply their effects at the start
                // point; the end point only exists for scheduling
                let e = read_effect(task, &scope, it.pop()?)?;
                op.effects.push((EffTime::AtStart, e));
            }
            _ => return Err(key.invalid("unexpected action keyword")),
        }
    }
    if op.name.is_empty() {
        return Err(list.invalid("unnamed action"));
    }
    Ok(op)
}

fn read_durative_action(task: &Task, mut it: ListIter, _list: &SList) -> R<RawOperator> {
    let name = it.pop_atom()?.as_str().to_string();
    let mut op = RawOperator::new(name);
    op.durative = true;
    let mut scope = Scope::root(task);
    scope.in_durative = true;
    while let Some(key) = it.next() {
        let key = key.as_atom().ok_or_else(|| key.invalid("expected a keyword"))?;
        match key.as_str() {
            ":parameters" => {
                op.params = read_params(task, it.pop_list()?)?;
                let mut s = Scope::root(task).with_vars(&op.params);
                s.in_durative = true;
                s.control = op.control_params.clone();
                scope = s;
            }
            ":control" => {
                // free numeric parameters: `(?v - number ...)`
                let params = read_typed_symbols(task, it.pop_list()?.iter())?;
                for (sym, types) in params {
                    if types.iter().any(|&t| t != NUMBER_TYPE && t != INTEGER_TYPE) {
                        return Err(sym.invalid("control parameters must be numeric"));
                    }
                    op.control_params.push(sym.as_str().to_string());
                }
                scope.control = op.control_params.clone();
            }
            ":duration" => read_duration(&scope, it.pop()?, &mut op.duration)?,
            ":condition" => read_durative_cond(task, &scope, it.pop()?, &mut op.conditions)?,
            ":effect" => read_durative_eff(task, &scope, it.pop()?, &mut op.effects)?,
            _ => return Err(key.invalid("unexpected durative-action keyword")),
        }
    }
    Ok(op)
}

fn read_duration(scope: &Scope, e: &SExpr, out: &mut Vec<DurationConstraint>) -> R<()> {
    if let Some(args) = e.as_application("and") {
        for a in args {
            read_duration(scope, a, out)?;
        }
        return Ok(());
    }
    let list = e
        .as_list()
        .ok_or_else(|| e.invalid("expected a duration constraint"))?;
    let mut it = list.iter();
    let comp_sym = it.pop_atom()?;
    let comp = comparator(comp_sym.as_str())
        .ok_or_else(|| comp_sym.invalid("expected a comparator"))?;
    it.pop_known_atom("?duration")?;
    let expr = read_num_expr(scope, it.pop()?)?;
    out.push(DurationConstraint { comp, expr });
    Ok(())
}

fn read_durative_cond(
    task: &Task,
    scope: &Scope,
    e: &SExpr,
    out: &mut Vec<(TimeSpec, GoalDesc)>,
) -> R<()> {
    if let Some(args) = e.as_application("and") {
        for a in args {
            read_durative_cond(task, scope, a, out)?;
        }
        return Ok(());
    }
    let list = e
        .as_list()
        .ok_or_else(|| e.invalid("expected a timed condition"))?;
    if list.is_empty() {
        return Ok(());
    }
    let mut it = list.iter();
    let head = it.pop_atom()?;
    let time = match head.as_str() {
        "at" => {
            let when = it.pop_atom()?;
            match when.as_str() {
                "start" => TimeSpec::AtStart,
                "end" => TimeSpec::AtEnd,
                _ => return Err(when.invalid("expected `start` or `end`")),
            }
        }
        "over" => {
            it.pop_known_atom("all")?;
            TimeSpec::OverAll
        }
        _ => return Err(head.invalid("expected `at start`, `at end` or `over all`")),
    };
    let g = read_goal(task, scope, it.pop()?)?;
    out.push((time, g));
    Ok(())
}

fn read_durative_eff(
    task: &Task,
    scope: &Scope,
    e: &SExpr,
    out: &mut Vec<(EffTime, EffDesc)>,
) -> R<()> {
    if let Some(args) = e.as_application("and") {
        for a in args {
            read_durative_eff(task, scope, a, out)?;
        }
        return Ok(());
    }
    let list = e
        .as_list()
        .ok_or_else(|| e.invalid("expected a timed effect"))?;
    let mut it = list.iter();
    let head = it.pop_atom()?;
    match head.as_str() {
        "at" => {
            let when = it.pop_atom()?;
            let time = match when.as_str() {
                "start" => EffTime::AtStart,
                "end" => EffTime::AtEnd,
                _ => return Err(when.invalid("expected `start` or `end`")),
            };
            let eff = read_effect(task, scope, it.pop()?)?;
            out.push((time, eff));
        }
        "when" => {
            let mut conds = Vec::new();
            read_durative_cond(task, scope, it.pop()?, &mut conds)?;
            let mut effs = Vec::new();
            read_durative_eff(task, scope, it.pop()?, &mut effs)?;
            out.push((EffTime::AtStart, EffDesc::TimedWhen(conds, effs)));
        }
        "increase" | "decrease" => {
            // continuous effect over the whole interval; its `#t` expression
            // is integrated at the end point
            let eff = read_effect(task, scope, e)?;
            out.push((EffTime::AtEnd, eff));
        }
        _ => return Err(head.invalid("expected `at start`, `at end` or a continuous effect")),
    }
    Ok(())
}

/// One element of `(:init ...)`: a literal, a numeric/object assignment or a
/// timed initial literal `(at <time> <literal>)`.
fn read_init_element(task: &Task, e: &SExpr) -> R<Fact> {
    let scope = Scope::root(task);
    let list = e.as_list().ok_or_else(|| e.invalid("expected a fact"))?;
    if list.is_empty() {
        return Err(list.invalid("empty fact"));
    }
    let head = list[0]
        .as_atom()
        .ok_or_else(|| list.invalid("expected a fact"))?;
    // `(at 3.0 <literal>)` is a TIL only when the second element is a number
    if head.as_str() == "at" && list.len() == 3 {
        if let Some(t) = list[1].as_atom().and_then(|a| a.as_str().parse::<f64>().ok()) {
            let mut inner = read_init_element(task, &list[2])?;
            if inner.time.is_some() {
                return Err(list[2].invalid("nested timed initial literal"));
            }
            inner.time = Some(t);
            return Ok(inner);
        }
    }
    if head.as_str() == "not" {
        let mut it = list.iter();
        it.pop()?;
        let inner = it.pop_list()?;
        let (atom, kind) = read_atom(&scope, inner)?;
        if kind != "bool" {
            return Err(inner.invalid("expected a predicate"));
        }
        return Ok(ground_fact(task, &atom, FactValue::Obj(FALSE_OBJECT), list)?);
    }
    if head.as_str() == "=" {
        let mut it = list.iter();
        it.pop()?;
        let target = it.pop_list()?;
        let (atom, kind) = read_atom(&scope, target)?;
        let value = it.pop()?;
        let fv = match kind {
            "num" => {
                let a = value
                    .as_atom()
                    .and_then(|a| a.as_str().parse::<f64>().ok())
                    .ok_or_else(|| value.invalid("expected a number"))?;
                FactValue::Num(a)
            }
            "sym" => {
                let v = value
                    .as_atom()
                    .ok_or_else(|| value.invalid("expected an object"))?;
                match scope.term(v)? {
                    Term::Obj(o) => FactValue::Obj(o),
                    Term::Param(_) => return Err(v.invalid("expected an object")),
                }
            }
            _ => return Err(target.invalid("`=` initialization of a predicate")),
        };
        return ground_fact(task, &atom, fv, list);
    }
    let (atom, kind) = read_atom(&scope, list)?;
    if kind != "bool" {
        return Err(list.invalid("expected a literal"));
    }
    ground_fact(task, &atom, FactValue::Obj(TRUE_OBJECT), list)
}

fn ground_fact(task: &Task, atom: &Atom, value: FactValue, loc: &SList) -> R<Fact> {
    let mut args = SmallVec::new();
    for a in &atom.args {
        match a {
            Term::Obj(o) => args.push(*o),
            Term::Param(_) => return Err(loc.invalid("initial facts must be ground")),
        }
    }
    // type-check the arguments against the function signature
    let decl = &task.functions[usize::from(atom.func)];
    for (i, (&arg, &tpe)) in args.iter().zip(decl.params.iter()).enumerate() {
        if !task.object_compatible(arg, &[tpe]) {
            return Err(loc.invalid(format!(
                "argument {} of `{}` has an incompatible type",
                i + 1,
                decl.name
            )));
        }
    }
    Ok(Fact {
        func: atom.func,
        args,
        value,
        time: None,
    })
}

fn read_constraint(task: &Task, scope: &Scope, e: &SExpr) -> R<Constraint> {
    let list = e
        .as_list()
        .ok_or_else(|| e.invalid("expected a constraint"))?;
    let mut it = list.iter();
    let head = it.pop_atom()?;
    match head.as_str() {
        "and" => {
            // a conjunction at top level is flattened into separate constraints
            let mut sub = Vec::new();
            for c in it {
                sub.push(read_constraint(task, scope, c)?);
            }
            if sub.len() == 1 {
                Ok(sub.into_iter().next().unwrap())
            } else {
                Err(list.invalid("use one `(:constraints ...)` entry per constraint"))
            }
        }
        "preference" => {
            let name = it.pop_atom()?.as_str().to_string();
            let inner = read_constraint(task, scope, it.pop()?)?;
            Ok(Constraint::Preference(name, Box::new(inner)))
        }
        "forall" => {
            let params = read_params(task, it.pop_list()?)?;
            let inner_scope = scope.with_vars(&params);
            let inner = read_constraint(task, &inner_scope, it.pop()?)?;
            Ok(Constraint::Forall(params, Box::new(inner)))
        }
        "at" => {
            it.pop_known_atom("end")?;
            Ok(Constraint::AtEnd(read_goal(task, scope, it.pop()?)?))
        }
        "always" => Ok(Constraint::Always(read_goal(task, scope, it.pop()?)?)),
        "sometime" => Ok(Constraint::Sometime(read_goal(task, scope, it.pop()?)?)),
        "within" => {
            let t = it.pop_atom()?;
            let bound = t
                .as_str()
                .parse::<f64>()
                .map_err(|_| t.invalid("expected a number"))?;
            Ok(Constraint::Within(bound, read_goal(task, scope, it.pop()?)?))
        }
        "at-most-once" => Ok(Constraint::AtMostOnce(read_goal(task, scope, it.pop()?)?)),
        "sometime-after" => {
            let a = read_goal(task, scope, it.pop()?)?;
            let b = read_goal(task, scope, it.pop()?)?;
            Ok(Constraint::SometimeAfter(a, b))
        }
        "sometime-before" => {
            let a = read_goal(task, scope, it.pop()?)?;
            let b = read_goal(task, scope, it.pop()?)?;
            Ok(Constraint::SometimeBefore(a, b))
        }
        _ => Err(head.invalid("unknown constraint")),
    }
}

fn read_metric_expr(task: &Task, scope: &Scope, e: &SExpr) -> R<MetricExpr> {
    match e {
        SExpr::Atom(a) => {
            if let Ok(n) = a.as_str().parse::<f64>() {
                Ok(MetricExpr::Number(n))
            } else if a.as_str() == "total-time" {
                Ok(MetricExpr::TotalTime)
            } else {
                Err(a.invalid("expected a number or `total-time`"))
            }
        }
        SExpr::List(l) => {
            let head = l[0]
                .as_atom()
                .ok_or_else(|| l.invalid("expected a metric expression"))?;
            let mut it = l.iter();
            match head.as_str() {
                "total-time" => Ok(MetricExpr::TotalTime),
                "is-violated" => {
                    it.pop()?;
                    let name = it.pop_atom()?;
                    Ok(MetricExpr::IsViolated(name.as_str().to_string()))
                }
                "+" | "*" => {
                    it.pop()?;
                    let sub = it
                        .map(|x| read_metric_expr(task, scope, x))
                        .collect::<R<Vec<_>>>()?;
                    if head.as_str() == "+" {
                        Ok(MetricExpr::Add(sub))
                    } else {
                        Ok(MetricExpr::Mul(sub))
                    }
                }
                "-" | "/" => {
                    it.pop()?;
                    let a = read_metric_expr(task, scope, it.pop()?)?;
                    let b = read_metric_expr(task, scope, it.pop()?)?;
                    if head.as_str() == "-" {
                        Ok(MetricExpr::Sub(Box::new(a), Box::new(b)))
                    } else {
                        Ok(MetricExpr::Div(Box::new(a), Box::new(b)))
                    }
                }
                _ => {
                    let (atom, kind) = read_atom(scope, l)?;
                    if kind != "num" {
                        return Err(l.invalid("expected a numeric fluent"));
                    }
                    Ok(MetricExpr::Fluent(atom))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "(define (domain logistics)
      (:requirements :strips :typing :durative-actions :numeric-fluents)
      (:types truck location)
      (:predicates (at ?t - truck ?l - location) (link ?a ?b - location))
      (:functions (fuel ?t - truck) (distance ?a ?b - location))
      (:durative-action drive
        :parameters (?t - truck ?from ?to - location)
        :duration (= ?duration (distance ?from ?to))
        :condition (and (at start (at ?t ?from)) (over all (link ?from ?to)))
        :effect (and (at start (not (at ?t ?from)))
                     (at end (at ?t ?to))
                     (at end (decrease (fuel ?t) (distance ?from ?to))))))";

    const PROBLEM: &str = "(define (problem move)
      (:domain logistics)
      (:objects tr - truck a b - location)
      (:init (at tr a) (link a b) (= (fuel tr) 10) (= (distance a b) 4)
             (at 5.0 (link b a)))
      (:goal (at tr b))
      (:metric minimize (total-time)))";

    fn parsed() -> (Task, Vec<RawOperator>) {
        let mut task = Task::new();
        let ops = parse_domain(&mut task, Input::from_string(DOMAIN)).unwrap();
        parse_problem(&mut task, Input::from_string(PROBLEM)).unwrap();
        (task, ops)
    }

    #[test]
    fn domain_symbols() {
        let (task, ops) = parsed();
        assert_eq!(task.domain_name, "logistics");
        assert!(task.type_id("truck").is_some());
        assert_eq!(task.functions.len(), 4);
        assert_eq!(ops.len(), 1);
        let drive = &ops[0];
        assert!(drive.durative);
        assert_eq!(drive.params.len(), 3);
        assert_eq!(drive.duration.len(), 1);
        assert_eq!(drive.conditions.len(), 2);
        assert_eq!(drive.effects.len(), 3);
    }

    #[test]
    fn init_and_til() {
        let (task, _) = parsed();
        assert_eq!(task.init.len(), 5);
        let til = task.init.iter().find(|f| f.time.is_some()).unwrap();
        assert_eq!(til.time, Some(5.0));
        let fuel = task
            .init
            .iter()
            .find(|f| task.function_name(f.func) == "fuel")
            .unwrap();
        assert_eq!(fuel.value, FactValue::Num(10.0));
    }

    #[test]
    fn undefined_symbol_is_reported_with_location() {
        let mut task = Task::new();
        let err = parse_domain(
            &mut task,
            Input::from_string("(define (domain d)\n (:predicates (p ?x - nowhere)))"),
        )
        .unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("undefined type"), "{msg}");
        assert!(msg.contains(":2:"), "{msg}");
    }

    #[test]
    fn goal_rejects_unknown_predicate() {
        let mut task = Task::new();
        let _ = parse_domain(&mut task, Input::from_string(DOMAIN)).unwrap();
        let bad = "(define (problem p) (:domain logistics)
                   (:objects tr - truck) (:goal (flying tr)))";
        let err = parse_problem(&mut task, Input::from_string(bad)).unwrap_err();
        assert!(format!("{err}").contains("undefined predicate"));
    }
}
