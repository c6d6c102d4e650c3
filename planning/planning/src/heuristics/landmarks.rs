//! Landmarks: fluents (or disjunctions of fluents) every plan from the
//! current state must achieve, with necessary orderings between them.
//!
//! Candidates come from a backward traversal of the temporal RPG: a
//! precondition shared by every first producer of a landmark is itself a
//! candidate, and per-function groups of preconditions that jointly cover the
//! producers yield disjunctive candidates. Every candidate is confirmed by
//! re-running relaxed reachability with the candidate forbidden. Orderings go
//! through a transitive reduction; cycles (possible on ill-formed inputs)
//! collapse into disjunctive landmarks.

use super::temporal_rpg::TemporalRpg;
use crate::model::FunctionId;
use crate::sas::{SasTask, VarVal};
use crate::state::State;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

#[derive(Clone, Debug)]
pub struct LandmarkNode {
    /// One fluent for a single landmark, several for a disjunctive one.
    pub fluents: Vec<VarVal>,
    pub is_goal: bool,
}

impl LandmarkNode {
    pub fn is_single(&self) -> bool {
        self.fluents.len() == 1
    }

    pub fn holds(&self, state: &State) -> bool {
        self.fluents
            .iter()
            .any(|vv| state.values[usize::from(vv.var())] == vv.val())
    }
}

#[derive(Default)]
pub struct LandmarkGraph {
    pub nodes: Vec<LandmarkNode>,
    pub next: Vec<Vec<usize>>,
    pub prev: Vec<Vec<usize>>,
}

impl LandmarkGraph {
    /// Landmarks that carry search information: single-fluent, non-goal.
    pub fn informative_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_single() && !n.is_goal)
            .count()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn build(state: &State, task: &SasTask, epsilon: f64) -> LandmarkGraph {
        // landmarks are only sound when every plan satisfies the same goal
        // conjunction
        if task.goal_actions.len() != 1 {
            return LandmarkGraph::default();
        }
        let trpg = TemporalRpg::build(state, task, epsilon);
        let mut b = Builder {
            task,
            state,
            trpg,
            graph: LandmarkGraph::default(),
            index_of: HashMap::new(),
        };
        b.derive();
        let mut graph = b.graph;
        graph.collapse_cycles();
        graph.reduce_transitive_edges();
        tracing::debug!(
            landmarks = graph.nodes.len(),
            informative = graph.informative_count(),
            "landmark graph built"
        );
        graph
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        if from != to && !self.next[from].contains(&to) {
            self.next[from].push(to);
            self.prev[to].push(from);
        }
    }

    /// Tarjan SCC; components of size > 1 merge into one disjunctive node.
    fn collapse_cycles(&mut self) {
        let sccs = tarjan(&self.next);
        if sccs.iter().all(|c| c.len() == 1) {
            return;
        }
        let mut new_nodes = Vec::new();
        let mut remap = vec![0usize; self.nodes.len()];
        for comp in &sccs {
            let idx = new_nodes.len();
            let mut fluents = Vec::new();
            let mut is_goal = false;
            for &n in comp {
                remap[n] = idx;
                for &vv in &self.nodes[n].fluents {
                    if !fluents.contains(&vv) {
                        fluents.push(vv);
                    }
                }
                is_goal |= self.nodes[n].is_goal;
            }
            new_nodes.push(LandmarkNode { fluents, is_goal });
        }
        let mut next = vec![Vec::new(); new_nodes.len()];
        let mut prev = vec![Vec::new(); new_nodes.len()];
        for (from, succ) in self.next.iter().enumerate() {
            for &to in succ {
                let (f, t) = (remap[from], remap[to]);
                if f != t && !next[f].contains(&t) {
                    next[f].push(t);
                    prev[t].push(f);
                }
            }
        }
        self.nodes = new_nodes;
        self.next = next;
        self.prev = prev;
    }

    /// Removes orderings already implied by a longer path.
    fn reduce_transitive_edges(&mut self) {
        let n = self.nodes.len();
        let mut keep: Vec<Vec<usize>> = vec![Vec::new(); n];
        for from in 0..n {
            for &to in &self.next[from] {
                if !self.path_avoiding(from, to, (from, to)) {
                    keep[from].push(to);
                }
            }
        }
        let mut prev = vec![Vec::new(); n];
        for (from, succ) in keep.iter().enumerate() {
            for &to in succ {
                prev[to].push(from);
            }
        }
        self.next = keep;
        self.prev = prev;
    }

    /// Whether `to` is reachable from `from` without taking the direct edge.
    fn path_avoiding(&self, from: usize, to: usize, skip: (usize, usize)) -> bool {
        let mut stack: Vec<usize> = self.next[from]
            .iter()
            .copied()
            .filter(|&n| (from, n) != skip)
            .collect();
        let mut seen = vec![false; self.nodes.len()];
        while let Some(n) = stack.pop() {
            if n == to {
                return true;
            }
            if seen[n] {
                continue;
            }
            seen[n] = true;
            stack.extend(self.next[n].iter().copied());
        }
        false
    }
}

struct Builder<'a> {
    task: &'a SasTask,
    state: &'a State,
    trpg: TemporalRpg<'a>,
    graph: LandmarkGraph,
    index_of: HashMap<Vec<VarVal>, usize>,
}

impl<'a> Builder<'a> {
    fn derive(&mut self) {
        let goal = &self.task.goal_actions[0];
        let mut worklist: Vec<usize> = Vec::new();
        for c in goal.start_conditions().chain(goal.cond_end.iter()) {
            if self.holds_initially(c.var_val()) {
                continue;
            }
            if let Some(idx) = self.add_node(vec![c.var_val()], true) {
                worklist.push(idx);
            }
        }
        while let Some(node) = worklist.pop() {
            if !self.graph.nodes[node].is_single() {
                continue;
            }
            let vv = self.graph.nodes[node].fluents[0];
            let producers: Vec<usize> = self.task.producers[usize::from(vv.var())]
                [vv.val() as usize]
                .iter()
                .copied()
                .filter(|&a| self.trpg.action_time[a].is_some())
                .collect();
            if producers.is_empty() {
                continue;
            }
            // preconditions shared by every producer are necessary landmarks
            let common = self.common_preconditions(&producers);
            for p in common {
                if self.holds_initially(p) || !self.confirms(&[p]) {
                    continue;
                }
                if let Some(idx) = self.add_node(vec![p], false) {
                    worklist.push(idx);
                    self.graph.add_edge(idx, node);
                } else if let Some(&idx) = self.index_of.get(&vec![p]) {
                    self.graph.add_edge(idx, node);
                }
            }
            // disjunctive candidates: per-function precondition groups that
            // cover every producer
            for (_func, members) in self.function_groups(&producers) {
                if members.len() < 2 || members.iter().any(|m| self.holds_initially(*m)) {
                    continue;
                }
                if !self.confirms(&members) {
                    continue;
                }
                if let Some(idx) = self.add_node(members, false) {
                    self.graph.add_edge(idx, node);
                }
            }
        }
    }

    fn holds_initially(&self, vv: VarVal) -> bool {
        self.state.values[usize::from(vv.var())] == vv.val()
    }

    fn add_node(&mut self, mut fluents: Vec<VarVal>, is_goal: bool) -> Option<usize> {
        fluents.sort();
        if self.index_of.contains_key(&fluents) {
            return None;
        }
        let idx = self.graph.nodes.len();
        self.index_of.insert(fluents.clone(), idx);
        self.graph.nodes.push(LandmarkNode { fluents, is_goal });
        self.graph.next.push(Vec::new());
        self.graph.prev.push(Vec::new());
        Some(idx)
    }

    fn common_preconditions(&self, producers: &[usize]) -> Vec<VarVal> {
        let mut iter = producers.iter();
        let first = &self.task.actions[*iter.next().unwrap()];
        let mut common: Vec<VarVal> = first
            .cond_start
            .iter()
            .chain(first.cond_over_all.iter())
            .chain(first.cond_end.iter())
            .map(|c| c.var_val())
            .collect();
        for &a in iter {
            let conds: HashSet<VarVal> = self.task.actions[a]
                .cond_start
                .iter()
                .chain(self.task.actions[a].cond_over_all.iter())
                .chain(self.task.actions[a].cond_end.iter())
                .map(|c| c.var_val())
                .collect();
            common.retain(|vv| conds.contains(vv));
        }
        common.into_iter().unique().collect()
    }

    /// For every lifted function, the set of precondition fluents of that
    /// function across the producers, provided each producer contributes one.
    fn function_groups(&self, producers: &[usize]) -> Vec<(FunctionId, Vec<VarVal>)> {
        let func_of = |vv: VarVal| -> Option<FunctionId> {
            match &self.task.variables[usize::from(vv.var())].values[vv.val() as usize] {
                crate::sas::SasValue::Literal { fluent, .. } => {
                    Some(self.task.grounded.fluents[usize::from(*fluent)].func)
                }
                crate::sas::SasValue::NoneOfThose => None,
            }
        };
        let groups_of = |a: usize| -> HashMap<FunctionId, Vec<VarVal>> {
            let action = &self.task.actions[a];
            let mut m: HashMap<FunctionId, Vec<VarVal>> = HashMap::new();
            for c in action
                .cond_start
                .iter()
                .chain(action.cond_over_all.iter())
                .chain(action.cond_end.iter())
            {
                if let Some(f) = func_of(c.var_val()) {
                    let entry = m.entry(f).or_default();
                    if !entry.contains(&c.var_val()) {
                        entry.push(c.var_val());
                    }
                }
            }
            m
        };
        let mut per_func = groups_of(producers[0]);
        for &a in &producers[1..] {
            let contrib = groups_of(a);
            // a group survives only when every producer feeds it
            per_func.retain(|f, _| contrib.contains_key(f));
            for (f, members) in contrib {
                if let Some(entry) = per_func.get_mut(&f) {
                    for vv in members {
                        if !entry.contains(&vv) {
                            entry.push(vv);
                        }
                    }
                }
            }
        }
        per_func.into_iter().sorted_by_key(|(f, _)| *f).collect()
    }

    /// Re-runs relaxed reachability with the candidate fluents forbidden; a
    /// confirmed landmark makes the goal unreachable.
    fn confirms(&self, forbidden: &[VarVal]) -> bool {
        !goal_reachable_without(self.task, self.state, forbidden)
    }
}

/// Boolean relaxed reachability where the forbidden fluent values can never
/// be achieved. Numeric conditions are ignored (optimistic), which keeps
/// confirmed landmarks sound.
pub fn goal_reachable_without(task: &SasTask, state: &State, forbidden: &[VarVal]) -> bool {
    let mut reached: Vec<Vec<bool>> = task
        .variables
        .iter()
        .map(|v| vec![false; v.values.len()])
        .collect();
    let is_forbidden = |vv: VarVal| forbidden.contains(&vv);
    let mut frontier: Vec<VarVal> = Vec::new();
    let mut reach = |reached: &mut Vec<Vec<bool>>, frontier: &mut Vec<VarVal>, vv: VarVal| {
        if is_forbidden(vv) {
            return;
        }
        let slot = &mut reached[usize::from(vv.var())][vv.val() as usize];
        if !*slot {
            *slot = true;
            frontier.push(vv);
        }
    };
    for (var, &val) in state.values.iter().enumerate() {
        reach(
            &mut reached,
            &mut frontier,
            VarVal::new(crate::sas::SasVarId(var as u32), val),
        );
    }
    for til in &task.til_actions {
        for e in &til.eff_start {
            reach(&mut reached, &mut frontier, e.var_val());
        }
    }
    let mut missing: Vec<usize> = task
        .actions
        .iter()
        .map(|a| a.cond_start.len() + a.cond_over_all.len() + a.cond_end.len())
        .collect();
    let mut fired = vec![false; task.actions.len()];
    // actions without conditions fire immediately
    let mut ready: Vec<usize> = missing
        .iter()
        .enumerate()
        .filter(|&(_, &m)| m == 0)
        .map(|(i, _)| i)
        .collect();
    loop {
        for a in ready.drain(..) {
            if fired[a] {
                continue;
            }
            fired[a] = true;
            let action = &task.actions[a];
            for e in action.eff_start.iter().chain(action.eff_end.iter()).chain(
                action
                    .conditional
                    .iter()
                    .flat_map(|c| c.eff_start.iter().chain(c.eff_end.iter())),
            ) {
                reach(&mut reached, &mut frontier, e.var_val());
            }
        }
        let Some(vv) = frontier.pop() else { break };
        let mut newly_ready = Vec::new();
        for &a in &task.requirers[usize::from(vv.var())][vv.val() as usize] {
            missing[a] -= 1;
            if missing[a] == 0 {
                newly_ready.push(a);
            }
        }
        ready = newly_ready;
    }
    task.goal_actions.iter().any(|goal| {
        goal.start_conditions()
            .chain(goal.cond_end.iter())
            .all(|c| reached[usize::from(c.var)][c.val as usize])
    })
}

fn tarjan(next: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Ctx<'x> {
        next: &'x [Vec<usize>],
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        counter: usize,
        out: Vec<Vec<usize>>,
    }
    fn strongconnect(ctx: &mut Ctx, v: usize) {
        ctx.index[v] = Some(ctx.counter);
        ctx.low[v] = ctx.counter;
        ctx.counter += 1;
        ctx.stack.push(v);
        ctx.on_stack[v] = true;
        let succs = ctx.next[v].to_vec();
        for w in succs {
            if ctx.index[w].is_none() {
                strongconnect(ctx, w);
                ctx.low[v] = ctx.low[v].min(ctx.low[w]);
            } else if ctx.on_stack[w] {
                ctx.low[v] = ctx.low[v].min(ctx.index[w].unwrap());
            }
        }
        if ctx.low[v] == ctx.index[v].unwrap() {
            let mut comp = Vec::new();
            loop {
                let w = ctx.stack.pop().unwrap();
                ctx.on_stack[w] = false;
                comp.push(w);
                if w == v {
                    break;
                }
            }
            ctx.out.push(comp);
        }
    }
    let n = next.len();
    let mut ctx = Ctx {
        next,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        counter: 0,
        out: Vec::new(),
    };
    for v in 0..n {
        if ctx.index[v].is_none() {
            strongconnect(&mut ctx, v);
        }
    }
    ctx.out
}

/// Search-time landmark bookkeeping: nodes get checked the first time they
/// hold in a state of the frontier walk; the residual count of unchecked
/// informative nodes is the `hLand` score.
#[derive(Default, Clone)]
pub struct LandmarkStatus {
    checked: Vec<bool>,
    open: Vec<usize>,
}

impl LandmarkStatus {
    pub fn reset(&mut self, graph: &LandmarkGraph) {
        self.checked.clear();
        self.checked.resize(graph.nodes.len(), false);
        self.open.clear();
        for (i, preds) in graph.prev.iter().enumerate() {
            if preds.is_empty() {
                self.open.push(i);
            }
        }
    }

    /// Progresses through one state of the frontier walk.
    pub fn advance(&mut self, graph: &LandmarkGraph, state: &State) {
        let mut j = 0;
        while j < self.open.len() {
            let node = self.open[j];
            if graph.nodes[node].holds(state) {
                self.checked[node] = true;
                self.open.swap_remove(j);
                for &succ in &graph.next[node] {
                    if !self.checked[succ] && !self.open.contains(&succ) {
                        self.open.push(succ);
                    }
                }
                // restart the scan, a successor may hold in the same state
                j = 0;
            } else {
                j += 1;
            }
        }
    }

    pub fn unchecked_informative(&self, graph: &LandmarkGraph) -> u32 {
        graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| n.is_single() && !n.is_goal && !self.checked[*i])
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grounding::statics::remove_static_variables;
    use crate::grounding::tests::build;
    use crate::sas::translator::{translate, TranslateOptions};

    fn task(domain: &str, problem: &str) -> SasTask {
        let mut g = build(domain, problem);
        remove_static_variables(&mut g);
        translate(g, &TranslateOptions::default()).unwrap()
    }

    const SIMPLE: &str = "(define (domain d)
      (:predicates (a) (b) (c))
      (:action make-b :parameters () :precondition (a) :effect (b))
      (:action make-c :parameters () :precondition (b) :effect (c)))";

    #[test]
    fn chain_produces_ordered_landmarks() {
        let t = task(
            SIMPLE,
            "(define (problem p) (:domain d) (:init (a)) (:goal (c)))",
        );
        let state = State::initial(&t);
        let graph = LandmarkGraph::build(&state, &t, 0.001);
        // (b) is a necessary landmark before the goal (c)
        let names: Vec<String> = graph
            .nodes
            .iter()
            .map(|n| t.value_name(n.fluents[0]))
            .collect();
        assert!(names.contains(&"(c)".to_string()), "{names:?}");
        assert!(names.contains(&"(b)".to_string()), "{names:?}");
        let b = names.iter().position(|n| n == "(b)").unwrap();
        let c = names.iter().position(|n| n == "(c)").unwrap();
        assert!(graph.next[b].contains(&c));
        assert_eq!(graph.informative_count(), 1);
    }

    #[test]
    fn status_progression_counts_down() {
        let t = task(
            SIMPLE,
            "(define (problem p) (:domain d) (:init (a)) (:goal (c)))",
        );
        let state = State::initial(&t);
        let graph = LandmarkGraph::build(&state, &t, 0.001);
        let mut status = LandmarkStatus::default();
        status.reset(&graph);
        status.advance(&graph, &state);
        assert_eq!(status.unchecked_informative(&graph), 1);

        // after achieving (b) the informative count drops to zero
        let mut s2 = state.clone();
        let b_var = t.variables.iter().position(|v| v.name == "(b)").unwrap();
        s2.values[b_var] = 0;
        status.advance(&graph, &s2);
        assert_eq!(status.unchecked_informative(&graph), 0);
    }

    #[test]
    fn landmark_count_bounds_plan_length() {
        let t = task(
            SIMPLE,
            "(define (problem p) (:domain d) (:init (a)) (:goal (c)))",
        );
        let state = State::initial(&t);
        let graph = LandmarkGraph::build(&state, &t, 0.001);
        let mut status = LandmarkStatus::default();
        status.reset(&graph);
        status.advance(&graph, &state);
        // any plan needs at least make-b and make-c: two actions, one
        // unchecked informative landmark
        assert!(status.unchecked_informative(&graph) <= 2);
    }
}
