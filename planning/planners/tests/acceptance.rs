//! End-to-end scenarios: full pipeline from PDDL text to a solution plan.

use tempo_planners::search::{solve, Solved};
use tempo_planning::grounding::statics::remove_static_variables;
use tempo_planning::grounding::ground;
use tempo_planning::model::Task;
use tempo_planning::parsing::{parse_domain, parse_problem, Input};
use tempo_planning::preprocessing::normalize;
use tempo_planning::sas::translator::{translate, TranslateOptions};
use tempo_planning::sas::SasTask;
use tempo_planning::Config;

fn pipeline(domain: &str, problem: &str) -> SasTask {
    let mut task = Task::new();
    let raw = parse_domain(&mut task, Input::from_string(domain)).expect("domain");
    parse_problem(&mut task, Input::from_string(problem)).expect("problem");
    normalize(&mut task, raw).expect("normal form");
    let mut grounded = ground(task).expect("grounding");
    remove_static_variables(&mut grounded);
    translate(grounded, &TranslateOptions::default()).expect("translation")
}

fn run(domain: &str, problem: &str) -> Option<Solved> {
    let task = pipeline(domain, problem);
    let config = Config {
        timeout: 30.0,
        ..Config::default()
    };
    solve(&task, config)
}

fn plan_lines(s: &Solved) -> Vec<&str> {
    s.plan_text.lines().filter(|l| !l.is_empty()).collect()
}

#[test]
fn briefcase_transfer() {
    let domain = "(define (domain briefcase)
      (:requirements :strips :typing)
      (:types portable location)
      (:predicates (at-bc ?l - location) (at ?p - portable ?l - location)
                   (in ?p - portable))
      (:action move :parameters (?from ?to - location)
        :precondition (at-bc ?from)
        :effect (and (not (at-bc ?from)) (at-bc ?to)))
      (:action put-in :parameters (?p - portable ?l - location)
        :precondition (and (at ?p ?l) (at-bc ?l))
        :effect (and (not (at ?p ?l)) (in ?p)))
      (:action take-out :parameters (?p - portable ?l - location)
        :precondition (and (in ?p) (at-bc ?l))
        :effect (and (not (in ?p)) (at ?p ?l))))";
    let problem = "(define (problem bc) (:domain briefcase)
      (:objects dict - portable home office - location)
      (:init (at-bc home) (at dict home))
      (:goal (and (at-bc office) (at dict office))))";
    let solved = run(domain, problem).expect("a plan exists");
    let lines = plan_lines(&solved);
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines.iter().any(|l| l.contains("(put-in dict home)")));
    assert!(lines.iter().any(|l| l.contains("(move home office)")));
    assert!(lines.iter().any(|l| l.contains("(take-out dict office)")));
    // instantaneous actions: the whole plan fits in a few epsilons
    assert!(solved.makespan < 0.1, "makespan {}", solved.makespan);
}

#[test]
fn matchcellar_fuses_overlap_one_match() {
    let domain = "(define (domain matchcellar)
      (:requirements :typing :durative-actions)
      (:types match fuse)
      (:predicates (unused ?m - match) (light) (mended ?f - fuse))
      (:durative-action light-match
        :parameters (?m - match)
        :duration (= ?duration 5)
        :condition (at start (unused ?m))
        :effect (and (at start (not (unused ?m)))
                     (at start (light))
                     (at end (not (light)))))
      (:durative-action mend-fuse
        :parameters (?f - fuse)
        :duration (= ?duration 2)
        :condition (over all (light))
        :effect (at end (mended ?f))))";
    let problem = "(define (problem mc) (:domain matchcellar)
      (:objects m1 - match f1 f2 - fuse)
      (:init (unused m1))
      (:goal (and (mended f1) (mended f2))))";
    let solved = run(domain, problem).expect("a plan exists");
    let lines = plan_lines(&solved);
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines.iter().any(|l| l.contains("(light-match m1)")));
    assert!(lines.iter().any(|l| l.contains("(mend-fuse f1)")));
    assert!(lines.iter().any(|l| l.contains("(mend-fuse f2)")));
    // both mends fit inside the single match interval
    assert!(
        (solved.makespan - 5.0).abs() < 0.1,
        "makespan {}",
        solved.makespan
    );
}

#[test]
fn driverlog_numeric_consumes_fuel() {
    let domain = "(define (domain driverlog)
      (:requirements :typing :durative-actions :numeric-fluents)
      (:types truck location)
      (:predicates (at ?t - truck ?l - location) (link ?a ?b - location))
      (:functions (fuel ?t - truck) (distance ?a ?b - location) (speed ?t - truck))
      (:durative-action drive
        :parameters (?t - truck ?from ?to - location)
        :duration (= ?duration (/ (distance ?from ?to) (speed ?t)))
        :condition (and (at start (at ?t ?from)) (over all (link ?from ?to))
                        (at start (>= (fuel ?t) (/ (distance ?from ?to) (speed ?t)))))
        :effect (and (at start (not (at ?t ?from)))
                     (at end (at ?t ?to))
                     (at end (decrease (fuel ?t)
                                       (/ (distance ?from ?to) (speed ?t)))))))";
    let problem = "(define (problem dl) (:domain driverlog)
      (:objects tr - truck a b c - location)
      (:init (at tr a) (link a b) (link b c)
             (= (fuel tr) 10) (= (distance a b) 4) (= (distance b c) 5)
             (= (speed tr) 1))
      (:goal (at tr c)))";
    let solved = run(domain, problem).expect("a plan exists");
    let lines = plan_lines(&solved);
    assert_eq!(lines.len(), 2, "{lines:?}");
    assert!(lines.iter().any(|l| l.contains("(drive tr a b)")));
    assert!(lines.iter().any(|l| l.contains("(drive tr b c)")));
    // 4 + 5 time units of driving
    assert!(
        (solved.makespan - 9.0).abs() < 0.1,
        "makespan {}",
        solved.makespan
    );
}

#[test]
fn timed_initial_literal_gates_the_action() {
    let domain = "(define (domain til)
      (:requirements :durative-actions :timed-initial-literals)
      (:predicates (switch-on) (done))
      (:durative-action act
        :parameters ()
        :duration (= ?duration 1)
        :condition (over all (switch-on))
        :effect (at end (done))))";
    let problem = "(define (problem t) (:domain til)
      (:init (at 3.0 (switch-on)))
      (:goal (done)))";
    let solved = run(domain, problem).expect("a plan exists");
    let lines = plan_lines(&solved);
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].starts_with("3"), "{}", lines[0]);
    assert!(
        (solved.makespan - 4.0).abs() < 0.1,
        "makespan {}",
        solved.makespan
    );
}

#[test]
fn unreachable_goal_reports_no_plan() {
    let domain = "(define (domain unreach)
      (:types loc thing)
      (:predicates (at ?x - thing ?l - loc))
      (:action noop :parameters (?x - thing ?l - loc)
        :precondition (at ?x ?l)
        :effect (at ?x ?l)))";
    let problem = "(define (problem u) (:domain unreach)
      (:objects x - thing y z - loc)
      (:init (at x y))
      (:goal (at x z)))";
    assert!(run(domain, problem).is_none());
}

#[test]
fn preference_metric_prefers_the_clean_plan() {
    let domain = "(define (domain prefs)
      (:requirements :strips :preferences)
      (:predicates (ready) (reach) (clean))
      (:action quick :parameters ()
        :precondition (ready)
        :effect (reach))
      (:action prepare :parameters ()
        :precondition (ready)
        :effect (clean))
      (:action thorough :parameters ()
        :precondition (clean)
        :effect (reach)))";
    let problem = "(define (problem p) (:domain prefs)
      (:objects)
      (:init (ready))
      (:goal (and (reach) (preference p (clean))))
      (:metric minimize (is-violated p)))";
    let solved = run(domain, problem).expect("a plan exists");
    // the satisfying plan needs two actions but wins on the metric
    assert!(
        solved.plan_text.contains("(thorough)") || solved.plan_text.contains("(prepare)"),
        "{}",
        solved.plan_text
    );
    assert!(solved.plan_text.contains("(prepare)"), "{}", solved.plan_text);
}
