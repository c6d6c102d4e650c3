//! Command line entry point: parses the domain and problem, runs the
//! preprocessing, grounding and SAS translation stages, then searches.
//! Diagnostic lines go to stdout prefixed with `;`, solution plans follow
//! the conventional temporal plan format.

use anyhow::{ensure, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempo_planners::search::solve;
use tempo_planning::grounding::statics::remove_static_variables;
use tempo_planning::grounding::{ground, printer};
use tempo_planning::model::Task;
use tempo_planning::parsing::{parse_domain, parse_problem, Input};
use tempo_planning::preprocessing::normalize;
use tempo_planning::sas::translator::{translate, write_mutex_file, TranslateOptions};
use tempo_planning::Config;

/// Temporal-numeric planner for PDDL 2.1+ tasks.
#[derive(Debug, Parser)]
#[command(name = "tempo", rename_all = "kebab-case")]
struct Opt {
    domain: PathBuf,
    problem: PathBuf,
    /// Write the grounded task back out as GroundedDomain.pddl and
    /// GroundedProblem.pddl.
    #[arg(long)]
    ground: bool,
    /// Keep provably static fluents in the grounded task.
    #[arg(long = "static")]
    keep_static: bool,
    /// Skip the SAS grouping: every fluent keeps its own variable.
    #[arg(long)]
    nsas: bool,
    /// Write the permanent mutex pairs to mutex.txt.
    #[arg(long)]
    mutex: bool,
    /// Wall-clock budget for the search, in seconds.
    #[arg(long, default_value_t = 600.0)]
    timeout: f64,
    /// Heuristic bound below which plans are validator-checked before
    /// expansion.
    #[arg(long, default_value_t = 1)]
    check_threshold: u32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let opt = Opt::parse();
    ensure!(
        opt.domain.exists(),
        "Domain file {} does not exist",
        opt.domain.display()
    );
    ensure!(
        opt.problem.exists(),
        "Problem file {} does not exist",
        opt.problem.display()
    );

    let config = Config {
        check_h_threshold: opt.check_threshold,
        timeout: opt.timeout,
        ..Config::default()
    };

    let t = Instant::now();
    let mut task = Task::new();
    let raw = parse_domain(&mut task, Input::from_file(&opt.domain)?)
        .with_context(|| format!("in {}", opt.domain.display()))?;
    parse_problem(&mut task, Input::from_file(&opt.problem)?)
        .with_context(|| format!("in {}", opt.problem.display()))?;
    println!(";Parsing time: {:.3}", t.elapsed().as_secs_f64());

    let t = Instant::now();
    normalize(&mut task, raw)?;
    println!(";Preprocessing time: {:.3}", t.elapsed().as_secs_f64());

    let t = Instant::now();
    let mut grounded = ground(task)?;
    if !opt.keep_static {
        remove_static_variables(&mut grounded);
    }
    println!(";Grounding time: {:.3}", t.elapsed().as_secs_f64());
    if opt.ground {
        println!(";{} grounded actions", grounded.actions.len());
        printer::write_pddl_domain(&grounded, Path::new("."))?;
        printer::write_pddl_problem(&grounded, Path::new("."))?;
    }

    let t = Instant::now();
    let sas = translate(grounded, &TranslateOptions { no_sas: opt.nsas })?;
    println!(";SAS translation time: {:.3}", t.elapsed().as_secs_f64());
    if opt.mutex {
        write_mutex_file(&sas, Path::new("."))?;
    }

    match solve(&sas, config) {
        Some(best) => {
            println!(";Makespan: {:.3}", best.makespan);
        }
        None => {
            println!(";No plan found");
        }
    }
    Ok(())
}
