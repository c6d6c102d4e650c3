//! Temporal-numeric planning: task models and the pipeline stages shared by
//! the planners.
//!
//! The pipeline reads PDDL into a lifted [`model::Task`], lowers it to the
//! grounder's normal form ([`preprocessing`]), instantiates every reachable
//! ground action ([`grounding`]), infers multi-valued state variables
//! ([`sas`]) and serves heuristic estimates over the result
//! ([`heuristics`]). Partial plans ([`plan`]) and interval reasoning
//! ([`intervals`]) support the partial-order search built on top.

pub mod grounding;
pub mod heuristics;
pub mod intervals;
pub mod model;
pub mod parsing;
pub mod plan;
pub mod preprocessing;
pub mod sas;
pub mod state;

/// Immutable configuration, built once at startup and passed by reference
/// through constructors.
#[derive(Copy, Clone, Debug)]
pub struct Config {
    /// Minimal separation between causally ordered time points.
    pub epsilon: f64,
    /// Plans with `h` at or below this bound get validator-checked before
    /// expansion.
    pub check_h_threshold: u32,
    /// Wall-clock budget for the whole search, in seconds.
    pub timeout: f64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            epsilon: 0.001,
            check_h_threshold: 1,
            timeout: 600.0,
        }
    }
}
