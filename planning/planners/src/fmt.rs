//! Plan formatting: the conventional temporal plan format, one line per
//! action, `<start>: (<name> <args...>) [<duration>]`.

use itertools::Itertools;
use tempo_planning::plan::{ActionRef, PlanComponents, PlanSpace};
use tempo_planning::sas::SasTask;

/// Renders a float without trailing zeros (but keeping one decimal).
fn num(v: f64) -> String {
    let s = format!("{v:.3}");
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    if trimmed.contains('.') {
        trimmed.to_string()
    } else {
        format!("{trimmed}.0")
    }
}

/// The solution plan in execution order. TIL, initial and goal pseudo-steps
/// are not part of the output.
pub fn format_plan(task: &SasTask, space: &PlanSpace, components: &PlanComponents) -> String {
    let mut lines: Vec<(f64, String)> = Vec::new();
    for (i, &id) in components.steps.iter().enumerate() {
        let plan = &space[id];
        let ActionRef::Op(op) = plan.action else {
            continue;
        };
        let start = components.start_times[i];
        let duration = components.end_times[i] - start;
        lines.push((
            start,
            format!("{}: {} [{}]", num(start), task.actions[op].name, num(duration)),
        ));
    }
    lines.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    lines.iter().map(|(_, l)| l).join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_drop_noise_digits() {
        assert_eq!(num(3.0), "3.0");
        assert_eq!(num(0.001), "0.001");
        assert_eq!(num(2.5), "2.5");
        assert_eq!(num(4.001), "4.001");
    }
}
