use std::collections::HashMap;
use std::fmt::Write;

use petgraph::graph::NodeIndex;

use crate::engine::{TaskExecution, TaskGraph};

/// Execution metrics of a single run.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// A map of task node indices to their execution metrics.
    pub execution_times: HashMap<NodeIndex, TaskExecution>,
}

impl Diagnostics {
    /// Names of the tasks that ran, in the order they started.
    pub fn executed<'a>(&self, graph: &'a TaskGraph) -> Vec<&'a str> {
        let mut runs: Vec<_> = self.execution_times.iter().collect();
        runs.sort_by_key(|(_, exec)| exec.start);

        runs.into_iter()
            .map(|(index, _)| graph.node(*index).name.as_ref())
            .collect()
    }

    /// A plain-text table of task durations, slowest first. Groups are
    /// omitted.
    pub fn render_table(&self, graph: &TaskGraph) -> String {
        let mut runs: Vec<_> = self
            .execution_times
            .iter()
            .filter(|(index, _)| !graph.node(**index).is_group())
            .collect();
        runs.sort_by(|a, b| b.1.duration.cmp(&a.1.duration));

        let width = runs
            .iter()
            .map(|(index, _)| graph.node(**index).name.len())
            .max()
            .unwrap_or(0);

        let mut f = String::new();
        for (index, exec) in runs {
            let _ = writeln!(
                f,
                "{:width$}  {:>10.2?}",
                graph.node(*index).name,
                exec.duration
            );
        }
        f
    }
}
