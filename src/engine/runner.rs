mod diagnostics;
#[cfg(feature = "server")]
pub mod http;
#[cfg(feature = "live")]
pub mod watch;

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::sync::mpsc::{TryRecvError, channel};
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use rayon::Yield;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::cache::ChangeCache;
use crate::core::Environment;
use crate::engine::{TaskContext, TaskGraph};
use crate::error::PipelineError;

pub use diagnostics::Diagnostics;

static STYLE_ROOT: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("=>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("  {spinner:.blue} {msg}")
        .expect("Error setting progress bar template")
});

#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
}

/// Runs the named task after every task it transitively waits for.
pub fn run(
    graph: &TaskGraph,
    target: &str,
    env: &Environment,
    cache: &ChangeCache,
) -> Result<Diagnostics, PipelineError> {
    let nodes = graph.closure(target)?;
    run_nodes(graph, env, cache, &nodes)
}

/// Executes a set of nodes on the rayon thread pool, each exactly once.
///
/// The scheduler counts, for every node, how many of its predecessors are
/// part of the run. Nodes whose count is zero are spawned right away; when a
/// node completes, the counts of its dependents are decremented and every
/// dependent reaching zero is spawned. A node therefore never starts before
/// all of its predecessors within the run have finished, while independent
/// nodes run concurrently.
///
/// After the first failure no new nodes are started. Nodes already running
/// are waited for, then the first error is returned.
pub fn run_nodes(
    graph: &TaskGraph,
    env: &Environment,
    cache: &ChangeCache,
    nodes_to_run: &HashSet<NodeIndex>,
) -> Result<Diagnostics, PipelineError> {
    let graph_ref = &graph.graph;

    let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for edge in graph_ref.raw_edges() {
        dependents
            .entry(edge.source())
            .or_default()
            .push(edge.target());
    }

    // A dependency only counts if it's also in the set of nodes to run.
    let mut dependency_counts: HashMap<NodeIndex, usize> = nodes_to_run
        .iter()
        .map(|&i| {
            (
                i,
                graph_ref
                    .neighbors_directed(i, petgraph::Direction::Incoming)
                    .filter(|dep| nodes_to_run.contains(dep))
                    .count(),
            )
        })
        .collect();

    let total_tasks = nodes_to_run.len() as u64;
    if total_tasks == 0 {
        return Ok(Diagnostics::default());
    }

    let root_span = tracing::span!(Level::INFO, "running_tasks");
    root_span.pb_set_length(total_tasks);
    root_span.pb_set_style(&STYLE_ROOT);
    root_span.pb_set_message("Running tasks...");
    let _enter = root_span.enter();

    let mut execution_times = HashMap::new();
    let mut first_error = None;

    rayon::scope(|s| {
        // (index, result, start, duration)
        let (result_sender, result_receiver) =
            channel::<(NodeIndex, anyhow::Result<()>, Instant, Duration)>();

        let spawn_task = |index: NodeIndex| {
            let node = graph_ref[index].clone();
            let sender = result_sender.clone();

            let Some(work) = node.work else {
                // groups complete as soon as their predecessors do
                let _ = sender.send((index, Ok(()), Instant::now(), Duration::ZERO));
                return;
            };

            s.spawn(move |_| {
                let span = tracing::span!(Level::INFO, "task", name = %node.name);
                span.pb_set_style(&STYLE_TASK);
                span.pb_set_message(&format!("Running {}", node.name));
                let _enter = span.enter();

                let context = TaskContext { env, cache };

                let start_time = Instant::now();

                // Tasks only share the cache, which is behind a mutex, so a
                // panicking task cannot leave shared state half-updated.
                let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    work.execute(&context)
                })) {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            format!("Task panicked: {s}")
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            format!("Task panicked: {s}")
                        } else {
                            String::from("Task panicked with unknown payload")
                        };

                        Err(anyhow::anyhow!(msg))
                    }
                };

                let elapsed = start_time.elapsed();
                let _ = sender.send((index, output, start_time, elapsed));
            });
        };

        let mut in_flight = 0usize;

        // Seed initial tasks
        for &node_index in nodes_to_run {
            if dependency_counts.get(&node_index).copied().unwrap_or(0) == 0 {
                in_flight += 1;
                spawn_task(node_index);
            }
        }

        // The scope body occupies a pool thread, so it helps with pending
        // work while waiting; with a single worker it would block otherwise.
        let next = || loop {
            match result_receiver.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {
                    if let None | Some(Yield::Idle) = rayon::yield_now() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        };

        while in_flight > 0 {
            let Some((completed, output, start, duration)) = next() else {
                break;
            };
            in_flight -= 1;
            root_span.pb_inc(1);

            let name = &graph_ref[completed].name;
            execution_times.insert(completed, TaskExecution { start, duration });

            if let Err(err) = output {
                tracing::error!(task = %name, "failed after {duration:.2?}");
                first_error.get_or_insert(PipelineError::Task(name.to_string(), err));
                continue;
            }

            if !graph_ref[completed].is_group() {
                tracing::debug!(task = %name, "finished in {duration:.2?}");
            }

            if first_error.is_some() {
                continue;
            }

            if let Some(waiting) = dependents.get(&completed) {
                for &index in waiting {
                    if let Some(count) = dependency_counts.get_mut(&index) {
                        *count -= 1;
                        if *count == 0 {
                            in_flight += 1;
                            spawn_task(index);
                        }
                    }
                }
            }
        }
    });

    match first_error {
        Some(err) => Err(err),
        None => Ok(Diagnostics { execution_times }),
    }
}
