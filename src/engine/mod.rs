//! The task graph.
//!
//! Tasks are declared by name on a [`Blueprint`] together with the names of
//! the tasks that must complete before them. [`Blueprint::finish`] resolves
//! the names into a [`TaskGraph`], rejecting unknown names, duplicates and
//! cycles, so a misconfigured pipeline fails at startup rather than halfway
//! through a build.

pub(crate) mod runner;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::cache::ChangeCache;
use crate::core::Environment;
use crate::error::PipelineError;

pub use runner::{Diagnostics, TaskExecution, run, run_nodes};

#[cfg(feature = "live")]
pub use runner::watch;

#[cfg(feature = "server")]
pub use runner::http;

/// Everything a task can see while it runs.
pub struct TaskContext<'a> {
    /// Run-wide settings.
    pub env: &'a Environment,
    /// Fingerprints of the previous template run.
    pub cache: &'a ChangeCache,
}

/// A unit of work in the pipeline.
pub trait Task: Send + Sync {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()>;

    /// Globs whose changes should re-run this task in watch mode.
    fn watched(&self) -> Vec<String> {
        vec![]
    }
}

/// A node of the graph, either a task or a pure group of predecessors.
#[derive(Clone)]
pub struct TaskNode {
    pub name: Cow<'static, str>,
    pub work: Option<Arc<dyn Task>>,
}

impl TaskNode {
    pub fn is_group(&self) -> bool {
        self.work.is_none()
    }
}

struct Declaration {
    name: Cow<'static, str>,
    after: Vec<Cow<'static, str>>,
    work: Option<Arc<dyn Task>>,
}

/// Collects task declarations. Predecessors may be named before they are
/// declared.
#[derive(Default)]
pub struct Blueprint {
    declarations: Vec<Declaration>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry point for declaring a task.
    pub fn task(&mut self, name: impl Into<Cow<'static, str>>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            after: Vec::new(),
        }
    }

    pub fn finish(self) -> Result<TaskGraph, PipelineError> {
        let mut graph = Graph::new();
        let mut names = HashMap::new();

        for decl in &self.declarations {
            let index = graph.add_node(TaskNode {
                name: decl.name.clone(),
                work: decl.work.clone(),
            });
            if names.insert(decl.name.to_string(), index).is_some() {
                return Err(PipelineError::DuplicateTask(decl.name.to_string()));
            }
        }

        for decl in &self.declarations {
            let target = names[&*decl.name];
            for dependency in &decl.after {
                let source = *names.get(&**dependency).ok_or_else(|| {
                    PipelineError::UnknownDependency {
                        task: decl.name.to_string(),
                        dependency: dependency.to_string(),
                    }
                })?;
                graph.add_edge(source, target, ());
            }
        }

        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| PipelineError::Cycle(graph[cycle.node_id()].name.to_string()))?;

        Ok(TaskGraph { graph, names })
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: Cow<'static, str>,
    after: Vec<Cow<'static, str>>,
}

impl TaskDef<'_> {
    /// Declares tasks that must complete before this one starts.
    pub fn after<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Cow<'static, str>>,
    {
        self.after.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn run(self, task: impl Task + 'static) {
        self.declare(Some(Arc::new(task)));
    }

    /// Declares a node without work of its own, used to name a set of tasks.
    pub fn group(self) {
        self.declare(None);
    }

    fn declare(self, work: Option<Arc<dyn Task>>) {
        self.blueprint.declarations.push(Declaration {
            name: self.name,
            after: self.after,
            work,
        });
    }
}

/// A validated, acyclic graph of tasks. Edges point from a predecessor to the
/// task waiting for it.
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskNode, ()>,
    names: HashMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn index(&self, name: &str) -> Result<NodeIndex, PipelineError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownTask(name.to_string()))
    }

    pub fn node(&self, index: NodeIndex) -> &TaskNode {
        &self.graph[index]
    }

    /// Names of every declared task, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|i| self.graph[i].name.as_ref())
    }

    /// The named task and every task it transitively waits for.
    pub fn closure(&self, name: &str) -> Result<HashSet<NodeIndex>, PipelineError> {
        let start = self.index(name)?;

        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(index) = stack.pop() {
            for dep in self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
            {
                if seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }

        Ok(seen)
    }
}
