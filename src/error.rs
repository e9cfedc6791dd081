#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors raised while constructing or executing the task graph.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },

    #[error("Task '{0}' is declared more than once")]
    DuplicateTask(String),

    #[error("Cycle detected in task graph at '{0}'")]
    Cycle(String),

    #[error("Task '{0}':\n{1}")]
    Task(String, anyhow::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),
}

impl PipelineError {
    /// Returns the task error wrapped by a failed task, if any.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            PipelineError::Task(_, err) => err.downcast_ref::<TaskError>(),
            _ => None,
        }
    }
}

/// Errors raised by individual tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Missing prerequisite '{path}', it is produced by task '{task}'")]
    MissingPrerequisite { path: Utf8PathBuf, task: &'static str },

    #[error("Source file '{0}' not found")]
    MissingSource(Utf8PathBuf),

    #[error("Couldn't read '{path}'.\n{source}")]
    Read {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't write '{path}'.\n{source}")]
    Write {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Style(#[from] StyleError),

    #[error("{failed} of {total} files failed, first error:\n{first}")]
    Files {
        failed: usize,
        total: usize,
        first: Box<TaskError>,
    },

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Couldn't optimize image '{path}'.\n{source}")]
    Image {
        path: Utf8PathBuf,
        source: image::ImageError,
    },
}

/// A template failed to compile.
#[derive(Debug, Error)]
#[error("{path}{}: {message}", .line.map(|l| format!(":{l}")).unwrap_or_default())]
pub struct TemplateError {
    pub path: Utf8PathBuf,
    pub line: Option<usize>,
    pub message: String,
}

/// A stylesheet failed to compile, parse or print.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("{0}: Sass compilation error: {1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    #[error("{0}: CSS error: {1}")]
    Css(Utf8PathBuf, String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Invalid config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),

    #[error("'{0}' must list at least one file")]
    Empty(&'static str),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Couldn't run `git {command}`.\n{source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("`git {command}` failed ({status}):\n{stderr}")]
    Git {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Nothing to deploy, '{0}' is empty")]
    Empty(Utf8PathBuf),
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
}
