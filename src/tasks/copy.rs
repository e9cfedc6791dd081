use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::{Task, TaskContext};
use crate::io;

/// Copies files verbatim, keeping their path below the static part of the
/// glob that matched them.
pub struct CopyTask {
    patterns: Vec<String>,
    dest: Utf8PathBuf,
    watch: bool,
}

impl CopyTask {
    pub fn new(patterns: &[String], dest: impl AsRef<Utf8Path>) -> Self {
        Self {
            patterns: patterns.to_vec(),
            dest: dest.as_ref().to_path_buf(),
            watch: false,
        }
    }

    /// Re-runs the copy in watch mode whenever one of the sources changes.
    pub fn watching(mut self) -> Self {
        self.watch = true;
        self
    }
}

impl Task for CopyTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let dest = ctx.env.path(&self.dest);
        let count = io::copy(&ctx.env.root, &self.patterns, &dest)?;

        tracing::info!("copied {count} file(s) to {}", self.dest);
        Ok(())
    }

    fn watched(&self) -> Vec<String> {
        match self.watch {
            true => self.patterns.clone(),
            false => vec![],
        }
    }
}
