use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::config::PathTable;
use crate::core::Environment;
use crate::engine::{Task, TaskContext};
use crate::error::{ConfigError, StyleError, TaskError};
use crate::io;
use crate::styles::{self, Usage};
use crate::tasks::MIN_CSS;

/// Compiles the style entry point, failing early when it doesn't exist.
fn compile_entry(env: &Environment, paths: &PathTable) -> Result<String, TaskError> {
    let entry = env.path(&paths.style);
    if !entry.is_file() {
        return Err(TaskError::MissingSource(entry));
    }

    Ok(styles::compile(&entry, &env.root)?)
}

/// Compiles the stylesheet into `<build>/css/`.
pub struct CssTask {
    paths: Arc<PathTable>,
}

impl CssTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for CssTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let css = compile_entry(env, &self.paths)?;

        let output = env
            .path(&self.paths.build)
            .join("css")
            .join(self.paths.style_output_name());
        io::write(&output, css)?;

        tracing::info!("compiled {}", self.paths.style);
        Ok(())
    }

    fn watched(&self) -> Vec<String> {
        self.paths.styles_watch.clone()
    }
}

/// Compiles the stylesheet and removes every rule not used by the reference
/// pages, writing the result to `<dist>/css/`.
pub struct UncssTask {
    paths: Arc<PathTable>,
}

impl UncssTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for UncssTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;

        // with no reference page every rule would be pruned
        if self.paths.prune_against.is_empty() {
            return Err(ConfigError::Empty("prune_against").into());
        }

        // reference pages are checked first so a missing one is reported as
        // such even when the stylesheet itself is broken
        let mut usage = Usage::new();
        for page in &self.paths.prune_against {
            let path = env.path(page);
            let html = io::read_prerequisite(&path, "html")?;
            usage
                .add_html(&html)
                .map_err(|message| TaskError::from(StyleError::Css(path.clone(), message)))?;
        }

        let css = compile_entry(env, &self.paths)?;

        let name = self.paths.style_output_name();
        let pruned = styles::prune(&css, &usage, &Utf8PathBuf::from(&name)).map_err(TaskError::from)?;

        let output = env.path(&self.paths.dist).join("css").join(&name);
        io::write(&output, pruned)?;

        tracing::info!(
            "pruned {} against {} page(s)",
            self.paths.style,
            self.paths.prune_against.len()
        );
        Ok(())
    }
}

/// Minifies the pruned stylesheet together with the extra stylesheets into a
/// single file.
pub struct MinifyCssTask {
    paths: Arc<PathTable>,
}

impl MinifyCssTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for MinifyCssTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let dir = env.path(&self.paths.dist).join("css");

        let pruned = dir.join(self.paths.style_output_name());
        let mut parts = vec![(pruned.clone(), io::read_prerequisite(&pruned, "uncss")?)];

        for file in io::find(&env.root, &self.paths.style_extra)? {
            let css = io::read_to_string(&file.path)?;
            parts.push((file.path, css));
        }

        let mut minified = Vec::with_capacity(parts.len());
        for (path, css) in &parts {
            minified.push(styles::minify(css, path).map_err(TaskError::from)?);
        }

        io::write(&dir.join(MIN_CSS), minified.join("\n"))?;

        tracing::info!("minified {} stylesheet(s) into {MIN_CSS}", parts.len());
        Ok(())
    }
}
