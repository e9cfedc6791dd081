use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;

use crate::cache::ChangeCache;
use crate::config::PathTable;
use crate::core::Hash32;
use crate::engine::{Task, TaskContext};
use crate::error::TaskError;
use crate::io::{self, Matched};
use crate::template::{DependencyMap, Renderer, inject_script};

/// Compiles the entry templates into the build directory.
pub struct HtmlTask {
    paths: Arc<PathTable>,
}

impl HtmlTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for HtmlTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let entries = entries(&env.root, &self.paths.templates)?;
        let template_root = env.path(&self.paths.template_root);
        let build = env.path(&self.paths.build);

        let selected: Vec<&Matched> = if env.is_watching() {
            let (scan, deps) = scan(&env.root, &template_root, &entries, &self.paths.templates_watch)?;
            let changed = ctx.cache.changed(&scan);

            let selected = entries
                .iter()
                .filter(|entry| {
                    deps.is_affected(&entry.path, &changed)
                        || ctx.cache.has_failed(&entry.path)
                        || !output_path(&build, entry).exists()
                })
                .collect();

            ctx.cache.commit(scan);
            selected
        } else {
            entries.iter().collect()
        };

        if selected.is_empty() {
            tracing::debug!("templates are up to date");
            return Ok(());
        }

        let renderer = Renderer::new(template_root, env.mode.as_str());
        let script = env.get_refresh_script();

        let results: Vec<_> = selected
            .par_iter()
            .map(|entry| {
                let result = renderer
                    .render(&entry.path)
                    .map_err(TaskError::from)
                    .map(|html| match &script {
                        Some(script) => inject_script(&html, script),
                        None => html,
                    })
                    .and_then(|html| io::write(&output_path(&build, entry), html));
                (*entry, result)
            })
            .collect();

        let total = results.len();
        let errors = record(ctx.cache, results);

        tracing::info!("compiled {} of {} templates", total - errors.len(), total);
        fail_if_any(errors, total)
    }

    fn watched(&self) -> Vec<String> {
        self.paths.templates_watch.clone()
    }
}

/// Entry templates matched by `patterns`, partials excluded.
pub(crate) fn entries(root: &Utf8Path, patterns: &[String]) -> Result<Vec<Matched>, TaskError> {
    let found = io::find(root, patterns)?;

    Ok(found
        .into_iter()
        .filter(|file| {
            let in_root = file.path.strip_prefix(root).unwrap_or(&file.path);
            !io::is_partial(&file.rel) && !io::is_partial(in_root)
        })
        .collect())
}

/// `<build>/<rel>` with the extension switched to `.html`.
pub(crate) fn output_path(dir: &Utf8Path, entry: &Matched) -> Utf8PathBuf {
    dir.join(&entry.rel).with_extension("html")
}

/// Fingerprints every template reachable from the entries or matched by the
/// watch globs, following template references.
fn scan(
    root: &Utf8Path,
    template_root: &Utf8Path,
    entries: &[Matched],
    watch: &[String],
) -> Result<(HashMap<Utf8PathBuf, Hash32>, DependencyMap), TaskError> {
    let mut hashes = HashMap::new();
    let mut deps = DependencyMap::new();

    let mut queue: Vec<Utf8PathBuf> = entries.iter().map(|e| e.path.clone()).collect();
    queue.extend(io::find(root, watch)?.into_iter().map(|m| m.path));

    let mut seen: HashSet<Utf8PathBuf> = queue.iter().cloned().collect();

    while let Some(path) = queue.pop() {
        let source = match fs::read(&path) {
            Ok(source) => source,
            // a dangling reference is reported when the entry is rendered
            Err(_) => continue,
        };

        hashes.insert(path.clone(), Hash32::hash(&source));

        let text = String::from_utf8_lossy(&source);
        for dep in deps.add(template_root, &path, &text) {
            if dep.is_file() && seen.insert(dep.clone()) {
                queue.push(dep.clone());
            }
        }
    }

    Ok((hashes, deps))
}

/// Logs failed files and updates their failure marks, returning the errors.
fn record(
    cache: &ChangeCache,
    results: Vec<(&Matched, Result<(), TaskError>)>,
) -> Vec<TaskError> {
    let mut errors = Vec::new();

    for (entry, result) in results {
        match result {
            Ok(()) => cache.clear_failed(&entry.path),
            Err(err) => {
                tracing::error!("{err}");
                cache.mark_failed(&entry.path);
                errors.push(err);
            }
        }
    }

    errors
}

pub(crate) fn fail_if_any(errors: Vec<TaskError>, total: usize) -> anyhow::Result<()> {
    let failed = errors.len();
    match errors.into_iter().next() {
        None => Ok(()),
        Some(first) if failed == 1 && total == 1 => Err(first.into()),
        Some(first) => Err(TaskError::Files {
            failed,
            total,
            first: Box::new(first),
        }
        .into()),
    }
}
