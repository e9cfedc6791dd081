use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use console::style;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use sitepipe::engine::{self, TaskGraph};
use sitepipe::{ChangeCache, Environment, Mode, PathTable};

/// Static website asset pipeline.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Task to run: any pipeline task (`build`, `dist`, `deploy`, ...),
    /// `watch`, `serve` (alias `connect`) or `default`.
    #[arg(index = 1, default_value = "default")]
    task: String,

    /// Path table, relative to the project root. A missing file means
    /// defaults.
    #[arg(short = 'C', long, default_value = "sitepipe.toml")]
    config: Utf8PathBuf,

    /// Project root.
    #[arg(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Print how long each task took.
    #[arg(long)]
    timings: bool,
}

fn init_logging() -> anyhow::Result<()> {
    let indicatif_layer = IndicatifLayer::new();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;

    let root = args
        .root
        .canonicalize_utf8()
        .with_context(|| format!("project root '{}' doesn't exist", args.root))?;
    let paths = PathTable::load(root.join(&args.config))?;
    let graph = sitepipe::tasks::blueprint(&paths)?;
    let cache = ChangeCache::new();

    match args.task.as_str() {
        "default" => develop(&graph, &paths, &root, &cache),
        "watch" => watch(&graph, &root, &cache),
        "serve" | "connect" => serve(&paths, &root),
        task => {
            let env = Environment::new(&root, Mode::Build);
            let diagnostics = engine::run(&graph, task, &env, &cache)?;

            if args.timings {
                eprint!("{}", diagnostics.render_table(&graph));
            }
            tracing::info!("{} finished", style(task).green());
            Ok(())
        }
    }
}

/// Builds in watch mode, then serves the build with live reload while
/// watching for changes.
#[cfg(all(feature = "live", feature = "server"))]
fn develop(
    graph: &TaskGraph,
    paths: &PathTable,
    root: &Utf8Path,
    cache: &ChangeCache,
) -> anyhow::Result<()> {
    let live = engine::watch::LiveReload::start()?;

    let mut env = Environment::new(root, Mode::Watch);
    env.port = Some(live.port);

    if let Err(e) = engine::run(graph, "build", &env, cache) {
        // a broken page shouldn't keep the server from starting
        tracing::error!("{e}");
    }

    let _server = engine::http::start(root.join(&paths.build), paths.port);
    engine::watch::watch(graph, &env, cache, Some(&live))?;
    Ok(())
}

#[cfg(not(all(feature = "live", feature = "server")))]
fn develop(_: &TaskGraph, _: &PathTable, _: &Utf8Path, _: &ChangeCache) -> anyhow::Result<()> {
    anyhow::bail!("the default task requires the `live` and `server` features")
}

/// Compiles the templates in watch mode, then re-runs tasks on changes.
#[cfg(feature = "live")]
fn watch(graph: &TaskGraph, root: &Utf8Path, cache: &ChangeCache) -> anyhow::Result<()> {
    let env = Environment::new(root, Mode::Watch);

    if let Err(e) = engine::run(graph, "html", &env, cache) {
        tracing::error!("{e}");
    }

    engine::watch::watch(graph, &env, cache, None)?;
    Ok(())
}

#[cfg(not(feature = "live"))]
fn watch(_: &TaskGraph, _: &Utf8Path, _: &ChangeCache) -> anyhow::Result<()> {
    anyhow::bail!("the watch task requires the `live` feature")
}

#[cfg(feature = "server")]
fn serve(paths: &PathTable, root: &Utf8Path) -> anyhow::Result<()> {
    engine::http::start(root.join(&paths.build), paths.port)
        .join()
        .map_err(|_| anyhow::anyhow!("HTTP server thread panicked"))?
}

#[cfg(not(feature = "server"))]
fn serve(_: &PathTable, _: &Utf8Path) -> anyhow::Result<()> {
    anyhow::bail!("the serve task requires the `server` feature")
}
