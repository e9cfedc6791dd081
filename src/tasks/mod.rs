//! The asset pipeline's tasks and the graph tying them together.

mod copy;
mod css;
mod deploy;
mod dist;
mod html;

use std::sync::Arc;

use crate::config::PathTable;
use crate::engine::{Blueprint, TaskGraph};
use crate::error::PipelineError;

pub use copy::CopyTask;
pub use css::{CssTask, MinifyCssTask, UncssTask};
pub use deploy::DeployTask;
pub use dist::{HtmlMinTask, MinifySpriteTask};
pub use html::HtmlTask;

/// Name of the concatenated, minified stylesheet in the dist directory.
pub const MIN_CSS: &str = "main.min.css";

/// Declares every task of the pipeline.
pub fn blueprint(paths: &PathTable) -> Result<TaskGraph, PipelineError> {
    let paths = Arc::new(paths.clone());
    let mut bp = Blueprint::new();

    // development build
    bp.task("html").run(HtmlTask::new(paths.clone()));
    bp.task("css").run(CssTask::new(paths.clone()));
    bp.task("copy-js")
        .run(CopyTask::new(&paths.copy_js, paths.build.join("js")).watching());
    bp.task("copy-css")
        .run(CopyTask::new(&paths.copy_css, paths.build.join("css")));
    bp.task("copy-static")
        .run(CopyTask::new(&paths.copy_static, &paths.build));
    bp.task("copy-sprite")
        .run(CopyTask::new(&paths.sprite, &paths.dist));
    bp.task("copy")
        .after(["copy-js", "copy-css", "copy-static", "copy-sprite"])
        .group();
    bp.task("build").after(["html", "css", "copy"]).group();

    // distribution
    bp.task("uncss").run(UncssTask::new(paths.clone()));
    bp.task("minify-css")
        .after(["uncss"])
        .run(MinifyCssTask::new(paths.clone()));
    bp.task("html-min")
        .after(["minify-css"])
        .run(HtmlMinTask::new(paths.clone()));
    bp.task("copy-js-to-dist")
        .run(CopyTask::new(&paths.copy_js, paths.dist.join("js")));
    bp.task("copy-static-to-dist")
        .run(CopyTask::new(&paths.copy_static, &paths.dist));
    bp.task("copy-to-dist")
        .after(["copy-js-to-dist", "copy-static-to-dist"])
        .group();
    bp.task("minify-sprite")
        .run(MinifySpriteTask::new(paths.clone()));
    bp.task("dist")
        .after(["html-min", "minify-css", "copy-to-dist", "minify-sprite"])
        .group();

    bp.task("deploy")
        .after(["dist"])
        .run(DeployTask::new(paths.clone()));

    bp.finish()
}
