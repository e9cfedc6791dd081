use std::io::Cursor;
use std::sync::{Arc, LazyLock};

use camino::Utf8Path;
use image::ImageEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use rayon::prelude::*;
use regex::Regex;

use crate::config::PathTable;
use crate::engine::{Task, TaskContext};
use crate::error::TaskError;
use crate::io;
use crate::tasks::MIN_CSS;
use crate::tasks::html::{entries, fail_if_any, output_path};
use crate::template::Renderer;

/// Stands in for the stylesheet while the page is minified.
const PLACEHOLDER: &str = "__sitepipe_inline_css__";

/// `<!-- build:css --> ... <!-- endbuild -->`
static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--\s*build:css\b[^>]*-->.*?<!--\s*endbuild\s*-->").unwrap()
});

/// Matches a `<link>` to the minified stylesheet or to the compiled one
/// named `name`. The file name must be a whole path segment.
fn stylesheet_link(name: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"(?i)<link\b[^>]*\bhref\s*=\s*["']?(?:[^"'\s>]*/)?(?:{}|{})(?:[?#"'\s/][^>]*)?>"#,
        regex::escape(MIN_CSS),
        regex::escape(name),
    ))
}

/// Replaces the stylesheet reference with a placeholder `<style>` block. A
/// page without any reference gets the block at the end of its `<head>`.
fn mark_stylesheet(html: &str, link: &Regex) -> String {
    let block = format!("<style>{PLACEHOLDER}</style>");

    if BUILD_BLOCK.is_match(html) {
        return BUILD_BLOCK.replace(html, block.as_str()).into_owned();
    }
    if link.is_match(html) {
        let out = link.replace(html, block.as_str()).into_owned();
        // only the first reference becomes the inline block
        return link.replace_all(&out, "").into_owned();
    }

    match html.find("</head>") {
        Some(at) => format!("{}{block}{}", &html[..at], &html[at..]),
        None => format!("{block}{html}"),
    }
}

fn minify(html: &str) -> String {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = false;
    cfg.minify_js = false;

    String::from_utf8_lossy(&minify_html::minify(html.as_bytes(), &cfg)).into_owned()
}

/// Renders, minifies and writes a dist page with `css` inlined.
fn build_page(
    renderer: &Renderer,
    link: &Regex,
    path: &Utf8Path,
    css: &str,
) -> Result<String, TaskError> {
    let html = renderer.render(path)?;
    let html = minify(&mark_stylesheet(&html, link));
    Ok(html.replacen(PLACEHOLDER, css, 1))
}

/// Renders the entry templates for distribution: minified, with the minified
/// stylesheet inlined.
pub struct HtmlMinTask {
    paths: Arc<PathTable>,
}

impl HtmlMinTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for HtmlMinTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let dist = env.path(&self.paths.dist);
        let css = io::read_prerequisite(&dist.join("css").join(MIN_CSS), "minify-css")?;

        let entries = entries(&env.root, &self.paths.templates)?;
        let renderer = Renderer::new(env.path(&self.paths.template_root), "dist");
        let link = stylesheet_link(&self.paths.style_output_name())?;

        let errors: Vec<TaskError> = entries
            .par_iter()
            .filter_map(|entry| {
                build_page(&renderer, &link, &entry.path, &css)
                    .and_then(|html| io::write(&output_path(&dist, entry), html))
                    .err()
            })
            .collect();

        for err in &errors {
            tracing::error!("{err}");
        }

        let total = entries.len();
        tracing::info!("minified {} of {} pages", total - errors.len(), total);
        fail_if_any(errors, total)
    }
}

/// Re-encodes a PNG with the strongest lossless compression, keeping the
/// original when it's already smaller.
pub(crate) fn optimize_png(path: &Utf8Path, data: Vec<u8>) -> Result<Vec<u8>, TaskError> {
    let wrap = |source| TaskError::Image {
        path: path.to_owned(),
        source,
    };

    let image = image::load_from_memory_with_format(&data, image::ImageFormat::Png).map_err(wrap)?;

    let mut out = Cursor::new(Vec::new());
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
        .write_image(
            image.as_bytes(),
            image.width(),
            image.height(),
            image.color().into(),
        )
        .map_err(wrap)?;

    let out = out.into_inner();
    Ok(if out.len() < data.len() { out } else { data })
}

/// Optimizes the sprite images into the dist directory.
pub struct MinifySpriteTask {
    paths: Arc<PathTable>,
}

impl MinifySpriteTask {
    pub fn new(paths: Arc<PathTable>) -> Self {
        Self { paths }
    }
}

impl Task for MinifySpriteTask {
    fn execute(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        let env = ctx.env;
        let dist = env.path(&self.paths.dist);
        let files = io::find(&env.root, &self.paths.sprite)?;

        files.par_iter().try_for_each(|file| {
            let data = io::read(&file.path)?;
            let is_png = file
                .path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));

            let data = match is_png {
                true => optimize_png(&file.path, data)?,
                false => data,
            };

            io::write(&dist.join(&file.rel), data)
        })?;

        tracing::info!("optimized {} image(s)", files.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{ImageBuffer, Rgba};

    use super::*;
    use crate::cache::ChangeCache;
    use crate::core::{Environment, Mode};
    use crate::io::tests::project;

    fn mark(html: &str) -> String {
        mark_stylesheet(html, &stylesheet_link("main.css").unwrap())
    }

    #[test]
    fn link_is_replaced_by_inline_block() {
        let html = r#"<head><link rel="stylesheet" href="css/main.min.css"></head>"#;
        assert_eq!(mark(html), format!("<head><style>{PLACEHOLDER}</style></head>"));

        let html = r#"<head><link href='/css/main.css' rel=stylesheet><link rel="stylesheet" href="css/normalize.css"></head>"#;
        assert_eq!(
            mark(html),
            format!(r#"<head><style>{PLACEHOLDER}</style><link rel="stylesheet" href="css/normalize.css"></head>"#)
        );

        let html = r#"<head><link rel=stylesheet href=main.css?v=2></head>"#;
        assert_eq!(mark(html), format!("<head><style>{PLACEHOLDER}</style></head>"));
    }

    #[test]
    fn only_whole_file_names_are_stylesheet_links() {
        let html = r#"<head><link rel="stylesheet" href="css/domain.css"><link href="remain.css"></head>"#;
        assert_eq!(
            mark(html),
            format!(r#"<head><link rel="stylesheet" href="css/domain.css"><link href="remain.css"><style>{PLACEHOLDER}</style></head>"#)
        );
    }

    #[test]
    fn configured_stylesheet_name_is_replaced() {
        let link = stylesheet_link("site.css").unwrap();
        let html = r#"<head><link rel="stylesheet" href="css/site.css"></head>"#;

        assert_eq!(
            mark_stylesheet(html, &link),
            format!("<head><style>{PLACEHOLDER}</style></head>")
        );
        assert!(!link.is_match(r#"<link href="css/main.css">"#));
    }

    #[test]
    fn build_block_is_replaced_by_inline_block() {
        let html = "<head>\n<!-- build:css -->\n<link rel=\"stylesheet\" href=\"css/a.css\">\n<link rel=\"stylesheet\" href=\"css/b.css\">\n<!-- endbuild -->\n</head>";
        assert_eq!(mark(html), format!("<head>\n<style>{PLACEHOLDER}</style>\n</head>"));
    }

    #[test]
    fn pages_without_reference_still_get_styles() {
        assert_eq!(
            mark("<head><title>x</title></head><body></body>"),
            format!("<head><title>x</title><style>{PLACEHOLDER}</style></head><body></body>")
        );
    }

    #[test]
    fn html_min_inlines_exact_stylesheet() {
        let css = ".a{color:red}.b>p{margin:0 auto}";
        let (_dir, root) = project(&[
            (
                "pages/index.html",
                "<!DOCTYPE html>\n<html>\n  <head>\n    <link rel=\"stylesheet\" href=\"css/main.min.css\">\n  </head>\n  <body>\n    <p class=\"a\">  hi  </p>\n  </body>\n</html>\n",
            ),
            ("dist/css/main.min.css", css),
        ]);
        let env = Environment::new(&root, Mode::Build);
        let cache = ChangeCache::new();
        let ctx = TaskContext {
            env: &env,
            cache: &cache,
        };

        HtmlMinTask::new(Arc::new(PathTable::default()))
            .execute(&ctx)
            .unwrap();

        let html = fs::read_to_string(root.join("dist/index.html")).unwrap();
        assert!(html.contains(&format!("<style>{css}</style>")));
        assert!(!html.contains("main.min.css"));
        assert!(!html.contains("\n  "));
    }

    #[test]
    fn html_min_failures_leave_the_change_cache_alone() {
        let (_dir, root) = project(&[
            ("pages/index.html", "{% include \"pages/_missing.html\" %}"),
            ("dist/css/main.min.css", ".a{}"),
        ]);
        let env = Environment::new(&root, Mode::Build);
        let cache = ChangeCache::new();
        let ctx = TaskContext {
            env: &env,
            cache: &cache,
        };

        let err = HtmlMinTask::new(Arc::new(PathTable::default()))
            .execute(&ctx)
            .unwrap_err();

        assert!(err.downcast_ref::<TaskError>().is_some());
        assert!(!cache.has_failed(&root.join("pages/index.html")));
    }

    #[test]
    fn html_min_requires_minified_stylesheet() {
        let (_dir, root) = project(&[("pages/index.html", "x")]);
        let env = Environment::new(&root, Mode::Build);
        let cache = ChangeCache::new();
        let ctx = TaskContext {
            env: &env,
            cache: &cache,
        };

        let err = HtmlMinTask::new(Arc::new(PathTable::default()))
            .execute(&ctx)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::MissingPrerequisite { task: "minify-css", .. })
        ));
    }

    #[test]
    fn png_is_never_larger_and_stays_lossless() {
        let image = ImageBuffer::from_fn(32, 32, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgba([255u8, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });

        let mut original = Cursor::new(Vec::new());
        PngEncoder::new_with_quality(&mut original, CompressionType::Fast, FilterType::NoFilter)
            .write_image(image.as_raw(), 32, 32, image::ExtendedColorType::Rgba8)
            .unwrap();
        let original = original.into_inner();

        let optimized = optimize_png(Utf8Path::new("sprite.png"), original.clone()).unwrap();
        assert!(optimized.len() <= original.len());

        let decoded = image::load_from_memory(&optimized).unwrap().to_rgba8();
        assert_eq!(decoded, image);
    }
}
